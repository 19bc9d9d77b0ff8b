use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::effects::EventType;
use crate::engine::EngineSnapshot;
use crate::progression::Feature;
use crate::video::{Banner, VideoPhase};

/// Why a firing did not turn into a visible effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Another instance of the same effect is still on screen.
    Busy,
    /// The arbiter refused admission (cap, debounce or exclusion).
    Arbiter,
    /// Bubbles are up; the flash is polling until they clear.
    Waiting,
    /// No media for the category.
    NoMedia,
    /// The feature is disabled or still locked.
    Disabled,
}

/// Every state change in the engine produces an Event.
/// The host drains them with `Engine::drain_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    EngineStarted {
        token: u64,
        at: DateTime<Utc>,
    },
    EngineStopped {
        at: DateTime<Utc>,
    },
    /// Hard reset of all engine state.
    PanicStop {
        at: DateTime<Utc>,
    },
    /// Timing settings changed; all timers were re-armed under `token`.
    Rescheduled {
        token: u64,
        at: DateTime<Utc>,
    },
    EffectArmed {
        event: EventType,
        delay_ms: u64,
        token: u64,
        at: DateTime<Utc>,
    },
    EffectFired {
        event: EventType,
        at: DateTime<Utc>,
    },
    EffectDenied {
        event: EventType,
        reason: DenyReason,
        at: DateTime<Utc>,
    },
    /// Fired during a video; re-armed once the video sequence ends.
    EffectDeferred {
        event: EventType,
        at: DateTime<Utc>,
    },
    VideoPhaseChanged {
        from: VideoPhase,
        to: VideoPhase,
        at: DateTime<Utc>,
    },
    AttentionVerdict {
        total: u32,
        hit: u32,
        passed: bool,
        troll: bool,
        at: DateTime<Utc>,
    },
    BannerShown {
        banner: Banner,
        penalty_loops: u32,
        at: DateTime<Utc>,
    },
    XpAwarded {
        amount: f64,
        level: u32,
        xp: f64,
        at: DateTime<Utc>,
    },
    LevelUp {
        from: u32,
        to: u32,
        at: DateTime<Utc>,
    },
    FeatureUnlocked {
        feature: Feature,
        at: DateTime<Utc>,
    },
    IntensityUpdated {
        progress: f64,
        multiplier: f64,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        snapshot: EngineSnapshot,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::EngineStarted { at, .. }
            | Event::EngineStopped { at }
            | Event::PanicStop { at }
            | Event::Rescheduled { at, .. }
            | Event::EffectArmed { at, .. }
            | Event::EffectFired { at, .. }
            | Event::EffectDenied { at, .. }
            | Event::EffectDeferred { at, .. }
            | Event::VideoPhaseChanged { at, .. }
            | Event::AttentionVerdict { at, .. }
            | Event::BannerShown { at, .. }
            | Event::XpAwarded { at, .. }
            | Event::LevelUp { at, .. }
            | Event::FeatureUnlocked { at, .. }
            | Event::IntensityUpdated { at, .. }
            | Event::StateSnapshot { at, .. } => *at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_tagged_by_type() {
        let at = Utc::now();
        let json = serde_json::to_value(Event::EffectDenied {
            event: EventType::Bubble,
            reason: DenyReason::NoMedia,
            at,
        })
        .unwrap();
        assert_eq!(json["type"], "EffectDenied");
        assert_eq!(json["event"], "bubble");
        assert_eq!(json["reason"], "no_media");
    }

    #[test]
    fn test_video_phase_event_roundtrips() {
        let ev = Event::VideoPhaseChanged {
            from: VideoPhase::Evaluating,
            to: VideoPhase::Retrying,
            at: Utc::now(),
        };
        let back: Event = serde_json::from_str(&serde_json::to_string(&ev).unwrap()).unwrap();
        assert_eq!(back, ev);
    }
}
