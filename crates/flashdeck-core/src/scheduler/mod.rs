//! Randomized per-event timers with token-based cancellation.
//!
//! The scheduler never sleeps. It keeps a [`TimerQueue`] of continuations and
//! hands back the ones that are due when the engine ticks. Every entry is
//! bound to a generation counter captured at scheduling time:
//!
//! - event timers carry the `run_token`, bumped on start, stop and
//!   reschedule;
//! - follow-up steps of an effect carry the session epoch, bumped on start
//!   and stop only, so a reschedule does not strand a half-finished flash;
//! - video steps carry the video epoch, bumped whenever playback is torn down.
//!
//! An entry whose generation no longer matches is dropped silently when it
//! comes due. Each event type also owns a single slot, so arming a type twice
//! leaves exactly one live timer.

mod queue;

pub use queue::TimerQueue;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::effects::EventType;
use crate::progression::{effective_value, EffectiveKey};
use crate::services::SurfaceHandle;
use crate::storage::Settings;
use crate::video::VideoInput;

/// Lower bounds on the delay between two firings of a type.
pub const STARTLE_FLOOR_SECS: f64 = 5.0;
pub const FLASH_FLOOR_SECS: f64 = 3.0;
pub const SUBLIMINAL_FLOOR_SECS: f64 = 1.0;
pub const BUBBLE_FLOOR_SECS: f64 = 2.0;

/// Bubble frequency cap while the decorative overlay is on screen.
pub const BUBBLE_FREQ_WITH_OVERLAY: f64 = 4.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub running: bool,
    /// Incremented on every start, stop and reschedule.
    pub run_token: u64,
    pub session_start: Option<DateTime<Utc>>,
    /// Ramp progress, `[0, 1]`.
    pub intensity_progress: f64,
}

/// A pending event timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub event_type: EventType,
    pub token_at_schedule: u64,
    pub fire_at: DateTime<Utc>,
}

/// Work the engine performs when a timer comes due.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Fire(EventType),
    /// Arm the recurring loops (delayed after a launch startle).
    StartLoops,
    StartupStartle,
    /// Flash waiting for bubbles to clear.
    FlashRetry,
    FlashSpawn { cycle: u64, path: PathBuf },
    FlashCleanup { cycle: u64 },
    /// Hydra spawning resumes after the cleanup window.
    HydraResume,
    Unduck,
    SubliminalShow { text: String },
    DestroySurface(SurfaceHandle),
    /// A bubble nobody popped drifts off screen.
    BubbleExpired(SurfaceHandle),
    Video(VideoInput),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Event { token: u64, id: u64 },
    Session(u64),
    Video(u64),
}

#[derive(Debug)]
struct Timer {
    bound: Bound,
    task: Task,
}

#[derive(Default)]
pub struct Scheduler {
    queue: TimerQueue<Timer>,
    session: SessionState,
    session_epoch: u64,
    video_epoch: u64,
    slots: HashMap<EventType, (u64, DateTime<Utc>)>,
    next_id: u64,
    discarded: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.session.running
    }

    pub fn run_token(&self) -> u64 {
        self.session.run_token
    }

    pub fn video_epoch(&self) -> u64 {
        self.video_epoch
    }

    /// Fire time of the live timer for `event`, if any.
    pub fn pending(&self, event: EventType) -> Option<DateTime<Utc>> {
        self.slots.get(&event).map(|(_, at)| *at)
    }

    pub fn pending_all(&self) -> BTreeMap<EventType, DateTime<Utc>> {
        self.slots.iter().map(|(ev, (_, at))| (*ev, *at)).collect()
    }

    /// Entries dropped because their generation was stale.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    // ── Session lifecycle ────────────────────────────────────────────

    pub fn begin_session(&mut self, now: DateTime<Utc>) -> u64 {
        self.session.running = true;
        self.session.session_start = Some(now);
        self.session.intensity_progress = 0.0;
        self.session.run_token += 1;
        self.session_epoch += 1;
        self.slots.clear();
        self.session.run_token
    }

    /// Invalidate everything in flight and drop the queue.
    pub fn end_session(&mut self) {
        self.session.running = false;
        self.session.session_start = None;
        self.session.intensity_progress = 0.0;
        self.session.run_token += 1;
        self.session_epoch += 1;
        self.video_epoch += 1;
        self.slots.clear();
        self.queue.clear();
    }

    /// Bump the run token so every armed event timer goes inert.
    pub fn reschedule(&mut self) -> u64 {
        self.session.run_token += 1;
        self.slots.clear();
        self.session.run_token
    }

    pub fn set_intensity(&mut self, progress: f64) {
        self.session.intensity_progress = progress.clamp(0.0, 1.0);
    }

    // ── Arming ───────────────────────────────────────────────────────

    /// Arm `event` to fire after `delay`, replacing any live timer for it.
    pub fn arm(&mut self, event: EventType, delay: Duration, now: DateTime<Utc>) -> ScheduleEntry {
        let id = self.next_id;
        self.next_id += 1;
        let fire_at = now + delay;
        let token = self.session.run_token;
        self.slots.insert(event, (id, fire_at));
        self.queue.push(
            fire_at,
            Timer {
                bound: Bound::Event { token, id },
                task: Task::Fire(event),
            },
        );
        ScheduleEntry {
            event_type: event,
            token_at_schedule: token,
            fire_at,
        }
    }

    pub fn disarm(&mut self, event: EventType) {
        self.slots.remove(&event);
    }

    /// Run `task` after `delay` unless the session ends first.
    pub fn after(&mut self, delay: Duration, now: DateTime<Utc>, task: Task) {
        self.queue.push(
            now + delay,
            Timer {
                bound: Bound::Session(self.session_epoch),
                task,
            },
        );
    }

    /// Feed `input` to the video sequencer after `delay` unless playback is
    /// torn down first.
    pub fn after_video(&mut self, delay: Duration, now: DateTime<Utc>, input: VideoInput) {
        self.queue.push(
            now + delay,
            Timer {
                bound: Bound::Video(self.video_epoch),
                task: Task::Video(input),
            },
        );
    }

    pub fn bump_video_epoch(&mut self) -> u64 {
        self.video_epoch += 1;
        self.video_epoch
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Next live task due at or before `now`. Stale entries are discarded.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Task)> {
        while let Some((at, timer)) = self.queue.pop_due(now) {
            if self.is_live(&timer) {
                if let Task::Fire(event) = timer.task {
                    self.slots.remove(&event);
                }
                return Some((at, timer.task));
            }
            self.discarded += 1;
        }
        None
    }

    fn is_live(&self, timer: &Timer) -> bool {
        match timer.bound {
            Bound::Event { token, id } => {
                let Task::Fire(event) = &timer.task else {
                    return false;
                };
                token == self.session.run_token
                    && self.slots.get(event).map(|(slot, _)| *slot) == Some(id)
            }
            Bound::Session(epoch) => epoch == self.session_epoch,
            Bound::Video(epoch) => epoch == self.video_epoch,
        }
    }
}

/// Randomized delay until the next firing of `event`.
///
/// `overlay_active` caps the bubble rate while the decorative overlay is up.
pub fn next_delay<R: Rng + ?Sized>(
    event: EventType,
    settings: &Settings,
    progress: f64,
    overlay_active: bool,
    rng: &mut R,
) -> Duration {
    let secs = match event {
        EventType::Startle => {
            let base = f64::max(1.0, settings.startle.freq_per_hour);
            let eff = effective_value(EffectiveKey::StartleFreq, base, progress, settings);
            let interval = (3600.0 / f64::max(1.0, eff)).floor();
            let jitter = rng.gen_range(-30..=30) as f64;
            f64::max(STARTLE_FLOOR_SECS, interval + jitter)
        }
        EventType::Flash => {
            let base = f64::max(0.5, settings.flash.freq_per_min);
            let eff = effective_value(EffectiveKey::FlashFreq, base, progress, settings);
            let interval = 60.0 / f64::max(0.5, eff);
            let jitter = rng.gen_range(-0.3..=0.3) * interval;
            f64::max(FLASH_FLOOR_SECS, interval + jitter)
        }
        EventType::Subliminal => {
            let base = f64::max(1.0, settings.subliminal.freq_per_min);
            let eff = effective_value(EffectiveKey::SubliminalFreq, base, progress, settings);
            let interval = 60.0 / f64::max(1.0, eff);
            let jitter = rng.gen_range(-0.2..=0.2) * interval;
            f64::max(SUBLIMINAL_FLOOR_SECS, interval + jitter)
        }
        EventType::Bubble => {
            let mut eff = effective_value(
                EffectiveKey::BubbleFreq,
                settings.bubbles.freq_per_min,
                progress,
                settings,
            );
            if overlay_active {
                eff = eff.min(BUBBLE_FREQ_WITH_OVERLAY);
            }
            let interval = 60.0 / f64::max(1.0, eff);
            let jitter = rng.gen_range(-0.25..=0.25) * interval;
            f64::max(BUBBLE_FLOOR_SECS, interval + jitter)
        }
    };
    Duration::milliseconds((secs * 1000.0).round() as i64)
}
