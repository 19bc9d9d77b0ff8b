//! Session intensity ramp.
//!
//! `progress` grows linearly from 0 at session start to 1 after
//! `ramp.duration_min` minutes. [`effective_value`] turns a base setting into
//! its ramp-scaled value; it is pure so the ceilings can be tested directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::Settings;

/// Hard ceilings applied after ramp scaling.
pub const FLASH_FREQ_CEILING: f64 = 10.0;
pub const STARTLE_FREQ_CEILING: f64 = 35.0;
pub const SUBLIMINAL_FREQ_CEILING: f64 = 30.0;
pub const VOLUME_CEILING: f64 = 0.8;
pub const BUBBLE_FREQ_CEILING: f64 = 12.0;

/// Values the ramp knows how to scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveKey {
    /// Flashes per minute.
    FlashFreq,
    /// Videos per hour.
    StartleFreq,
    /// Subliminals per minute.
    SubliminalFreq,
    /// Bubbles per minute.
    BubbleFreq,
    Volume,
    ImageAlpha,
}

/// Ramp progress at `now`, clamped to `[0, 1]`.
///
/// Always 0 when the ramp is disabled or the session is not running.
pub fn intensity_progress(
    now: DateTime<Utc>,
    session_start: Option<DateTime<Utc>>,
    running: bool,
    settings: &Settings,
) -> f64 {
    let Some(start) = session_start else {
        return 0.0;
    };
    if !running || !settings.ramp.enabled {
        return 0.0;
    }
    let duration_secs = f64::max(1.0, settings.ramp.duration_min * 60.0);
    let elapsed = (now - start).num_milliseconds() as f64 / 1000.0;
    (elapsed / duration_secs).clamp(0.0, 1.0)
}

/// Seconds until the ramp reaches 1.0.
pub fn ramp_remaining_secs(
    now: DateTime<Utc>,
    session_start: Option<DateTime<Utc>>,
    settings: &Settings,
) -> u64 {
    let Some(start) = session_start else {
        return 0;
    };
    let duration_secs = f64::max(0.0, settings.ramp.duration_min * 60.0);
    let elapsed = (now - start).num_seconds() as f64;
    f64::max(0.0, duration_secs - elapsed) as u64
}

fn lerp(base: f64, target: f64, progress: f64) -> f64 {
    base + (target - base) * progress
}

/// Ramp-scaled value for `key`.
pub fn effective_value(key: EffectiveKey, base: f64, progress: f64, settings: &Settings) -> f64 {
    let ramp = &settings.ramp;
    let p = progress.clamp(0.0, 1.0);

    match key {
        EffectiveKey::ImageAlpha => {
            if ramp.enabled && ramp.link_alpha {
                0.3 + 0.7 * p
            } else {
                base
            }
        }
        // Bubbles follow their own link flag rather than the global ramp.
        EffectiveKey::BubbleFreq => {
            let mut freq = base;
            if settings.bubbles.link_ramp {
                freq += 10.0 * p;
            }
            freq.min(BUBBLE_FREQ_CEILING)
        }
        _ if !ramp.enabled => base,
        EffectiveKey::FlashFreq => {
            let target = f64::min(FLASH_FREQ_CEILING, base * ramp.multiplier);
            lerp(base, target, p).min(FLASH_FREQ_CEILING.max(base))
        }
        EffectiveKey::StartleFreq => {
            let target = f64::min(STARTLE_FREQ_CEILING, base * ramp.multiplier);
            lerp(base, target, p).floor().min(STARTLE_FREQ_CEILING)
        }
        EffectiveKey::SubliminalFreq => {
            let target = f64::min(SUBLIMINAL_FREQ_CEILING, base * ramp.multiplier);
            lerp(base, target, p).floor().min(SUBLIMINAL_FREQ_CEILING)
        }
        EffectiveKey::Volume => {
            let target = base + (ramp.multiplier - 1.0) * 0.15;
            lerp(base, target, p).min(VOLUME_CEILING)
        }
    }
}

/// Perceptual volume curve used for every playback.
pub fn volume_curve(volume: f64) -> f64 {
    f64::max(0.05, volume.clamp(0.0, 1.0).powf(1.5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ramped(multiplier: f64) -> Settings {
        let mut s = Settings::default();
        s.ramp.enabled = true;
        s.ramp.duration_min = 10.0;
        s.ramp.multiplier = multiplier;
        s
    }

    #[test]
    fn test_progress_is_linear_and_clamped() {
        let s = ramped(2.0);
        let start = Utc::now();
        assert_eq!(intensity_progress(start, Some(start), true, &s), 0.0);
        let half = intensity_progress(start + Duration::minutes(5), Some(start), true, &s);
        assert!((half - 0.5).abs() < 1e-9);
        assert_eq!(
            intensity_progress(start + Duration::hours(3), Some(start), true, &s),
            1.0
        );
    }

    #[test]
    fn test_progress_is_zero_when_disabled_or_stopped() {
        let start = Utc::now();
        let later = start + Duration::minutes(5);
        assert_eq!(intensity_progress(later, Some(start), false, &ramped(2.0)), 0.0);
        assert_eq!(
            intensity_progress(later, Some(start), true, &Settings::default()),
            0.0
        );
        assert_eq!(intensity_progress(later, None, true, &ramped(2.0)), 0.0);
    }

    #[test]
    fn test_startle_frequency_never_exceeds_ceiling() {
        let s = ramped(2.0);
        assert_eq!(effective_value(EffectiveKey::StartleFreq, 10.0, 1.0, &s), 20.0);
        let hot = effective_value(EffectiveKey::StartleFreq, 20.0, 1.0, &ramped(5.0));
        assert_eq!(hot, STARTLE_FREQ_CEILING);
    }

    #[test]
    fn test_subliminal_and_flash_ceilings() {
        let s = ramped(10.0);
        assert_eq!(effective_value(EffectiveKey::SubliminalFreq, 25.0, 1.0, &s), 30.0);
        assert_eq!(effective_value(EffectiveKey::FlashFreq, 4.0, 1.0, &s), 10.0);
        let mid = effective_value(EffectiveKey::FlashFreq, 2.0, 0.5, &ramped(2.0));
        assert!((mid - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_ramp_returns_base() {
        let s = Settings::default();
        assert_eq!(effective_value(EffectiveKey::StartleFreq, 12.5, 1.0, &s), 12.5);
        assert_eq!(effective_value(EffectiveKey::Volume, 0.95, 1.0, &s), 0.95);
    }

    #[test]
    fn test_volume_ramps_up_but_caps() {
        let s = ramped(3.0);
        let v = effective_value(EffectiveKey::Volume, 0.5, 1.0, &s);
        assert!((v - 0.8).abs() < 1e-9);
        let v = effective_value(EffectiveKey::Volume, 0.3, 0.5, &s);
        assert!((v - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_image_alpha_follows_ramp_when_linked() {
        let mut s = ramped(1.0);
        assert_eq!(effective_value(EffectiveKey::ImageAlpha, 0.9, 0.5, &s), 0.9);
        s.ramp.link_alpha = true;
        assert!((effective_value(EffectiveKey::ImageAlpha, 0.9, 0.5, &s) - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_bubble_frequency_links_to_ramp_and_caps() {
        let mut s = Settings::default();
        s.bubbles.freq_per_min = 5.0;
        assert_eq!(effective_value(EffectiveKey::BubbleFreq, 5.0, 1.0, &s), 5.0);
        s.bubbles.link_ramp = true;
        assert_eq!(effective_value(EffectiveKey::BubbleFreq, 5.0, 0.5, &s), 10.0);
        assert_eq!(effective_value(EffectiveKey::BubbleFreq, 5.0, 1.0, &s), 12.0);
    }

    #[test]
    fn test_volume_curve_has_floor() {
        assert_eq!(volume_curve(0.0), 0.05);
        assert!((volume_curve(1.0) - 1.0).abs() < 1e-9);
        assert!((volume_curve(0.25) - 0.125).abs() < 1e-9);
    }
}
