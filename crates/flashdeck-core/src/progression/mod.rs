//! Player progression: XP, levels, unlocks and the intensity ramp.
//!
//! `ProgressionEngine` is the only writer of level and XP. The engine mirrors
//! both back into `Settings::player` after every mutation so the host can
//! persist them.

mod ramp;
mod unlocks;

pub use ramp::{
    effective_value, intensity_progress, ramp_remaining_secs, volume_curve, EffectiveKey,
    BUBBLE_FREQ_CEILING, FLASH_FREQ_CEILING, STARTLE_FREQ_CEILING, SUBLIMINAL_FREQ_CEILING,
    VOLUME_CEILING,
};
pub use unlocks::{check_unlocks, unlocked_at, Feature, UNLOCK_TABLE};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::storage::{PlayerSettings, Settings};

pub const XP_THRESHOLD_BASE: f64 = 50.0;
pub const XP_THRESHOLD_SLOPE: f64 = 20.0;

/// Bonus applied per danger flag.
const DANGER_MULTIPLIER: f64 = 1.5;

/// XP needed to leave `level`.
pub fn threshold(level: u32) -> f64 {
    XP_THRESHOLD_BASE + level as f64 * XP_THRESHOLD_SLOPE
}

/// Where an award comes from. Video awards also honour the strict lock bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XpContext {
    General,
    Video,
}

pub fn xp_multiplier(ctx: XpContext, settings: &Settings) -> f64 {
    let mut multiplier = 1.0;
    if settings.safety.disable_panic {
        multiplier *= DANGER_MULTIPLIER;
    }
    if ctx == XpContext::Video && settings.startle.strict {
        multiplier *= DANGER_MULTIPLIER;
    }
    multiplier
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProgress {
    pub level: u32,
    pub xp: f64,
    pub unlocked: BTreeSet<Feature>,
}

impl Default for PlayerProgress {
    fn default() -> Self {
        Self {
            level: 1,
            xp: 0.0,
            unlocked: BTreeSet::new(),
        }
    }
}

/// Outcome of a single XP award.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XpGain {
    /// Points actually added, after multipliers.
    pub amount: f64,
    pub from_level: u32,
    pub to_level: u32,
    pub unlocked: Vec<Feature>,
}

impl XpGain {
    pub fn leveled_up(&self) -> bool {
        self.to_level > self.from_level
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressionEngine {
    progress: PlayerProgress,
}

impl ProgressionEngine {
    pub fn new(level: u32, xp: f64) -> Self {
        let level = level.max(1);
        let mut progress = PlayerProgress {
            level,
            xp: if xp.is_finite() { xp.max(0.0) } else { 0.0 },
            unlocked: BTreeSet::new(),
        };
        check_unlocks(&mut progress.unlocked, level);
        Self { progress }
    }

    pub fn from_settings(player: &PlayerSettings) -> Self {
        Self::new(player.level, player.xp)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn progress(&self) -> &PlayerProgress {
        &self.progress
    }

    pub fn level(&self) -> u32 {
        self.progress.level
    }

    pub fn xp(&self) -> f64 {
        self.progress.xp
    }

    pub fn xp_needed(&self) -> f64 {
        threshold(self.progress.level)
    }

    /// 0.0 .. 1.0 progress toward the next level.
    pub fn xp_fraction(&self) -> f64 {
        self.progress.xp / self.xp_needed()
    }

    pub fn is_unlocked(&self, feature: Feature) -> bool {
        self.progress.unlocked.contains(&feature)
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Award `base` points scaled by the danger-flag multipliers.
    pub fn add_xp(&mut self, base: f64, ctx: XpContext, settings: &Settings) -> XpGain {
        self.apply(base * xp_multiplier(ctx, settings))
    }

    /// Add already-scaled points, then level up while XP covers the
    /// threshold. Non-positive or non-finite amounts are ignored.
    pub fn apply(&mut self, points: f64) -> XpGain {
        let from_level = self.progress.level;
        if !points.is_finite() || points <= 0.0 {
            return XpGain {
                amount: 0.0,
                from_level,
                to_level: from_level,
                unlocked: Vec::new(),
            };
        }

        self.progress.xp += points;
        while self.progress.xp >= threshold(self.progress.level) {
            self.progress.xp -= threshold(self.progress.level);
            self.progress.level += 1;
        }

        let unlocked = if self.progress.level > from_level {
            self.check_unlocks()
        } else {
            Vec::new()
        };

        XpGain {
            amount: points,
            from_level,
            to_level: self.progress.level,
            unlocked,
        }
    }

    /// Recompute unlocked features from the current level.
    pub fn check_unlocks(&mut self) -> Vec<Feature> {
        check_unlocks(&mut self.progress.unlocked, self.progress.level)
    }

    /// Overwrite level and XP, e.g. from an edited settings file.
    pub fn set_progress(&mut self, level: u32, xp: f64) {
        *self = Self::new(level, xp);
    }
}
