//! In-video attention mini-game.

use std::collections::{BTreeSet, VecDeque};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::storage::AttentionSettings;

/// Targets never spawn in the first two seconds.
pub const SAFE_START_SECS: f64 = 2.0;
/// Nor in the last five.
pub const SAFE_END_MARGIN_SECS: f64 = 5.0;
/// Chance that a pass still loops once more.
pub const TROLL_CHANCE: f64 = 0.10;

const FALLBACK_TEXT: &str = "CLICK ME";

/// Sorted spawn offsets (seconds into the video) for one playback.
pub fn plan_spawns<R: Rng + ?Sized>(
    duration_secs: f64,
    settings: &AttentionSettings,
    rng: &mut R,
) -> Vec<f64> {
    if !settings.enabled || duration_secs <= 0.0 {
        return Vec::new();
    }
    let count = ((duration_secs / 30.0) * settings.density as f64) as usize;
    let safe_end = f64::max(SAFE_START_SECS, duration_secs - SAFE_END_MARGIN_SECS);
    let mut spawns: Vec<f64> = (0..count)
        .map(|_| {
            if safe_end > SAFE_START_SECS {
                rng.gen_range(SAFE_START_SECS..safe_end)
            } else {
                SAFE_START_SECS
            }
        })
        .collect();
    spawns.sort_by(f64::total_cmp);
    spawns
}

pub fn pick_text<R: Rng + ?Sized>(settings: &AttentionSettings, rng: &mut R) -> String {
    let active: Vec<&String> = settings
        .pool
        .iter()
        .filter(|(_, on)| **on)
        .map(|(text, _)| text)
        .collect();
    active
        .choose(rng)
        .map(|t| t.to_string())
        .unwrap_or_else(|| FALLBACK_TEXT.to_string())
}

/// Live state of the mini-game during one playback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttentionGame {
    pub total: u32,
    pub hit: u32,
    spawns: VecDeque<f64>,
    live: BTreeSet<u64>,
    next_id: u64,
}

impl AttentionGame {
    pub fn new(spawns: Vec<f64>) -> Self {
        Self {
            total: spawns.len() as u32,
            hit: 0,
            spawns: spawns.into(),
            live: BTreeSet::new(),
            next_id: 1,
        }
    }

    /// Spawn at most one target whose time has come.
    pub fn due(&mut self, elapsed_secs: f64) -> Option<u64> {
        if *self.spawns.front()? > elapsed_secs {
            return None;
        }
        self.spawns.pop_front();
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id);
        Some(id)
    }

    /// Register a click. Clicks on expired or unknown targets do not count.
    pub fn hit(&mut self, id: u64) -> bool {
        if self.live.remove(&id) {
            self.hit += 1;
            true
        } else {
            false
        }
    }

    pub fn expire(&mut self, id: u64) -> bool {
        self.live.remove(&id)
    }

    pub fn live_targets(&self) -> impl Iterator<Item = u64> + '_ {
        self.live.iter().copied()
    }

    pub fn passed(&self) -> bool {
        self.total == 0 || self.hit >= self.total
    }
}

/// Mini-game outcome after a playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub total: u32,
    pub hit: u32,
    pub passed: bool,
    /// A pass that loops anyway.
    pub troll: bool,
}

impl Verdict {
    /// `troll_roll` is a uniform sample in `[0, 1)`.
    pub fn judge(game: &AttentionGame, troll_roll: f64) -> Self {
        let passed = game.passed();
        Self {
            total: game.total,
            hit: game.hit,
            passed,
            troll: passed && troll_roll < TROLL_CHANCE,
        }
    }

    pub fn loop_needed(&self) -> bool {
        !self.passed || self.troll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Mcg128Xsl64;

    fn enabled(density: u32) -> AttentionSettings {
        AttentionSettings {
            enabled: true,
            density,
            ..Default::default()
        }
    }

    #[test]
    fn test_spawn_count_scales_with_duration_and_density() {
        let mut rng = Mcg128Xsl64::seed_from_u64(1);
        assert_eq!(plan_spawns(60.0, &enabled(3), &mut rng).len(), 6);
        assert_eq!(plan_spawns(29.0, &enabled(1), &mut rng).len(), 0);
        assert!(plan_spawns(60.0, &AttentionSettings::default(), &mut rng).is_empty());
    }

    #[test]
    fn test_spawns_are_sorted_and_inside_safe_zone() {
        let mut rng = Mcg128Xsl64::seed_from_u64(9);
        let spawns = plan_spawns(90.0, &enabled(10), &mut rng);
        assert_eq!(spawns.len(), 30);
        assert!(spawns.windows(2).all(|w| w[0] <= w[1]));
        assert!(spawns.iter().all(|t| (2.0..85.0).contains(t)));
    }

    #[test]
    fn test_due_releases_one_target_per_call() {
        let mut game = AttentionGame::new(vec![2.0, 2.5, 9.0]);
        assert_eq!(game.due(1.0), None);
        assert_eq!(game.due(3.0), Some(1));
        assert_eq!(game.due(3.0), Some(2));
        assert_eq!(game.due(3.0), None);
        assert_eq!(game.live_targets().count(), 2);
    }

    #[test]
    fn test_expired_targets_cannot_be_hit() {
        let mut game = AttentionGame::new(vec![2.0, 3.0]);
        let a = game.due(2.0).unwrap();
        let b = game.due(3.0).unwrap();
        assert!(game.expire(a));
        assert!(!game.hit(a));
        assert!(game.hit(b));
        assert!(!game.hit(b));
        assert_eq!(game.hit, 1);
        assert!(!game.passed());
    }

    #[test]
    fn test_verdicts() {
        let empty = AttentionGame::new(Vec::new());
        let v = Verdict::judge(&empty, 0.5);
        assert!(v.passed && !v.troll && !v.loop_needed());

        let v = Verdict::judge(&empty, 0.05);
        assert!(v.passed && v.troll && v.loop_needed());

        let missed = AttentionGame::new(vec![2.0]);
        let v = Verdict::judge(&missed, 0.05);
        assert!(!v.passed && !v.troll && v.loop_needed());
    }

    #[test]
    fn test_empty_pool_uses_fallback_text() {
        let mut rng = Mcg128Xsl64::seed_from_u64(2);
        let mut s = enabled(1);
        s.pool.clear();
        assert_eq!(pick_text(&s, &mut rng), "CLICK ME");
    }
}
