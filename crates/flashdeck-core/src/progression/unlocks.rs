use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Effects gated behind a player level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    TintFilter,
    SpiralOverlay,
    Bubbles,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Feature::TintFilter => "tint_filter",
            Feature::SpiralOverlay => "spiral_overlay",
            Feature::Bubbles => "bubbles",
        })
    }
}

/// Level at which each feature opens.
pub const UNLOCK_TABLE: [(u32, Feature); 3] = [
    (10, Feature::TintFilter),
    (10, Feature::SpiralOverlay),
    (20, Feature::Bubbles),
];

pub fn unlocked_at(level: u32) -> BTreeSet<Feature> {
    UNLOCK_TABLE
        .iter()
        .filter(|(min, _)| level >= *min)
        .map(|(_, feature)| *feature)
        .collect()
}

/// Bring `unlocked` in line with `level`. Returns features that are new.
pub fn check_unlocks(unlocked: &mut BTreeSet<Feature>, level: u32) -> Vec<Feature> {
    let target = unlocked_at(level);
    let added: Vec<Feature> = target.difference(unlocked).copied().collect();
    *unlocked = target;
    added
}
