//! Admission control for concurrently visible effects.
//!
//! The arbiter is the single source of truth for what may render at the same
//! time. It owns no windows and does no I/O: every method is a decision or a
//! counter update on [`ResourceCounters`].
//!
//! ## Rules
//!
//! - Nothing new starts while a video is active or pending.
//! - Flashes and bubbles exclude each other.
//! - A flash that finds bubbles on screen marks itself waiting, which blocks
//!   new bubbles until the flash gets through.
//! - Each effect kind is debounced by a minimum re-trigger interval.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::effects::EffectKind;
use crate::storage::LimitSettings;

/// Live effect counters. One per engine, reset to zero on panic stop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounters {
    pub active_flashes: u32,
    pub active_bubbles: u32,
    pub overlay_active: bool,
    pub video_active: bool,
    pub video_pending: bool,
    pub flash_waiting: bool,
}

/// Caps and debounce interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterLimits {
    pub max_bubbles: u32,
    pub max_flashes: u32,
    pub min_interval: Duration,
}

impl Default for ArbiterLimits {
    fn default() -> Self {
        Self::from(&LimitSettings::default())
    }
}

impl From<&LimitSettings> for ArbiterLimits {
    fn from(s: &LimitSettings) -> Self {
        Self {
            max_bubbles: s.max_bubbles,
            max_flashes: s.max_flashes,
            min_interval: Duration::milliseconds(s.min_effect_interval_ms as i64),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceArbiter {
    counters: ResourceCounters,
    limits: ArbiterLimits,
    last_admitted: HashMap<EffectKind, DateTime<Utc>>,
}

impl ResourceArbiter {
    pub fn new(limits: ArbiterLimits) -> Self {
        Self {
            counters: ResourceCounters::default(),
            limits,
            last_admitted: HashMap::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn counters(&self) -> &ResourceCounters {
        &self.counters
    }

    pub fn limits(&self) -> &ArbiterLimits {
        &self.limits
    }

    pub fn is_video_active(&self) -> bool {
        self.counters.video_active || self.counters.video_pending
    }

    pub fn has_active_bubbles(&self) -> bool {
        self.counters.active_bubbles > 0
    }

    // ── Decisions ────────────────────────────────────────────────────

    /// Whether a new instance of `kind` may start at `now`.
    ///
    /// A `true` answer stamps the debounce clock for `kind`.
    pub fn can_start(&mut self, kind: EffectKind, now: DateTime<Utc>) -> bool {
        if self.is_video_active() {
            return false;
        }

        if let Some(last) = self.last_admitted.get(&kind) {
            if now - *last < self.limits.min_interval {
                return false;
            }
        }

        let c = &self.counters;
        let allowed = match kind {
            EffectKind::Bubble => {
                c.active_bubbles < self.limits.max_bubbles
                    && !c.flash_waiting
                    && c.active_flashes == 0
            }
            EffectKind::Flash => {
                c.active_flashes < self.limits.max_flashes && c.active_bubbles == 0
            }
            EffectKind::Overlay => true,
            // Videos are admitted through prepare_for_video, never here.
            EffectKind::Video => false,
        };

        if allowed {
            self.last_admitted.insert(kind, now);
        }
        allowed
    }

    /// Ask to run a flash. `false` means wait: either a video holds the
    /// screen, or bubbles are up and the flash is now marked waiting. The
    /// caller polls [`has_active_bubbles`](Self::has_active_bubbles) on a
    /// timer and calls [`flash_done_waiting`](Self::flash_done_waiting).
    pub fn request_flash(&mut self) -> bool {
        if self.is_video_active() {
            return false;
        }
        if self.has_active_bubbles() {
            self.counters.flash_waiting = true;
            return false;
        }
        self.counters.flash_waiting = false;
        true
    }

    pub fn flash_done_waiting(&mut self) {
        self.counters.flash_waiting = false;
    }

    // ── Counters ─────────────────────────────────────────────────────

    /// Apply `delta` to the counter for `kind`, clamped at zero.
    ///
    /// Increments are refused while a video is active or pending. Returns
    /// whether the update was applied.
    pub fn register(&mut self, kind: EffectKind, delta: i32) -> bool {
        if delta > 0 && self.is_video_active() && kind != EffectKind::Video {
            debug!(?kind, delta, "refusing effect registration during video");
            return false;
        }

        let apply = |count: &mut u32| {
            *count = (*count as i64 + delta as i64).max(0) as u32;
        };
        match kind {
            EffectKind::Flash => apply(&mut self.counters.active_flashes),
            EffectKind::Bubble => apply(&mut self.counters.active_bubbles),
            EffectKind::Overlay => self.counters.overlay_active = delta > 0,
            EffectKind::Video => {
                if delta > 0 {
                    self.start_video();
                } else {
                    self.end_video();
                }
            }
        }
        true
    }

    /// Zero the flash and bubble counters after their windows were torn down.
    pub fn release_effects(&mut self) {
        self.counters.active_flashes = 0;
        self.counters.active_bubbles = 0;
        self.counters.flash_waiting = false;
    }

    // ── Video lifecycle ──────────────────────────────────────────────

    /// Block flash/bubble admissions before any slow video preparation.
    pub fn prepare_for_video(&mut self) {
        self.counters.video_pending = true;
    }

    pub fn start_video(&mut self) {
        self.counters.video_pending = false;
        self.counters.video_active = true;
        // The video owns the screen; stale counts must not outlive it.
        self.release_effects();
    }

    pub fn end_video(&mut self) {
        self.counters.video_active = false;
        self.counters.video_pending = false;
    }

    /// Hard reset used by panic stop.
    pub fn reset(&mut self) {
        self.counters = ResourceCounters::default();
        self.last_admitted.clear();
    }

    pub fn set_limits(&mut self, limits: ArbiterLimits) {
        self.limits = limits;
    }
}
