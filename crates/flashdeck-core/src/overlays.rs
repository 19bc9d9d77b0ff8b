//! Decorative overlays: the animated spiral and the colour tint.
//!
//! Both are level-gated and maintained by the engine heartbeat. They are torn
//! down while a video is pending or active and come back on the next
//! heartbeat after it ends.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::arbiter::ResourceArbiter;
use crate::effects::EffectKind;
use crate::progression::{Feature, ProgressionEngine};
use crate::services::{SurfaceFactory, SurfaceHandle, SurfaceRequest};
use crate::storage::Settings;

/// Opacity added at full ramp when an overlay is ramp-linked.
pub const RAMP_OPACITY_BONUS: f64 = 0.4;
pub const TINT_MAX_OPACITY: f64 = 0.5;
/// Spiral opacity from which it earns XP.
pub const SPIRAL_XP_MIN_OPACITY: f64 = 0.03;
pub const TINT_XP_MIN_OPACITY: f64 = 0.05;

const UPDATE_INTERVAL_MS: i64 = 100;

pub fn spiral_opacity(settings: &Settings, progress: f64) -> f64 {
    let mut op = settings.overlay.opacity;
    if settings.overlay.link_ramp {
        op = f64::min(1.0, op + progress * RAMP_OPACITY_BONUS);
    }
    op
}

pub fn tint_opacity(settings: &Settings, progress: f64) -> f64 {
    let mut op = settings.tint.opacity;
    if settings.tint.link_ramp {
        op = f64::min(TINT_MAX_OPACITY, op + progress * RAMP_OPACITY_BONUS);
    }
    op
}

#[derive(Debug, Default)]
pub struct OverlayManager {
    spiral: Option<(SurfaceHandle, String)>,
    tint: Option<SurfaceHandle>,
    last_update: Option<DateTime<Utc>>,
}

impl OverlayManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spiral_visible(&self) -> bool {
        self.spiral.is_some()
    }

    pub fn tint_visible(&self) -> bool {
        self.tint.is_some()
    }

    /// Bring the overlays in line with settings, unlocks and ramp.
    pub fn update(
        &mut self,
        now: DateTime<Utc>,
        surfaces: &mut dyn SurfaceFactory,
        arbiter: &mut ResourceArbiter,
        settings: &Settings,
        progression: &ProgressionEngine,
        progress: f64,
    ) {
        if arbiter.is_video_active() {
            self.hide(surfaces, arbiter);
            return;
        }
        if let Some(last) = self.last_update {
            if now - last < Duration::milliseconds(UPDATE_INTERVAL_MS) {
                return;
            }
        }
        self.last_update = Some(now);

        let tint_on = progression.is_unlocked(Feature::TintFilter) && settings.tint.enabled;
        let tint_op = tint_opacity(settings, progress);
        if tint_on && tint_op > 0.0 {
            match self.tint {
                Some(handle) => {
                    if let Err(err) = surfaces.set_opacity(handle, tint_op) {
                        warn!(?err, "tint opacity update failed");
                    }
                }
                None => match surfaces.create(SurfaceRequest::Tint { opacity: tint_op }) {
                    Ok(handle) => self.tint = Some(handle),
                    Err(err) => warn!(?err, "tint overlay creation failed"),
                },
            }
        } else {
            self.drop_tint(surfaces);
        }

        let path = &settings.overlay.path;
        let spiral_on = progression.is_unlocked(Feature::SpiralOverlay)
            && settings.overlay.enabled
            && !path.is_empty();
        if !spiral_on {
            self.drop_spiral(surfaces, arbiter);
            return;
        }

        let op = spiral_opacity(settings, progress);
        if let Some((handle, current)) = &self.spiral {
            if current == path {
                if let Err(err) = surfaces.set_opacity(*handle, op) {
                    warn!(?err, "spiral opacity update failed");
                }
                return;
            }
            self.drop_spiral(surfaces, arbiter);
        }

        let request = SurfaceRequest::Spiral {
            path: path.clone(),
            opacity: op,
        };
        match surfaces.create(request) {
            Ok(handle) => {
                self.spiral = Some((handle, path.clone()));
                arbiter.register(EffectKind::Overlay, 1);
            }
            Err(err) => warn!(?err, "spiral overlay creation failed"),
        }
    }

    /// Remove both overlays. Safe to call repeatedly.
    pub fn hide(&mut self, surfaces: &mut dyn SurfaceFactory, arbiter: &mut ResourceArbiter) {
        self.drop_tint(surfaces);
        self.drop_spiral(surfaces, arbiter);
        self.last_update = None;
    }

    fn drop_tint(&mut self, surfaces: &mut dyn SurfaceFactory) {
        if let Some(handle) = self.tint.take() {
            if let Err(err) = surfaces.destroy(handle) {
                warn!(?err, "tint overlay teardown failed");
            }
        }
    }

    fn drop_spiral(&mut self, surfaces: &mut dyn SurfaceFactory, arbiter: &mut ResourceArbiter) {
        if let Some((handle, _)) = self.spiral.take() {
            if let Err(err) = surfaces.destroy(handle) {
                warn!(?err, "spiral overlay teardown failed");
            }
            arbiter.register(EffectKind::Overlay, -1);
        }
    }
}
