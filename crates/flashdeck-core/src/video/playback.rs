//! Wall-clock frame sync.
//!
//! The target frame is derived from elapsed time, never from a frame counter,
//! so a slow read makes the next tick skip ahead instead of drifting.

use serde::{Deserialize, Serialize};

use crate::error::MediaError;
use crate::services::VideoBackend;

/// Largest gap closed by grabbing frames; anything larger seeks.
pub const MAX_GRAB_GAP: u64 = 5;

/// Slack after the nominal duration before playback is declared over.
pub const END_SLACK_SECS: f64 = 0.5;

const FALLBACK_FPS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMeta {
    pub fps: f64,
    pub frame_count: u64,
}

impl VideoMeta {
    pub fn new(fps: f64, frame_count: u64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            FALLBACK_FPS
        };
        Self { fps, frame_count }
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count as f64 / self.fps
    }

    pub fn target_frame(&self, elapsed_secs: f64) -> u64 {
        (elapsed_secs.max(0.0) * self.fps) as u64
    }

    pub fn is_finished(&self, elapsed_secs: f64) -> bool {
        elapsed_secs > self.duration_secs() + END_SLACK_SECS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    InSync,
    Grab(u64),
    Seek(u64),
}

pub fn sync_step(current: u64, target: u64) -> SyncStep {
    if current >= target {
        return SyncStep::InSync;
    }
    let gap = target - current;
    if gap > MAX_GRAB_GAP {
        SyncStep::Seek(target)
    } else {
        SyncStep::Grab(gap)
    }
}

/// Catch the backend up to `target` and present one frame.
///
/// `Ok(false)` means end of stream.
pub fn advance(backend: &mut dyn VideoBackend, target: u64) -> Result<bool, MediaError> {
    match sync_step(backend.position(), target) {
        SyncStep::InSync => {}
        SyncStep::Grab(n) => backend.grab(n)?,
        SyncStep::Seek(frame) => backend.seek(frame)?,
    }
    backend.present()
}
