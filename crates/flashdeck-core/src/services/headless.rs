//! Collaborators that render nothing and log what they would have done.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::{
    AudioChannel, AudioDucker, AudioExtractor, AudioOut, HostWindow, HotkeySource, ProgressSink,
    SurfaceFactory, SurfaceHandle, SurfaceRequest, VideoBackend,
};
use crate::error::{MediaError, ServiceError};
use crate::video::VideoMeta;

#[derive(Debug, Default)]
pub struct NullDucker {
    ducked: bool,
}

impl NullDucker {
    pub fn is_ducked(&self) -> bool {
        self.ducked
    }
}

impl AudioDucker for NullDucker {
    fn duck(&mut self, strength: u32) -> Result<(), ServiceError> {
        if !self.ducked {
            debug!(strength, "duck");
        }
        self.ducked = true;
        Ok(())
    }

    fn unduck(&mut self) -> Result<(), ServiceError> {
        if self.ducked {
            debug!("unduck");
        }
        self.ducked = false;
        Ok(())
    }
}

/// Pretends every clip lasts `clip_length`.
#[derive(Debug)]
pub struct SilentAudio {
    pub clip_length: Duration,
}

impl Default for SilentAudio {
    fn default() -> Self {
        Self {
            clip_length: Duration::from_secs(3),
        }
    }
}

impl AudioOut for SilentAudio {
    fn play(
        &mut self,
        path: &Path,
        channel: AudioChannel,
        volume: f64,
    ) -> Result<Duration, ServiceError> {
        debug!(path = %path.display(), ?channel, volume, "play");
        Ok(self.clip_length)
    }

    fn stop_all(&mut self) {}
}

#[derive(Debug, Default)]
pub struct HeadlessSurfaces {
    next: u64,
    live: BTreeSet<SurfaceHandle>,
}

impl HeadlessSurfaces {
    pub fn live(&self) -> usize {
        self.live.len()
    }
}

impl SurfaceFactory for HeadlessSurfaces {
    fn create(&mut self, request: SurfaceRequest) -> Result<SurfaceHandle, ServiceError> {
        self.next += 1;
        let handle = SurfaceHandle(self.next);
        debug!(?handle, ?request, "surface created");
        self.live.insert(handle);
        Ok(handle)
    }

    fn destroy(&mut self, handle: SurfaceHandle) -> Result<(), ServiceError> {
        self.live.remove(&handle);
        Ok(())
    }

    fn set_opacity(&mut self, _handle: SurfaceHandle, _opacity: f64) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct HeadlessHost {
    hidden: bool,
}

impl HostWindow for HeadlessHost {
    fn hide(&mut self) -> Result<(), ServiceError> {
        self.hidden = true;
        Ok(())
    }

    fn restore(&mut self) -> Result<(), ServiceError> {
        self.hidden = false;
        Ok(())
    }
}

/// Decoder stand-in producing `duration` seconds of frames at `fps`.
#[derive(Debug)]
pub struct SyntheticVideo {
    pub fps: f64,
    pub duration_secs: f64,
    frame_count: u64,
    pos: u64,
    open: Option<PathBuf>,
}

impl SyntheticVideo {
    pub fn new(fps: f64, duration_secs: f64) -> Self {
        Self {
            fps,
            duration_secs,
            frame_count: 0,
            pos: 0,
            open: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn ensure_open(&self) -> Result<(), MediaError> {
        if self.open.is_none() {
            return Err(MediaError::DecodeFailed("no video open".into()));
        }
        Ok(())
    }
}

impl Default for SyntheticVideo {
    fn default() -> Self {
        Self::new(30.0, 30.0)
    }
}

impl VideoBackend for SyntheticVideo {
    fn open(&mut self, path: &Path) -> Result<VideoMeta, MediaError> {
        let meta = VideoMeta::new(self.fps, (self.fps * self.duration_secs) as u64);
        self.frame_count = meta.frame_count;
        self.pos = 0;
        self.open = Some(path.to_path_buf());
        Ok(meta)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, frame: u64) -> Result<(), MediaError> {
        self.ensure_open()?;
        self.pos = frame.min(self.frame_count);
        Ok(())
    }

    fn grab(&mut self, n: u64) -> Result<(), MediaError> {
        self.ensure_open()?;
        self.pos = (self.pos + n).min(self.frame_count);
        Ok(())
    }

    fn present(&mut self) -> Result<bool, MediaError> {
        self.ensure_open()?;
        if self.pos >= self.frame_count {
            return Ok(false);
        }
        self.pos += 1;
        Ok(true)
    }

    fn close(&mut self) {
        self.open = None;
    }
}

/// Always fails, so every video plays silently.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAudioExtractor;

impl AudioExtractor for NoAudioExtractor {
    fn extract(&self, video: &Path) -> Result<PathBuf, MediaError> {
        Err(MediaError::ExtractionFailed {
            path: video.to_path_buf(),
            message: "no extractor configured".into(),
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverPressed;

impl HotkeySource for NeverPressed {
    fn is_pressed(&mut self) -> Result<bool, ServiceError> {
        Ok(false)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&mut self, level: u32, fraction: f64, xp: f64, xp_needed: f64) {
        debug!(level, fraction, xp, xp_needed, "progress");
    }
}
