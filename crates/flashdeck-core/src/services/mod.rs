//! Collaborator interfaces consumed by the engine.
//!
//! Rendering, audio, decoding and OS hooks live outside the core. The engine
//! only talks to them through these traits, and treats every failure as a
//! logged no-op. Headless implementations in [`headless`] let a full session
//! run without a GUI.

pub mod extract;
pub mod headless;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::effects::MediaCategory;
use crate::error::{MediaError, ServiceError};
use crate::video::{Banner, VideoMeta};

/// Lists available assets. "Nothing available" is an empty list.
pub trait MediaLibrary {
    fn list(&self, category: MediaCategory) -> Vec<PathBuf>;

    /// Audio file recorded for a subliminal text, if any.
    fn linked_audio(&self, _text: &str) -> Option<PathBuf> {
        None
    }
}

/// Lowers other applications' volume. Both calls are idempotent.
pub trait AudioDucker {
    /// `strength` is a percentage.
    fn duck(&mut self, strength: u32) -> Result<(), ServiceError>;
    fn unduck(&mut self) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioChannel {
    Effect,
    Video,
    Subliminal,
}

pub trait AudioOut {
    /// Start playback and return the clip length.
    fn play(
        &mut self,
        path: &Path,
        channel: AudioChannel,
        volume: f64,
    ) -> Result<Duration, ServiceError>;

    fn stop_all(&mut self);
}

/// Opaque handle to an on-screen region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SurfaceRequest {
    FlashImage {
        path: PathBuf,
        alpha: f64,
        scale: f64,
        clickable: bool,
    },
    SubliminalText {
        text: String,
        opacity: f64,
    },
    Bubble,
    AttentionTarget {
        id: u64,
        text: String,
        size: u32,
    },
    Banner {
        banner: Banner,
    },
    Spiral {
        path: String,
        opacity: f64,
    },
    Tint {
        opacity: f64,
    },
}

pub trait SurfaceFactory {
    fn create(&mut self, request: SurfaceRequest) -> Result<SurfaceHandle, ServiceError>;

    /// Destroying an unknown or already destroyed handle is not an error.
    fn destroy(&mut self, handle: SurfaceHandle) -> Result<(), ServiceError>;

    fn set_opacity(&mut self, handle: SurfaceHandle, opacity: f64) -> Result<(), ServiceError>;
}

/// The application's own window, hidden while a strict video plays.
pub trait HostWindow {
    fn hide(&mut self) -> Result<(), ServiceError>;
    fn restore(&mut self) -> Result<(), ServiceError>;
}

/// Frame-accurate decoder that renders into its own full-screen surface.
pub trait VideoBackend {
    fn open(&mut self, path: &Path) -> Result<VideoMeta, MediaError>;
    /// Index of the next frame to be read.
    fn position(&self) -> u64;
    fn seek(&mut self, frame: u64) -> Result<(), MediaError>;
    /// Skip `n` frames without decoding them.
    fn grab(&mut self, n: u64) -> Result<(), MediaError>;
    /// Read and show one frame. `Ok(false)` at end of stream.
    fn present(&mut self) -> Result<bool, MediaError>;
    fn close(&mut self);
}

/// Pulls the audio track out of a video. Runs on a worker thread.
pub trait AudioExtractor: Send + Sync {
    fn extract(&self, video: &Path) -> Result<PathBuf, MediaError>;
}

/// Polled by the panic watcher thread.
pub trait HotkeySource: Send {
    fn is_pressed(&mut self) -> Result<bool, ServiceError>;
}

/// Notified after every XP mutation.
pub trait ProgressSink {
    fn on_progress(&mut self, level: u32, fraction: f64, xp: f64, xp_needed: f64);
}

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs slow work off the loop. Results come back as commands.
pub trait Executor {
    fn spawn(&self, job: Job);
}

/// One OS thread per job.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn spawn(&self, job: Job) {
        // Builder::spawn consumes the closure, so a failed spawn cannot fall
        // back to running it here.
        if let Err(err) = std::thread::Builder::new()
            .name("flashdeck-worker".into())
            .spawn(job)
        {
            warn!(?err, "failed to spawn worker thread");
        }
    }
}

/// Runs jobs on the calling thread. Deterministic; used by tests and the
/// simulation.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn spawn(&self, job: Job) {
        job();
    }
}

/// Every collaborator the engine needs.
pub struct Services {
    pub media: Box<dyn MediaLibrary>,
    pub ducker: Box<dyn AudioDucker>,
    pub audio: Box<dyn AudioOut>,
    pub surfaces: Box<dyn SurfaceFactory>,
    pub host: Box<dyn HostWindow>,
    pub video: Box<dyn VideoBackend>,
    pub extractor: Arc<dyn AudioExtractor>,
    pub progress: Box<dyn ProgressSink>,
    pub executor: Box<dyn Executor>,
}

impl Services {
    /// Headless collaborators around `media`.
    pub fn headless(media: Box<dyn MediaLibrary>) -> Self {
        use headless::*;
        Self {
            media,
            ducker: Box::new(NullDucker::default()),
            audio: Box::new(SilentAudio::default()),
            surfaces: Box::new(HeadlessSurfaces::default()),
            host: Box::new(HeadlessHost::default()),
            video: Box::new(SyntheticVideo::default()),
            extractor: Arc::new(NoAudioExtractor),
            progress: Box::new(LogProgress),
            executor: Box::new(InlineExecutor),
        }
    }
}
