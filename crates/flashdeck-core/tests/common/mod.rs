//! Shared fixtures for engine integration tests.
//!
//! Every collaborator records into one shared [`Log`] so tests can assert on
//! what the engine asked the outside world to do.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use flashdeck_core::error::{MediaError, ServiceError};
use flashdeck_core::services::headless::SyntheticVideo;
use flashdeck_core::services::{
    AudioChannel, AudioDucker, AudioExtractor, AudioOut, Executor, HostWindow, Job, ProgressSink,
    SurfaceFactory, VideoBackend,
};
use flashdeck_core::video::VideoMeta;
use flashdeck_core::{Engine, Event, Services, Settings, StaticLibrary, SurfaceHandle, SurfaceRequest};

pub const SEED: u64 = 42;

#[derive(Debug, Default)]
pub struct Log {
    pub live: BTreeMap<SurfaceHandle, SurfaceRequest>,
    pub created: Vec<SurfaceRequest>,
    pub next_handle: u64,
    pub ducked: bool,
    pub duck_calls: u32,
    pub played: Vec<(PathBuf, AudioChannel)>,
    pub host_hidden: bool,
    pub progress_calls: u32,
    pub opened: Vec<PathBuf>,
    pub video_open: bool,
}

impl Log {
    pub fn live_of(&self, pred: impl Fn(&SurfaceRequest) -> bool) -> Vec<SurfaceHandle> {
        self.live
            .iter()
            .filter(|(_, req)| pred(req))
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn live_flashes(&self) -> Vec<SurfaceHandle> {
        self.live_of(|r| matches!(r, SurfaceRequest::FlashImage { .. }))
    }

    pub fn live_bubbles(&self) -> Vec<SurfaceHandle> {
        self.live_of(|r| matches!(r, SurfaceRequest::Bubble))
    }

    pub fn live_targets(&self) -> Vec<u64> {
        self.live
            .values()
            .filter_map(|r| match r {
                SurfaceRequest::AttentionTarget { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }
}

pub type Shared = Rc<RefCell<Log>>;

struct Surfaces(Shared);

impl SurfaceFactory for Surfaces {
    fn create(&mut self, request: SurfaceRequest) -> Result<SurfaceHandle, ServiceError> {
        let mut log = self.0.borrow_mut();
        log.next_handle += 1;
        let handle = SurfaceHandle(log.next_handle);
        log.created.push(request.clone());
        log.live.insert(handle, request);
        Ok(handle)
    }

    fn destroy(&mut self, handle: SurfaceHandle) -> Result<(), ServiceError> {
        self.0.borrow_mut().live.remove(&handle);
        Ok(())
    }

    fn set_opacity(&mut self, _handle: SurfaceHandle, _opacity: f64) -> Result<(), ServiceError> {
        Ok(())
    }
}

struct Ducker(Shared);

impl AudioDucker for Ducker {
    fn duck(&mut self, _strength: u32) -> Result<(), ServiceError> {
        let mut log = self.0.borrow_mut();
        log.ducked = true;
        log.duck_calls += 1;
        Ok(())
    }

    fn unduck(&mut self) -> Result<(), ServiceError> {
        self.0.borrow_mut().ducked = false;
        Ok(())
    }
}

struct Audio(Shared);

impl AudioOut for Audio {
    fn play(
        &mut self,
        path: &Path,
        channel: AudioChannel,
        _volume: f64,
    ) -> Result<StdDuration, ServiceError> {
        self.0.borrow_mut().played.push((path.to_path_buf(), channel));
        Ok(StdDuration::from_secs(2))
    }

    fn stop_all(&mut self) {}
}

struct Host(Shared);

impl HostWindow for Host {
    fn hide(&mut self) -> Result<(), ServiceError> {
        self.0.borrow_mut().host_hidden = true;
        Ok(())
    }

    fn restore(&mut self) -> Result<(), ServiceError> {
        self.0.borrow_mut().host_hidden = false;
        Ok(())
    }
}

struct Video {
    log: Shared,
    inner: SyntheticVideo,
}

impl VideoBackend for Video {
    fn open(&mut self, path: &Path) -> Result<VideoMeta, MediaError> {
        let mut log = self.log.borrow_mut();
        log.opened.push(path.to_path_buf());
        log.video_open = true;
        self.inner.open(path)
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn seek(&mut self, frame: u64) -> Result<(), MediaError> {
        self.inner.seek(frame)
    }

    fn grab(&mut self, n: u64) -> Result<(), MediaError> {
        self.inner.grab(n)
    }

    fn present(&mut self) -> Result<bool, MediaError> {
        self.inner.present()
    }

    fn close(&mut self) {
        self.log.borrow_mut().video_open = false;
        self.inner.close();
    }
}

/// Extraction always succeeds with a sibling `.wav`.
struct Extractor;

impl AudioExtractor for Extractor {
    fn extract(&self, video: &Path) -> Result<PathBuf, MediaError> {
        Ok(video.with_extension("wav"))
    }
}

struct Progress(Shared);

impl ProgressSink for Progress {
    fn on_progress(&mut self, _level: u32, _fraction: f64, _xp: f64, _xp_needed: f64) {
        self.0.borrow_mut().progress_calls += 1;
    }
}

/// Runs jobs inline.
struct Inline;

impl Executor for Inline {
    fn spawn(&self, job: Job) {
        job();
    }
}

/// Holds jobs until the test releases them.
#[derive(Clone, Default)]
pub struct HeldJobs(Arc<Mutex<Vec<Job>>>);

impl HeldJobs {
    pub fn run_all(&self) -> usize {
        let jobs: Vec<Job> = std::mem::take(&mut *self.0.lock().unwrap());
        let n = jobs.len();
        for job in jobs {
            job();
        }
        n
    }
}

impl Executor for HeldJobs {
    fn spawn(&self, job: Job) {
        self.0.lock().unwrap().push(job);
    }
}

pub fn library() -> StaticLibrary {
    StaticLibrary::sample()
}

pub fn services(media: StaticLibrary, video_secs: f64) -> (Services, Shared) {
    let log: Shared = Rc::default();
    let services = Services {
        media: Box::new(media),
        ducker: Box::new(Ducker(log.clone())),
        audio: Box::new(Audio(log.clone())),
        surfaces: Box::new(Surfaces(log.clone())),
        host: Box::new(Host(log.clone())),
        video: Box::new(Video {
            log: log.clone(),
            inner: SyntheticVideo::new(30.0, video_secs),
        }),
        extractor: Arc::new(Extractor),
        progress: Box::new(Progress(log.clone())),
        executor: Box::new(Inline),
    };
    (services, log)
}

pub fn engine(settings: Settings) -> (Engine, Shared) {
    let (services, log) = services(library(), 10.0);
    (Engine::new(settings, services, Some(SEED)), log)
}

/// Settings with every recurring effect off, for tests that trigger by hand.
pub fn quiet_settings() -> Settings {
    let mut s = Settings::default();
    s.flash.enabled = false;
    s.startle.enabled = false;
    s.subliminal.enabled = false;
    s.bubbles.enabled = false;
    s
}

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-04T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Virtual clock that ticks the engine in fixed steps.
pub struct Clock {
    pub now: DateTime<Utc>,
    pub step: Duration,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            now: t0(),
            step: Duration::milliseconds(50),
        }
    }

    /// Advance by `secs`, ticking every step and calling `each` after every
    /// tick.
    pub fn run_with(
        &mut self,
        engine: &mut Engine,
        secs: f64,
        mut each: impl FnMut(&mut Engine, DateTime<Utc>),
    ) {
        let end = self.now + Duration::milliseconds((secs * 1000.0) as i64);
        while self.now < end {
            self.now = std::cmp::min(self.now + self.step, end);
            engine.tick(self.now);
            each(engine, self.now);
        }
    }

    pub fn run(&mut self, engine: &mut Engine, secs: f64) {
        self.run_with(engine, secs, |_, _| {});
    }
}

pub fn count(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}
