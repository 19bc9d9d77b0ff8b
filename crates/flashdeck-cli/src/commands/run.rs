//! Real-time headless session with the panic and time-window watchers.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::Args;
use flashdeck_core::error::ServiceError;
use flashdeck_core::services::extract::FfmpegExtractor;
use flashdeck_core::services::{HotkeySource, ThreadExecutor};
use flashdeck_core::{Engine, PanicWatcher, Services, TimeWindowWatcher};
use tracing::info;

use super::{load_settings, media_library, CliResult};

#[derive(Args)]
pub struct RunArgs {
    /// Settings file (defaults to the user settings)
    #[arg(long)]
    pub settings: Option<PathBuf>,
    /// Media directory with images/, sounds/, startle_videos/ and sub_audio/
    #[arg(long)]
    pub media: Option<PathBuf>,
    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<f64>,
    /// Tick interval in milliseconds
    #[arg(long, default_value = "15")]
    pub tick_ms: u64,
    /// ffmpeg binary used to extract startle audio
    #[arg(long)]
    pub ffmpeg: Option<PathBuf>,
    /// Creating this file acts as the panic hotkey
    #[arg(long)]
    pub panic_file: Option<PathBuf>,
    /// Stay stopped until the time window opens
    #[arg(long)]
    pub wait_for_window: bool,
    /// Print events as JSON lines
    #[arg(long)]
    pub events: bool,
}

/// Hotkey that fires when a trigger file appears, consuming it.
struct FileHotkey(PathBuf);

impl HotkeySource for FileHotkey {
    fn is_pressed(&mut self) -> Result<bool, ServiceError> {
        if !self.0.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&self.0)
            .map_err(|e| ServiceError::new("panic file", e.to_string()))?;
        Ok(true)
    }
}

pub fn run(args: RunArgs) -> CliResult {
    if let Some(d) = args.duration {
        if !d.is_finite() || d <= 0.0 {
            return Err(format!("duration must be positive, got {d}").into());
        }
    }
    let settings = load_settings(args.settings.as_ref())?;
    let window_enabled = settings.time_window.enabled;

    let mut services = Services::headless(media_library(args.media));
    services.executor = Box::new(ThreadExecutor);
    if let Some(ffmpeg) = args.ffmpeg {
        services.extractor = Arc::new(FfmpegExtractor::new(ffmpeg, std::env::temp_dir()));
    }
    let mut engine = Engine::new(settings, services, None);
    let tx = engine.command_sender();

    let mut watchers = Vec::new();
    if let Some(path) = args.panic_file {
        watchers.push(PanicWatcher::default().spawn(Box::new(FileHotkey(path)), tx.clone())?);
    }
    if window_enabled {
        watchers.push(TimeWindowWatcher::default().spawn(tx.clone())?);
    }

    let started = Utc::now();
    if !args.wait_for_window {
        engine.start(started);
    }
    let deadline = args
        .duration
        .map(|d| started + chrono::Duration::milliseconds((d * 1000.0) as i64));
    let interval = std::time::Duration::from_millis(args.tick_ms.max(1));

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    loop {
        let now = Utc::now();
        engine.tick(now);
        for event in engine.drain_events() {
            if args.events {
                writeln!(out, "{}", serde_json::to_string(&event)?)?;
            }
        }
        if deadline.is_some_and(|d| now >= d) {
            break;
        }
        std::thread::sleep(interval);
    }

    let now = Utc::now();
    engine.stop(now);
    for event in engine.drain_events() {
        if args.events {
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
        }
    }
    for watcher in watchers {
        info!(watcher = watcher.name(), "stopping watcher");
        watcher.stop();
    }
    Ok(())
}
