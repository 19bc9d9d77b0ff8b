//! Deterministic headless session on a virtual clock.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use clap::Args;
use flashdeck_core::services::headless::SyntheticVideo;
use flashdeck_core::{Command, Engine, Event, EventType, Services, Settings};

use super::{load_settings, media_library, CliResult};

/// A manual firing at a point in the session, written `event@seconds`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub event: EventType,
    pub at_secs: f64,
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (event, at) = s
            .split_once('@')
            .ok_or_else(|| format!("expected event@seconds, got '{s}'"))?;
        let event = event.parse::<EventType>()?;
        let at_secs = at
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| format!("invalid trigger time '{at}'"))?;
        Ok(Self { event, at_secs })
    }
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Session length in seconds of virtual time
    #[arg(long, default_value = "600")]
    pub duration: f64,
    /// Random seed
    #[arg(long, default_value = "1")]
    pub seed: u64,
    /// Tick interval in milliseconds
    #[arg(long, default_value = "50")]
    pub step_ms: u64,
    /// Settings file (defaults to the user settings)
    #[arg(long)]
    pub settings: Option<PathBuf>,
    /// Ignore stored settings and use the defaults
    #[arg(long, conflicts_with = "settings")]
    pub defaults: bool,
    /// Media directory with images/, sounds/, startle_videos/ and sub_audio/
    #[arg(long)]
    pub media: Option<PathBuf>,
    /// Length of the synthetic startle video in seconds
    #[arg(long, default_value = "30")]
    pub video_secs: f64,
    /// Fire an event by hand, e.g. "startle@30" (repeatable)
    #[arg(long = "trigger")]
    pub triggers: Vec<Trigger>,
    /// Press the panic hotkey at this second
    #[arg(long)]
    pub panic_at: Option<f64>,
    /// Print event counts instead of every event
    #[arg(long)]
    pub summary: bool,
}

fn event_name(event: &Event) -> String {
    serde_json::to_value(event)
        .ok()
        .and_then(|v| v["type"].as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

struct Output {
    summary: bool,
    counts: BTreeMap<String, usize>,
}

impl Output {
    fn emit(&mut self, events: Vec<Event>, out: &mut impl Write) -> CliResult {
        for event in events {
            if self.summary {
                *self.counts.entry(event_name(&event)).or_default() += 1;
            } else {
                writeln!(out, "{}", serde_json::to_string(&event)?)?;
            }
        }
        Ok(())
    }
}

pub fn run(args: SimulateArgs) -> CliResult {
    if !args.duration.is_finite() || args.duration <= 0.0 {
        return Err(format!("duration must be positive, got {}", args.duration).into());
    }
    if !args.video_secs.is_finite() || args.video_secs <= 0.0 {
        return Err(format!("video length must be positive, got {}", args.video_secs).into());
    }
    let settings = if args.defaults {
        Settings::default()
    } else {
        load_settings(args.settings.as_ref())?
    };

    let mut services = Services::headless(media_library(args.media));
    services.video = Box::new(SyntheticVideo::new(30.0, args.video_secs));
    let mut engine = Engine::new(settings, services, Some(args.seed));

    let mut triggers = args.triggers;
    triggers.sort_by(|a, b| a.at_secs.total_cmp(&b.at_secs));
    let mut triggers = triggers.into_iter().peekable();
    let mut panic_at = args.panic_at;

    let secs = |s: f64| Duration::milliseconds((s * 1000.0) as i64);
    let start: DateTime<Utc> = Utc::now();
    let end = start + secs(args.duration);
    let step = Duration::milliseconds(args.step_ms.max(1) as i64);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut output = Output {
        summary: args.summary,
        counts: BTreeMap::new(),
    };

    engine.start(start);
    let mut now = start;
    while now < end {
        now = std::cmp::min(now + step, end);
        while let Some(t) = triggers.next_if(|t| start + secs(t.at_secs) <= now) {
            engine.command_sender().send(Command::Trigger {
                event: t.event,
                strict: false,
            })?;
        }
        if panic_at.is_some_and(|at| start + secs(at) <= now) {
            panic_at = None;
            engine.command_sender().send(Command::Panic)?;
        }
        engine.tick(now);
        output.emit(engine.drain_events(), &mut out)?;
    }

    engine.emit_snapshot(end);
    engine.stop(end);
    output.emit(engine.drain_events(), &mut out)?;

    if output.summary {
        let json = serde_json::to_string_pretty(&output.counts)?;
        writeln!(out, "{json}")?;
    }
    Ok(())
}
