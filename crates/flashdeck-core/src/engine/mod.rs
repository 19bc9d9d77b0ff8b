//! The engine loop.
//!
//! `Engine` owns every component and runs them on one thread. It does not
//! spawn a loop of its own: the caller invokes [`Engine::tick`] periodically
//! with the current time, and everything else (timers, watcher commands,
//! worker results) is applied from inside `tick`.
//!
//! ## Tick
//!
//! ```text
//! drain commands -> heartbeat (ramp, passive XP, overlays) -> due timers
//! ```
//!
//! Timers run with their own fire time as "now", so a coarse caller clock
//! (such as the simulation's virtual clock) sees the same ordering as a
//! fine one.

mod effects;
mod video;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand_pcg::Mcg128Xsl64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use self::effects::FlashState;
use crate::arbiter::{ArbiterLimits, ResourceArbiter, ResourceCounters};
use crate::command::{self, Command, CommandReceiver, CommandSender};
use crate::effects::EventType;
use crate::events::{DenyReason, Event};
use crate::media::MediaQueue;
use crate::overlays::{
    spiral_opacity, tint_opacity, OverlayManager, SPIRAL_XP_MIN_OPACITY, TINT_XP_MIN_OPACITY,
};
use crate::progression::{
    intensity_progress, ramp_remaining_secs, Feature, PlayerProgress, ProgressionEngine,
    XpContext,
};
use crate::scheduler::{next_delay, Scheduler, SessionState, Task};
use crate::services::{Services, SurfaceHandle};
use crate::storage::Settings;
use crate::video::{VideoPhase, VideoSequencer, VideoSession};
use crate::watchers::{window_decision, WindowDecision};

/// Passive XP: one point per this many seconds of running session.
const PASSIVE_XP_SECS: f64 = 12.0;
/// XP per second while an overlay is visible (about 5 per minute).
const OVERLAY_XP_PER_SEC: f64 = 0.083;
const INTENSITY_EVENT_SECS: i64 = 10;

const LAUNCH_STARTLE_DELAY_SECS: i64 = 5;
const LAUNCH_LOOPS_DELAY_SECS: i64 = 20;

/// Undrained events kept before the oldest are dropped.
pub const MAX_OUTBOX_EVENTS: usize = 10_000;

/// Point-in-time view of the engine, serializable for the CLI and hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub session: SessionState,
    pub counters: ResourceCounters,
    pub progress: PlayerProgress,
    pub xp_needed: f64,
    pub video_phase: VideoPhase,
    pub video: Option<VideoSession>,
    pub pending: BTreeMap<EventType, DateTime<Utc>>,
    pub deferred: Vec<EventType>,
    pub busy: bool,
    pub spiral_visible: bool,
    pub tint_visible: bool,
}

#[derive(Debug, Default)]
struct Heartbeat {
    last: Option<DateTime<Utc>>,
    passive_secs: f64,
    overlay_xp: f64,
    last_intensity_event: Option<DateTime<Utc>>,
}

pub struct Engine {
    settings: Settings,
    scheduler: Scheduler,
    arbiter: ResourceArbiter,
    progression: ProgressionEngine,
    video: VideoSequencer,
    overlays: OverlayManager,
    media: MediaQueue,
    services: Services,
    rng: Mcg128Xsl64,
    tx: CommandSender,
    rx: CommandReceiver,
    events: VecDeque<Event>,
    /// Events dropped since the last drain.
    dropped_events: u64,
    /// A startle is being handled, from its firing until the video returns
    /// to idle. Also held between `start` and the launch startle.
    busy: bool,
    deferred: BTreeSet<EventType>,
    flash: FlashState,
    subliminals: Vec<SurfaceHandle>,
    bubbles: BTreeSet<SurfaceHandle>,
    targets: BTreeMap<u64, SurfaceHandle>,
    banner: Option<SurfaceHandle>,
    heartbeat: Heartbeat,
}

impl Engine {
    /// Build an engine. `seed` makes every random draw reproducible.
    pub fn new(settings: Settings, services: Services, seed: Option<u64>) -> Self {
        let settings = settings.clamped();
        let rng = match seed {
            Some(seed) => Mcg128Xsl64::seed_from_u64(seed),
            None => Mcg128Xsl64::from_entropy(),
        };
        let (tx, rx) = command::channel();
        Self {
            arbiter: ResourceArbiter::new(ArbiterLimits::from(&settings.limits)),
            progression: ProgressionEngine::from_settings(&settings.player),
            settings,
            scheduler: Scheduler::new(),
            video: VideoSequencer::new(),
            overlays: OverlayManager::new(),
            media: MediaQueue::new(),
            services,
            rng,
            tx,
            rx,
            events: VecDeque::new(),
            dropped_events: 0,
            busy: false,
            deferred: BTreeSet::new(),
            flash: FlashState::default(),
            subliminals: Vec::new(),
            bubbles: BTreeSet::new(),
            targets: BTreeMap::new(),
            banner: None,
            heartbeat: Heartbeat::default(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn progress(&self) -> &PlayerProgress {
        self.progression.progress()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn video_phase(&self) -> VideoPhase {
        self.video.phase()
    }

    pub fn counters(&self) -> &ResourceCounters {
        self.arbiter.counters()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Sender for watchers and other threads.
    pub fn command_sender(&self) -> CommandSender {
        self.tx.clone()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            session: self.scheduler.session().clone(),
            counters: self.arbiter.counters().clone(),
            progress: self.progression.progress().clone(),
            xp_needed: self.progression.xp_needed(),
            video_phase: self.video.phase(),
            video: self.video.session().cloned(),
            pending: self.scheduler.pending_all(),
            deferred: self.deferred.iter().copied().collect(),
            busy: self.busy,
            spiral_visible: self.overlays.spiral_visible(),
            tint_visible: self.overlays.tint_visible(),
        }
    }

    /// Push a [`Event::StateSnapshot`] to the outbox.
    pub fn emit_snapshot(&mut self, now: DateTime<Utc>) {
        let snapshot = self.snapshot();
        self.push(Event::StateSnapshot { snapshot, at: now });
    }

    /// Take everything in the outbox, oldest first.
    ///
    /// Hosts should drain regularly: past [`MAX_OUTBOX_EVENTS`] the oldest
    /// events are dropped.
    pub fn drain_events(&mut self) -> Vec<Event> {
        if self.dropped_events > 0 {
            debug!(dropped = self.dropped_events, "outbox overflowed since last drain");
            self.dropped_events = 0;
        }
        self.events.drain(..).collect()
    }

    // ── Session control ──────────────────────────────────────────────

    pub fn start(&mut self, now: DateTime<Utc>) {
        if self.scheduler.is_running() {
            debug!("start ignored, session already running");
            return;
        }
        let token = self.scheduler.begin_session(now);
        self.heartbeat = Heartbeat {
            last: Some(now),
            ..Heartbeat::default()
        };
        for feature in self.progression.check_unlocks() {
            self.push(Event::FeatureUnlocked { feature, at: now });
        }
        info!(token, "session started");
        self.push(Event::EngineStarted { token, at: now });

        if self.settings.startle.force_on_launch {
            self.busy = true;
            self.scheduler.after(
                Duration::seconds(LAUNCH_STARTLE_DELAY_SECS),
                now,
                Task::StartupStartle,
            );
            self.scheduler
                .after(Duration::seconds(LAUNCH_LOOPS_DELAY_SECS), now, Task::StartLoops);
        } else {
            self.arm_all(now);
        }
    }

    pub fn stop(&mut self, now: DateTime<Utc>) {
        if !self.scheduler.is_running() && self.video.is_idle() {
            debug!("stop ignored, nothing running");
            return;
        }
        self.teardown();
        info!("session stopped");
        self.push(Event::EngineStopped { at: now });
    }

    /// Hard reset of all engine state. Safe at any time, idempotent.
    pub fn panic_stop(&mut self, now: DateTime<Utc>) {
        self.teardown();
        warn!("panic stop");
        self.push(Event::PanicStop { at: now });
    }

    /// Replace settings. Timers are re-armed only when timing changed.
    ///
    /// Level and XP come from the engine, unless `settings.player` was
    /// edited, in which case the edit wins.
    pub fn update_settings(&mut self, settings: Settings, now: DateTime<Utc>) {
        let settings = settings.clamped();
        if settings.player != self.settings.player {
            self.progression
                .set_progress(settings.player.level, settings.player.xp);
            info!(level = settings.player.level, "player progress overwritten");
        }
        let reschedule = settings.needs_reschedule(&self.settings);
        self.arbiter.set_limits(ArbiterLimits::from(&settings.limits));
        self.settings = settings;
        self.sync_player();

        if reschedule && self.scheduler.is_running() {
            let token = self.scheduler.reschedule();
            info!(token, "timing settings changed, rescheduling");
            self.push(Event::Rescheduled { token, at: now });
            self.arm_all(now);
        }
    }

    /// Fire `event` now, outside its schedule. `strict` forces the strict
    /// lock for a startle. Returns false when no session is running.
    pub fn trigger_event(&mut self, event: EventType, strict: bool, now: DateTime<Utc>) -> bool {
        if !self.scheduler.is_running() {
            debug!(event = %event, "trigger ignored, session not running");
            return false;
        }
        info!(event = %event, strict, "manual trigger");
        self.fire(event, strict, now);
        true
    }

    // ── Loop ─────────────────────────────────────────────────────────

    pub fn tick(&mut self, now: DateTime<Utc>) {
        self.drain_commands(now);
        self.run_heartbeat(now);
        while let Some((at, task)) = self.scheduler.pop_due(now) {
            self.run_task(task, at);
            self.drain_commands(at);
        }
    }

    fn drain_commands(&mut self, now: DateTime<Utc>) {
        while let Ok(cmd) = self.rx.try_recv() {
            self.apply_command(cmd, now);
        }
    }

    fn apply_command(&mut self, cmd: Command, now: DateTime<Utc>) {
        match cmd {
            Command::Start => self.start(now),
            Command::Stop => self.stop(now),
            Command::Panic => {
                if self.settings.safety.disable_panic {
                    debug!("panic ignored, disabled in settings");
                } else if !self.video.is_idle() && self.video.is_strict() {
                    debug!("panic ignored, strict video running");
                } else {
                    self.panic_stop(now);
                }
            }
            Command::ClockCheck(local) => {
                match window_decision(local, &self.settings.time_window, self.is_running()) {
                    Some(WindowDecision::Start) => {
                        info!("time window opened");
                        self.start(now);
                    }
                    Some(WindowDecision::Stop) => {
                        info!("time window closed");
                        self.stop(now);
                    }
                    None => {}
                }
            }
            Command::Trigger { event, strict } => {
                self.trigger_event(event, strict, now);
            }
            Command::AudioReady {
                epoch,
                video,
                audio,
            } => self.on_audio_ready(epoch, video, audio, now),
        }
    }

    fn run_task(&mut self, task: Task, now: DateTime<Utc>) {
        match task {
            Task::Fire(event) => self.fire(event, false, now),
            Task::StartLoops => {
                debug!("launch hold over, arming loops");
                self.arm_all(now);
            }
            Task::StartupStartle => {
                self.busy = false;
                self.fire_startle(true, now);
            }
            Task::FlashRetry => self.flash_retry(now),
            Task::FlashSpawn { cycle, path } => self.flash_spawn(cycle, path, now),
            Task::FlashCleanup { cycle } => self.flash_cleanup(cycle, now),
            Task::HydraResume => self.flash.cleanup_in_progress = false,
            Task::Unduck => {
                if self.video.is_idle() {
                    self.unduck();
                }
            }
            Task::SubliminalShow { text } => self.show_subliminal(text, now),
            Task::DestroySurface(handle) => {
                self.subliminals.retain(|h| *h != handle);
                self.destroy_surface(handle);
            }
            Task::BubbleExpired(handle) => {
                if self.bubble_resolved(handle, false, now) {
                    debug!(?handle, "bubble missed");
                }
            }
            Task::Video(input) => self.step_video(input, now),
        }
    }

    fn run_heartbeat(&mut self, now: DateTime<Utc>) {
        let running = self.scheduler.is_running();
        let dt = self
            .heartbeat
            .last
            .map(|last| (now - last).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        self.heartbeat.last = Some(now);

        let session_start = self.scheduler.session().session_start;
        let progress = intensity_progress(now, session_start, running, &self.settings);
        self.scheduler.set_intensity(progress);
        if !running {
            return;
        }

        if self.settings.ramp.enabled {
            let due = self
                .heartbeat
                .last_intensity_event
                .map_or(true, |t| now - t >= Duration::seconds(INTENSITY_EVENT_SECS));
            if due {
                self.heartbeat.last_intensity_event = Some(now);
                let multiplier = 1.0 + (self.settings.ramp.multiplier - 1.0) * progress;
                let remaining_secs = ramp_remaining_secs(now, session_start, &self.settings);
                self.push(Event::IntensityUpdated {
                    progress,
                    multiplier,
                    remaining_secs,
                    at: now,
                });
            }
        }

        self.heartbeat.passive_secs += dt;
        while self.heartbeat.passive_secs >= PASSIVE_XP_SECS {
            self.heartbeat.passive_secs -= PASSIVE_XP_SECS;
            self.award(1.0, XpContext::General, now);
        }

        self.overlays.update(
            now,
            &mut *self.services.surfaces,
            &mut self.arbiter,
            &self.settings,
            &self.progression,
            progress,
        );

        let mut rate = 0.0;
        if self.overlays.spiral_visible()
            && spiral_opacity(&self.settings, progress) >= SPIRAL_XP_MIN_OPACITY
        {
            rate += OVERLAY_XP_PER_SEC;
        }
        if self.overlays.tint_visible()
            && tint_opacity(&self.settings, progress) >= TINT_XP_MIN_OPACITY
        {
            rate += OVERLAY_XP_PER_SEC;
        }
        // Accrued in whole points to keep the outbox readable.
        self.heartbeat.overlay_xp += rate * dt;
        if self.heartbeat.overlay_xp >= 1.0 {
            let whole = self.heartbeat.overlay_xp.floor();
            self.heartbeat.overlay_xp -= whole;
            self.award(whole, XpContext::General, now);
        }
    }

    // ── Scheduling ───────────────────────────────────────────────────

    fn is_enabled(&self, event: EventType) -> bool {
        match event {
            EventType::Flash => self.settings.flash.enabled,
            EventType::Subliminal => self.settings.subliminal.enabled,
            EventType::Startle => self.settings.startle.enabled,
            EventType::Bubble => {
                self.settings.bubbles.enabled && self.progression.is_unlocked(Feature::Bubbles)
            }
        }
    }

    fn arm_all(&mut self, now: DateTime<Utc>) {
        for event in EventType::ALL {
            self.arm_next(event, now);
        }
    }

    /// Arm the next occurrence of `event`, replacing any pending one.
    fn arm_next(&mut self, event: EventType, now: DateTime<Utc>) {
        if !self.scheduler.is_running() {
            return;
        }
        if !self.is_enabled(event) {
            self.scheduler.disarm(event);
            return;
        }
        let progress = self.scheduler.session().intensity_progress;
        let overlay = self.arbiter.counters().overlay_active;
        let delay = next_delay(event, &self.settings, progress, overlay, &mut self.rng);
        let entry = self.scheduler.arm(event, delay, now);
        debug!(
            event = %event,
            delay_ms = delay.num_milliseconds(),
            token = entry.token_at_schedule,
            "armed"
        );
        self.push(Event::EffectArmed {
            event,
            delay_ms: delay.num_milliseconds().max(0) as u64,
            token: entry.token_at_schedule,
            at: now,
        });
    }

    fn fire(&mut self, event: EventType, strict: bool, now: DateTime<Utc>) {
        match event {
            EventType::Flash => self.fire_flash(now),
            EventType::Subliminal => self.fire_subliminal(now),
            EventType::Bubble => self.fire_bubble(now),
            EventType::Startle => self.fire_startle(strict, now),
        }
    }

    /// A video holds the screen from admission until it returns to idle.
    fn video_holds_screen(&self) -> bool {
        !self.video.is_idle() || self.arbiter.is_video_active()
    }

    fn defer(&mut self, event: EventType, now: DateTime<Utc>) {
        debug!(event = %event, "deferred until the video ends");
        self.deferred.insert(event);
        self.push(Event::EffectDeferred { event, at: now });
    }

    fn deny(&mut self, event: EventType, reason: DenyReason, now: DateTime<Utc>) {
        debug!(event = %event, ?reason, "denied");
        self.push(Event::EffectDenied { event, reason, at: now });
    }

    // ── Progress ─────────────────────────────────────────────────────

    fn award(&mut self, base: f64, ctx: XpContext, now: DateTime<Utc>) {
        let gain = self.progression.add_xp(base, ctx, &self.settings);
        if gain.amount <= 0.0 {
            return;
        }
        self.sync_player();
        self.push(Event::XpAwarded {
            amount: gain.amount,
            level: self.progression.level(),
            xp: self.progression.xp(),
            at: now,
        });
        if gain.leveled_up() {
            info!(from = gain.from_level, to = gain.to_level, "level up");
            self.push(Event::LevelUp {
                from: gain.from_level,
                to: gain.to_level,
                at: now,
            });
        }
        for feature in &gain.unlocked {
            info!(%feature, "feature unlocked");
            self.push(Event::FeatureUnlocked {
                feature: *feature,
                at: now,
            });
        }
        if gain.unlocked.contains(&Feature::Bubbles) {
            self.arm_next(EventType::Bubble, now);
        }
    }

    /// Mirror progress into settings and notify the host.
    fn sync_player(&mut self) {
        let p = &self.progression;
        self.settings.player.level = p.level();
        self.settings.player.xp = p.xp();
        self.services
            .progress
            .on_progress(p.level(), p.xp_fraction(), p.xp(), p.xp_needed());
    }

    // ── Cleanup ──────────────────────────────────────────────────────

    /// Tear everything down. Each step is independent, so a failing
    /// collaborator never blocks the rest.
    fn teardown(&mut self) {
        self.busy = false;
        self.services.audio.stop_all();
        self.unduck();

        self.destroy_flash_windows();
        self.flash = FlashState::default();
        for handle in std::mem::take(&mut self.bubbles) {
            self.destroy_surface(handle);
        }
        for handle in std::mem::take(&mut self.subliminals) {
            self.destroy_surface(handle);
        }
        for (_, handle) in std::mem::take(&mut self.targets) {
            self.destroy_surface(handle);
        }
        if let Some(handle) = self.banner.take() {
            self.destroy_surface(handle);
        }
        self.overlays
            .hide(&mut *self.services.surfaces, &mut self.arbiter);
        self.arbiter.reset();

        self.services.video.close();
        if self.video.host_hidden() {
            if let Err(err) = self.services.host.restore() {
                warn!(?err, "host window restore failed");
            }
        }
        self.video.reset();
        self.deferred.clear();
        self.scheduler.end_session();
        self.heartbeat = Heartbeat::default();
    }

    fn duck(&mut self) {
        if !self.settings.audio.ducking_enabled {
            return;
        }
        if let Err(err) = self.services.ducker.duck(self.settings.audio.ducking_strength) {
            warn!(?err, "audio ducking failed");
        }
    }

    fn unduck(&mut self) {
        if let Err(err) = self.services.ducker.unduck() {
            warn!(?err, "audio unducking failed");
        }
    }

    fn destroy_surface(&mut self, handle: SurfaceHandle) {
        if let Err(err) = self.services.surfaces.destroy(handle) {
            warn!(?err, ?handle, "surface teardown failed");
        }
    }

    fn push(&mut self, event: Event) {
        if self.events.len() >= MAX_OUTBOX_EVENTS {
            self.events.pop_front();
            if self.dropped_events == 0 {
                warn!(cap = MAX_OUTBOX_EVENTS, "outbox full, dropping oldest events");
            }
            self.dropped_events += 1;
        }
        self.events.push_back(event);
    }
}
