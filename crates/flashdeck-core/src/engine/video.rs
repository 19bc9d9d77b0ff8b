//! Carries out the actions returned by
//! [`VideoSequencer::step`](crate::video::VideoSequencer::step).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::Engine;
use crate::command::Command;
use crate::effects::{EffectKind, EventType};
use crate::error::MediaError;
use crate::events::Event;
use crate::progression::XpContext;
use crate::services::{AudioChannel, SurfaceRequest};
use crate::video::playback;
use crate::video::{StepCtx, VideoAction, VideoInput, MAX_PENALTY_LOOPS};

impl Engine {
    pub(super) fn step_video(&mut self, input: VideoInput, now: DateTime<Utc>) {
        let ctx = StepCtx {
            now,
            settings: &self.settings,
            running: self.scheduler.is_running(),
        };
        let actions = self.video.step(input, &ctx, &mut self.rng);
        for action in actions {
            self.apply_video_action(action, now);
        }
    }

    /// An attention target was clicked. Returns whether it counted.
    pub fn attention_hit(&mut self, id: u64, now: DateTime<Utc>) -> bool {
        let live = self.video.live_targets().contains(&id);
        self.step_video(VideoInput::TargetHit { id }, now);
        live
    }

    /// Result of a background extraction. Stale results (from a video that
    /// was released or a session that ended) are dropped.
    pub(super) fn on_audio_ready(
        &mut self,
        epoch: u64,
        video: PathBuf,
        audio: Result<PathBuf, MediaError>,
        now: DateTime<Utc>,
    ) {
        if epoch != self.scheduler.video_epoch() || self.video.preparing_path() != Some(&video) {
            debug!(video = %video.display(), "stale audio extraction result");
            return;
        }
        let audio = match audio {
            Ok(path) => Some(path),
            Err(err) => {
                debug!(%err, "playing video without audio");
                None
            }
        };
        let opened = self.services.video.open(&video);
        self.step_video(VideoInput::Ready { audio, opened }, now);
    }

    fn apply_video_action(&mut self, action: VideoAction, now: DateTime<Utc>) {
        match action {
            VideoAction::Phase { from, to } => {
                info!(?from, ?to, "video phase");
                self.push(Event::VideoPhaseChanged { from, to, at: now });
            }
            VideoAction::PrepareResources => self.prepare_resources(),
            VideoAction::ScheduleAfter { delay, input } => {
                self.scheduler.after_video(delay, now, input);
            }
            VideoAction::ExtractAudio { path } => self.extract_audio(path),
            VideoAction::HideHost => {
                if let Err(err) = self.services.host.hide() {
                    warn!(?err, "host window hide failed");
                }
            }
            VideoAction::RestoreHost => {
                if let Err(err) = self.services.host.restore() {
                    warn!(?err, "host window restore failed");
                }
            }
            VideoAction::StartVideo => {
                self.arbiter.register(EffectKind::Video, 1);
                self.duck();
            }
            VideoAction::AwardXp { base } => self.award(base, XpContext::Video, now),
            VideoAction::PlayAudio { path } => {
                let volume = self.effect_volume();
                if let Err(err) = self.services.audio.play(&path, AudioChannel::Video, volume) {
                    warn!(?err, "video audio failed");
                }
            }
            VideoAction::SpawnTarget { id, text } => {
                let request = SurfaceRequest::AttentionTarget {
                    id,
                    text,
                    size: self.settings.attention.size,
                };
                match self.services.surfaces.create(request) {
                    Ok(handle) => {
                        self.targets.insert(id, handle);
                    }
                    Err(err) => warn!(?err, id, "attention target window failed"),
                }
            }
            VideoAction::DestroyTarget { id } => {
                if let Some(handle) = self.targets.remove(&id) {
                    self.destroy_surface(handle);
                }
            }
            VideoAction::Present { frame } => {
                let ok = match playback::advance(&mut *self.services.video, frame) {
                    Ok(ok) => ok,
                    Err(err) => {
                        debug!(%err, frame, "frame read failed");
                        false
                    }
                };
                self.step_video(VideoInput::Presented { ok }, now);
            }
            VideoAction::ReleaseVideo => {
                self.services.video.close();
                self.services.audio.stop_all();
                for (_, handle) in std::mem::take(&mut self.targets) {
                    self.destroy_surface(handle);
                }
                self.unduck();
                self.scheduler.bump_video_epoch();
            }
            VideoAction::Verdict(v) => {
                info!(
                    total = v.total,
                    hit = v.hit,
                    passed = v.passed,
                    troll = v.troll,
                    "attention verdict"
                );
                self.push(Event::AttentionVerdict {
                    total: v.total,
                    hit: v.hit,
                    passed: v.passed,
                    troll: v.troll,
                    at: now,
                });
            }
            VideoAction::ShowBanner(banner) => {
                let penalty_loops = self
                    .video
                    .session()
                    .map_or(MAX_PENALTY_LOOPS, |s| s.penalty_loop_count);
                if let Some(old) = self.banner.take() {
                    self.destroy_surface(old);
                }
                match self.services.surfaces.create(SurfaceRequest::Banner { banner }) {
                    Ok(handle) => self.banner = Some(handle),
                    Err(err) => warn!(?err, "banner window failed"),
                }
                self.push(Event::BannerShown {
                    banner,
                    penalty_loops,
                    at: now,
                });
            }
            VideoAction::DestroyBanner => {
                if let Some(handle) = self.banner.take() {
                    self.destroy_surface(handle);
                }
            }
            VideoAction::EndVideo => {
                self.arbiter.register(EffectKind::Video, -1);
                self.busy = false;
            }
            VideoAction::Rearm => {
                self.arm_next(EventType::Startle, now);
                self.arm_next(EventType::Subliminal, now);
                for event in std::mem::take(&mut self.deferred) {
                    self.arm_next(event, now);
                }
            }
        }
    }

    /// Free the screen for a video: block admissions first, then tear down
    /// flashes, bubbles, subliminals and overlays.
    fn prepare_resources(&mut self) {
        self.arbiter.prepare_for_video();
        if self.flash.active || self.flash.waiting {
            self.deferred.insert(EventType::Flash);
        }
        self.destroy_flash_windows();
        self.flash.active = false;
        self.flash.waiting = false;
        self.flash.cycle += 1;
        for handle in std::mem::take(&mut self.bubbles) {
            self.destroy_surface(handle);
        }
        for handle in std::mem::take(&mut self.subliminals) {
            self.destroy_surface(handle);
        }
        self.overlays
            .hide(&mut *self.services.surfaces, &mut self.arbiter);
        self.arbiter.release_effects();
    }

    fn extract_audio(&mut self, path: PathBuf) {
        let epoch = self.scheduler.video_epoch();
        let tx = self.tx.clone();
        let extractor = Arc::clone(&self.services.extractor);
        self.services.executor.spawn(Box::new(move || {
            let audio = extractor.extract(&path);
            let cmd = Command::AudioReady {
                epoch,
                video: path,
                audio,
            };
            if tx.send(cmd).is_err() {
                debug!("engine gone before audio extraction finished");
            }
        }));
    }
}
