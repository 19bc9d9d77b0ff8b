//! Firing handlers for flashes, subliminals, bubbles and the startle.
//!
//! Every handler follows the same shape: bail out (deferring) while a video
//! holds the screen, ask the arbiter, do the work through the collaborators,
//! and re-arm. A handler never fails: missing media or a refused admission
//! is reported as an `EffectDenied` event and the schedule keeps going.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use super::Engine;
use crate::effects::{EffectKind, EventType, MediaCategory};
use crate::events::{DenyReason, Event};
use crate::media::MediaQueue;
use crate::progression::{effective_value, volume_curve, EffectiveKey, XpContext};
use crate::scheduler::Task;
use crate::services::{AudioChannel, SurfaceHandle, SurfaceRequest};
use crate::storage::limits::MAX_IMAGES_ON_SCREEN;
use crate::video::VideoInput;

/// Delay between the images of one flash.
const FLASH_STAGGER_MS: i64 = 500;
/// Flash length when no sound plays.
const FLASH_DEFAULT_SECS: i64 = 5;
const FLASH_CLEANUP_SLACK_MS: i64 = 1_000;
const FLASH_UNDUCK_SLACK_MS: i64 = 1_500;
const FLASH_RETRY_MS: i64 = 500;
const FLASH_POLL_MS: i64 = 300;
/// No hydra spawns for this long after a flash is cleaned up.
const HYDRA_COOLDOWN_SECS: i64 = 2;
const HYDRA_SPAWN: u32 = 2;
const SPIRAL_IMAGE_CAP: u32 = 3;
const SPIRAL_HYDRA_LIMIT: u32 = 8;

/// Bubbles rise at different speeds, so a miss lands anywhere in this share
/// of the configured lifespan.
const BUBBLE_LIFE_MIN: f64 = 0.7;
const BUBBLE_LIFE_MAX: f64 = 1.3;

const SUBLIMINAL_TEXT_DELAY_MS: i64 = 300;
const SUBLIMINAL_UNDUCK_SLACK_MS: i64 = 500;
const FRAME_MS: f64 = 16.6;
const SUBLIMINAL_MIN_MS: f64 = 100.0;

mod xp {
    pub const FLASH_SOUND: f64 = 2.0;
    pub const FLASH_IMAGE: f64 = 1.0;
    pub const SUBLIMINAL_AUDIO: f64 = 1.0;
    pub const SUBLIMINAL_TEXT: f64 = 1.0;
    pub const BUBBLE_POP: f64 = 10.0;
}

/// The flash in flight, if any.
#[derive(Debug, Default)]
pub(super) struct FlashState {
    pub(super) surfaces: BTreeSet<SurfaceHandle>,
    /// Bumped per flash; stale spawn and cleanup tasks compare against it.
    pub(super) cycle: u64,
    pub(super) active: bool,
    /// Polling for bubbles to clear.
    pub(super) waiting: bool,
    pub(super) cleanup_in_progress: bool,
    /// Hydra limit for the current flash.
    pub(super) limit: u32,
}

impl Engine {
    // ── Flash ────────────────────────────────────────────────────────

    pub(super) fn fire_flash(&mut self, now: DateTime<Utc>) {
        if self.video_holds_screen() {
            self.defer(EventType::Flash, now);
            return;
        }
        if self.flash.active || self.flash.waiting {
            self.deny(EventType::Flash, DenyReason::Busy, now);
            self.arm_next(EventType::Flash, now);
            return;
        }
        if !self.arbiter.request_flash() {
            self.flash.waiting = true;
            self.deny(EventType::Flash, DenyReason::Waiting, now);
            self.scheduler
                .after(Duration::milliseconds(FLASH_RETRY_MS), now, Task::FlashRetry);
            return;
        }
        self.start_flash(now);
    }

    pub(super) fn flash_retry(&mut self, now: DateTime<Utc>) {
        if !self.flash.waiting {
            return;
        }
        if self.video_holds_screen() {
            self.flash.waiting = false;
            self.arbiter.flash_done_waiting();
            self.defer(EventType::Flash, now);
            return;
        }
        if self.arbiter.has_active_bubbles() {
            self.scheduler
                .after(Duration::milliseconds(FLASH_POLL_MS), now, Task::FlashRetry);
            return;
        }
        self.flash.waiting = false;
        self.arbiter.flash_done_waiting();
        self.start_flash(now);
    }

    fn start_flash(&mut self, now: DateTime<Utc>) {
        if !self.arbiter.can_start(EffectKind::Flash, now) {
            self.deny(EventType::Flash, DenyReason::Arbiter, now);
            self.arm_next(EventType::Flash, now);
            return;
        }

        let settings = &self.settings.flash;
        let mut limit = settings.hydra_limit.min(MAX_IMAGES_ON_SCREEN).max(1);
        let wanted = settings.images_per_flash as i64 + self.rng.gen_range(-1..=1);
        let mut count = (wanted.max(1) as u32).min(limit);
        if self.overlays.spiral_visible() {
            count = count.min(SPIRAL_IMAGE_CAP);
            limit = limit.min(SPIRAL_HYDRA_LIMIT);
        }

        let images: Vec<PathBuf> = (0..count)
            .filter_map(|_| {
                self.media.next(
                    &*self.services.media,
                    MediaCategory::FlashImage,
                    &mut self.rng,
                )
            })
            .collect();
        if images.is_empty() {
            self.deny(EventType::Flash, DenyReason::NoMedia, now);
            self.arm_next(EventType::Flash, now);
            return;
        }

        self.flash.cycle += 1;
        self.flash.active = true;
        self.flash.limit = limit;
        let cycle = self.flash.cycle;
        debug!(images = images.len(), cycle, "flash");
        self.push(Event::EffectFired {
            event: EventType::Flash,
            at: now,
        });

        let mut length = Duration::seconds(FLASH_DEFAULT_SECS);
        let mut ducked = false;
        let sound = MediaQueue::pick(
            &*self.services.media,
            MediaCategory::FlashSound,
            &mut self.rng,
        );
        if let Some(sound) = sound {
            self.duck();
            ducked = true;
            let volume = self.effect_volume();
            match self.services.audio.play(&sound, AudioChannel::Effect, volume) {
                Ok(len) => {
                    length = Duration::from_std(len).unwrap_or(length);
                    self.award(xp::FLASH_SOUND, XpContext::General, now);
                }
                Err(err) => warn!(?err, "flash sound failed"),
            }
        }

        for (i, path) in images.into_iter().enumerate() {
            let delay = Duration::milliseconds(i as i64 * FLASH_STAGGER_MS);
            self.scheduler
                .after(delay, now, Task::FlashSpawn { cycle, path });
        }
        self.scheduler.after(
            length + Duration::milliseconds(FLASH_CLEANUP_SLACK_MS),
            now,
            Task::FlashCleanup { cycle },
        );
        if ducked {
            self.scheduler.after(
                length + Duration::milliseconds(FLASH_UNDUCK_SLACK_MS),
                now,
                Task::Unduck,
            );
        }
    }

    pub(super) fn flash_spawn(&mut self, cycle: u64, path: PathBuf, now: DateTime<Utc>) {
        if cycle != self.flash.cycle || !self.flash.active || self.video_holds_screen() {
            return;
        }
        self.spawn_flash_image(path, now);
    }

    fn spawn_flash_image(&mut self, path: PathBuf, now: DateTime<Utc>) -> bool {
        let on_screen = self.arbiter.counters().active_flashes;
        if on_screen >= self.arbiter.limits().max_flashes
            || self.flash.surfaces.len() as u32 >= self.flash.limit
        {
            debug!(on_screen, "flash image cap reached");
            return false;
        }
        if !self.arbiter.register(EffectKind::Flash, 1) {
            return false;
        }

        let progress = self.scheduler.session().intensity_progress;
        let flash = &self.settings.flash;
        let request = SurfaceRequest::FlashImage {
            path,
            alpha: effective_value(
                EffectiveKey::ImageAlpha,
                flash.image_alpha,
                progress,
                &self.settings,
            ),
            scale: flash.image_scale,
            clickable: flash.clickable,
        };
        match self.services.surfaces.create(request) {
            Ok(handle) => {
                self.flash.surfaces.insert(handle);
                self.award(xp::FLASH_IMAGE, XpContext::General, now);
                true
            }
            Err(err) => {
                warn!(?err, "flash image window failed");
                self.arbiter.register(EffectKind::Flash, -1);
                false
            }
        }
    }

    pub(super) fn flash_cleanup(&mut self, cycle: u64, now: DateTime<Utc>) {
        if cycle != self.flash.cycle || !self.flash.active {
            return;
        }
        self.destroy_flash_windows();
        self.flash.active = false;
        self.flash.cleanup_in_progress = true;
        self.scheduler.after(
            Duration::seconds(HYDRA_COOLDOWN_SECS),
            now,
            Task::HydraResume,
        );
        self.arm_next(EventType::Flash, now);
    }

    pub(super) fn destroy_flash_windows(&mut self) {
        let handles = std::mem::take(&mut self.flash.surfaces);
        let count = handles.len() as i32;
        for handle in handles {
            self.destroy_surface(handle);
        }
        self.arbiter.register(EffectKind::Flash, -count);
    }

    /// A flash image was clicked. With corruption on, it grows back.
    ///
    /// Returns false for unknown handles or when images are not clickable.
    pub fn flash_clicked(&mut self, handle: SurfaceHandle, now: DateTime<Utc>) -> bool {
        if !self.settings.flash.clickable || !self.flash.surfaces.remove(&handle) {
            return false;
        }
        self.destroy_surface(handle);
        self.arbiter.register(EffectKind::Flash, -1);

        let hydra = self.settings.flash.corruption
            && self.flash.active
            && !self.flash.cleanup_in_progress
            && !self.video_holds_screen();
        if hydra {
            let current = self.flash.surfaces.len() as u32;
            let limit = self.flash.limit;
            if current + 1 < limit {
                for _ in 0..HYDRA_SPAWN.min(limit - current) {
                    let next = self.media.next(
                        &*self.services.media,
                        MediaCategory::FlashImage,
                        &mut self.rng,
                    );
                    let Some(path) = next else { break };
                    self.spawn_flash_image(path, now);
                }
            }
        }
        true
    }

    pub(super) fn effect_volume(&self) -> f64 {
        let progress = self.scheduler.session().intensity_progress;
        volume_curve(effective_value(
            EffectiveKey::Volume,
            self.settings.audio.volume,
            progress,
            &self.settings,
        ))
    }

    // ── Subliminal ───────────────────────────────────────────────────

    pub(super) fn fire_subliminal(&mut self, now: DateTime<Utc>) {
        if self.video_holds_screen() {
            self.defer(EventType::Subliminal, now);
            return;
        }
        self.arm_next(EventType::Subliminal, now);

        let chosen = {
            let texts = self.settings.subliminal.active_texts();
            texts.choose(&mut self.rng).map(|t| t.to_string())
        };
        let Some(text) = chosen else {
            self.deny(EventType::Subliminal, DenyReason::NoMedia, now);
            return;
        };
        self.push(Event::EffectFired {
            event: EventType::Subliminal,
            at: now,
        });

        if self.settings.subliminal.audio_enabled {
            if let Some(audio) = self.services.media.linked_audio(&text) {
                let volume = volume_curve(self.settings.subliminal.audio_volume);
                self.duck();
                match self
                    .services
                    .audio
                    .play(&audio, AudioChannel::Subliminal, volume)
                {
                    Ok(len) => {
                        self.award(xp::SUBLIMINAL_AUDIO, XpContext::General, now);
                        let len = Duration::from_std(len).unwrap_or_else(|_| Duration::zero());
                        self.scheduler.after(
                            len + Duration::milliseconds(SUBLIMINAL_UNDUCK_SLACK_MS),
                            now,
                            Task::Unduck,
                        );
                        self.scheduler.after(
                            Duration::milliseconds(SUBLIMINAL_TEXT_DELAY_MS),
                            now,
                            Task::SubliminalShow { text },
                        );
                        return;
                    }
                    Err(err) => {
                        warn!(?err, "subliminal audio failed");
                        self.unduck();
                    }
                }
            }
        }
        self.show_subliminal(text, now);
    }

    pub(super) fn show_subliminal(&mut self, text: String, now: DateTime<Utc>) {
        if self.video_holds_screen() {
            return;
        }
        let sub = &self.settings.subliminal;
        let shown_ms = f64::max(SUBLIMINAL_MIN_MS, sub.duration_frames as f64 * FRAME_MS);
        let request = SurfaceRequest::SubliminalText {
            text,
            opacity: sub.opacity,
        };
        match self.services.surfaces.create(request) {
            Ok(handle) => {
                self.subliminals.push(handle);
                self.scheduler.after(
                    Duration::milliseconds(shown_ms.round() as i64),
                    now,
                    Task::DestroySurface(handle),
                );
                self.award(xp::SUBLIMINAL_TEXT, XpContext::General, now);
            }
            Err(err) => warn!(?err, "subliminal window failed"),
        }
    }

    // ── Bubbles ──────────────────────────────────────────────────────

    pub(super) fn fire_bubble(&mut self, now: DateTime<Utc>) {
        if self.video_holds_screen() {
            self.defer(EventType::Bubble, now);
            return;
        }
        if !self.is_enabled(EventType::Bubble) {
            self.deny(EventType::Bubble, DenyReason::Disabled, now);
            self.scheduler.disarm(EventType::Bubble);
            return;
        }

        if self.arbiter.can_start(EffectKind::Bubble, now) {
            match self.services.surfaces.create(SurfaceRequest::Bubble) {
                Ok(handle) => {
                    if self.arbiter.register(EffectKind::Bubble, 1) {
                        self.bubbles.insert(handle);
                        let life = self.settings.bubbles.lifespan_secs
                            * self.rng.gen_range(BUBBLE_LIFE_MIN..=BUBBLE_LIFE_MAX);
                        self.scheduler.after(
                            Duration::milliseconds((life * 1000.0).round() as i64),
                            now,
                            Task::BubbleExpired(handle),
                        );
                        self.push(Event::EffectFired {
                            event: EventType::Bubble,
                            at: now,
                        });
                    } else {
                        self.destroy_surface(handle);
                    }
                }
                Err(err) => warn!(?err, "bubble window failed"),
            }
        } else {
            self.deny(EventType::Bubble, DenyReason::Arbiter, now);
        }
        self.arm_next(EventType::Bubble, now);
    }

    /// A bubble left the screen, popped by the player or timed out.
    pub fn bubble_resolved(
        &mut self,
        handle: SurfaceHandle,
        popped: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.bubbles.remove(&handle) {
            return false;
        }
        self.destroy_surface(handle);
        self.arbiter.register(EffectKind::Bubble, -1);
        if popped {
            self.award(xp::BUBBLE_POP, XpContext::General, now);
        }
        true
    }

    // ── Startle ──────────────────────────────────────────────────────

    pub(super) fn fire_startle(&mut self, strict: bool, now: DateTime<Utc>) {
        if !self.video.is_idle() {
            self.defer(EventType::Startle, now);
            return;
        }
        if self.busy {
            self.deny(EventType::Startle, DenyReason::Busy, now);
            self.arm_next(EventType::Startle, now);
            return;
        }

        self.busy = true;
        let next = self.media.next(
            &*self.services.media,
            MediaCategory::StartleVideo,
            &mut self.rng,
        );
        let Some(path) = next else {
            self.busy = false;
            self.deny(EventType::Startle, DenyReason::NoMedia, now);
            self.arm_next(EventType::Startle, now);
            return;
        };

        self.push(Event::EffectFired {
            event: EventType::Startle,
            at: now,
        });
        let strict = strict || self.settings.startle.strict;
        self.step_video(VideoInput::Admit { path, strict }, now);
    }
}
