//! Startle video state machine.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Preparing -> Playing -> Evaluating -> Idle
//!                                     |
//!                                     +-> Retrying -> Preparing   (loops 1, 2)
//!                                     +-> Mercy -> Idle           (loop 3)
//! ```
//!
//! [`VideoSequencer::step`] is the single transition function. It performs no
//! I/O: it returns [`VideoAction`]s that the engine carries out, and the
//! engine feeds results back as [`VideoInput`]s. Delays are expressed as
//! `ScheduleAfter` actions, never as sleeps.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::attention::{pick_text, plan_spawns, AttentionGame, Verdict};
use super::playback::VideoMeta;
use crate::error::MediaError;
use crate::storage::Settings;

/// Pause between admission and playback so freed resources settle.
pub const GRACE_DELAY_MS: i64 = 4_000;
pub const PENALTY_HOLD_MS: i64 = 1_500;
pub const MERCY_HOLD_MS: i64 = 2_500;
/// Frame loop cadence.
pub const FRAME_INTERVAL_MS: i64 = 15;
/// Penalty loops before mercy.
pub const MAX_PENALTY_LOOPS: u32 = 3;
/// A run with this many clicks earns the attention bonus.
pub const BONUS_CLICKS: u32 = 10;

/// Fixed XP per transition, always in video context.
pub mod xp {
    pub const VIDEO_START: f64 = 50.0;
    pub const TARGET_HIT: f64 = 5.0;
    pub const PASS: f64 = 10.0;
    pub const ATTENTION_BONUS: f64 = 20.0;
    pub const PENALTY_LOOP: f64 = 20.0;
    pub const MERCY: f64 = 10.0;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoPhase {
    Idle,
    Preparing,
    Playing,
    Evaluating,
    Retrying,
    Mercy,
}

/// Full-screen message shown between loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Banner {
    Penalty { troll: bool },
    Mercy,
}

impl Banner {
    pub fn message(&self) -> &'static str {
        match self {
            Banner::Penalty { troll: false } => "TARGETS MISSED\nWATCH IT AGAIN",
            Banner::Penalty { troll: true } => "ALL FOUND...\nBUT ONE MORE TIME",
            Banner::Mercy => "THAT'S ENOUGH FOR NOW\nRESETTING",
        }
    }
}

/// One admitted startle, alive from admission until the ladder returns to
/// Idle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSession {
    pub path: PathBuf,
    pub strict: bool,
    pub targets_total: u32,
    pub targets_hit: u32,
    /// Targets clicked across the current run, for the bonus.
    pub targets_clicked: u32,
    pub penalty_loop_count: u32,
    /// Set when the current playback had targets; a failed run replays it.
    pub retry_path: Option<PathBuf>,
}

impl VideoSession {
    fn new(path: PathBuf, strict: bool) -> Self {
        Self {
            path,
            strict,
            targets_total: 0,
            targets_hit: 0,
            targets_clicked: 0,
            penalty_loop_count: 0,
            retry_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Playback {
    meta: VideoMeta,
    started_at: DateTime<Utc>,
    game: AttentionGame,
}

#[derive(Debug, Clone, PartialEq)]
enum VideoState {
    Idle,
    Preparing(VideoSession),
    Playing(VideoSession, Playback),
    Retrying(VideoSession),
    Mercy,
}

/// Inputs fed to the sequencer by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoInput {
    /// An admitted startle event.
    Admit { path: PathBuf, strict: bool },
    GraceElapsed,
    /// Audio extraction finished and the decoder was opened.
    Ready {
        audio: Option<PathBuf>,
        opened: Result<VideoMeta, MediaError>,
    },
    Frame,
    /// `ok == false` when a frame read failed or the stream ended.
    Presented { ok: bool },
    TargetHit { id: u64 },
    TargetExpired { id: u64 },
    PenaltyElapsed,
    MercyElapsed,
}

/// Side effects requested by a transition, executed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoAction {
    Phase { from: VideoPhase, to: VideoPhase },
    /// Block admissions and tear down flashes, bubbles and overlays.
    PrepareResources,
    ScheduleAfter { delay: Duration, input: VideoInput },
    ExtractAudio { path: PathBuf },
    HideHost,
    RestoreHost,
    /// Mark the video active and duck external audio.
    StartVideo,
    AwardXp { base: f64 },
    PlayAudio { path: PathBuf },
    SpawnTarget { id: u64, text: String },
    DestroyTarget { id: u64 },
    Present { frame: u64 },
    /// Close the decoder, destroy targets and restore ducked audio.
    ReleaseVideo,
    Verdict(Verdict),
    ShowBanner(Banner),
    DestroyBanner,
    /// Clear the arbiter's video flags.
    EndVideo,
    /// Re-arm startle, subliminal and anything deferred.
    Rearm,
}

/// Per-step view of the world.
pub struct StepCtx<'a> {
    pub now: DateTime<Utc>,
    pub settings: &'a Settings,
    pub running: bool,
}

#[derive(Debug, Clone)]
pub struct VideoSequencer {
    state: VideoState,
    host_hidden: bool,
}

impl Default for VideoSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSequencer {
    pub fn new() -> Self {
        Self {
            state: VideoState::Idle,
            host_hidden: false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> VideoPhase {
        match self.state {
            VideoState::Idle => VideoPhase::Idle,
            VideoState::Preparing(_) => VideoPhase::Preparing,
            VideoState::Playing(..) => VideoPhase::Playing,
            VideoState::Retrying(_) => VideoPhase::Retrying,
            VideoState::Mercy => VideoPhase::Mercy,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, VideoState::Idle)
    }

    pub fn session(&self) -> Option<&VideoSession> {
        match &self.state {
            VideoState::Preparing(s) | VideoState::Playing(s, _) | VideoState::Retrying(s) => {
                Some(s)
            }
            VideoState::Idle | VideoState::Mercy => None,
        }
    }

    pub fn is_strict(&self) -> bool {
        self.session().is_some_and(|s| s.strict)
    }

    pub fn host_hidden(&self) -> bool {
        self.host_hidden
    }

    /// Path currently being prepared, for matching extraction results.
    pub fn preparing_path(&self) -> Option<&PathBuf> {
        match &self.state {
            VideoState::Preparing(s) => Some(&s.path),
            _ => None,
        }
    }

    pub fn live_targets(&self) -> Vec<u64> {
        match &self.state {
            VideoState::Playing(_, pb) => pb.game.live_targets().collect(),
            _ => Vec::new(),
        }
    }

    /// Drop all state without emitting actions. Used by panic stop, which
    /// performs its own guarded cleanup.
    pub fn reset(&mut self) {
        self.state = VideoState::Idle;
        self.host_hidden = false;
    }

    // ── Transitions ──────────────────────────────────────────────────

    pub fn step<R: Rng + ?Sized>(
        &mut self,
        input: VideoInput,
        ctx: &StepCtx<'_>,
        rng: &mut R,
    ) -> Vec<VideoAction> {
        let mut out = Vec::new();
        let state = std::mem::replace(&mut self.state, VideoState::Idle);

        self.state = match (state, input) {
            (VideoState::Idle, VideoInput::Admit { path, strict }) => {
                info!(path = %path.display(), strict, "startle admitted");
                out.push(phase(VideoPhase::Idle, VideoPhase::Preparing));
                out.push(VideoAction::PrepareResources);
                out.push(VideoAction::ScheduleAfter {
                    delay: Duration::milliseconds(GRACE_DELAY_MS),
                    input: VideoInput::GraceElapsed,
                });
                VideoState::Preparing(VideoSession::new(path, strict))
            }

            (VideoState::Preparing(session), VideoInput::GraceElapsed) => {
                if !ctx.running {
                    self.finish(VideoPhase::Preparing, false, &mut out)
                } else {
                    out.push(VideoAction::ExtractAudio {
                        path: session.path.clone(),
                    });
                    VideoState::Preparing(session)
                }
            }

            (VideoState::Preparing(session), VideoInput::Ready { audio, opened }) => {
                if !ctx.running {
                    self.finish(VideoPhase::Preparing, false, &mut out)
                } else {
                    self.begin_playback(session, audio, opened, ctx, rng, &mut out)
                }
            }

            (VideoState::Playing(session, playback), VideoInput::Frame) => {
                self.frame(session, playback, ctx, rng, &mut out)
            }

            (VideoState::Playing(session, playback), VideoInput::Presented { ok }) => {
                if ok {
                    out.push(VideoAction::ScheduleAfter {
                        delay: Duration::milliseconds(FRAME_INTERVAL_MS),
                        input: VideoInput::Frame,
                    });
                    VideoState::Playing(session, playback)
                } else {
                    debug!("playback ended or frame read failed");
                    self.evaluate(session, playback.game, ctx, rng, &mut out)
                }
            }

            (VideoState::Playing(mut session, mut playback), VideoInput::TargetHit { id }) => {
                if playback.game.hit(id) {
                    session.targets_hit = playback.game.hit;
                    session.targets_clicked += 1;
                    out.push(VideoAction::DestroyTarget { id });
                    out.push(VideoAction::AwardXp {
                        base: xp::TARGET_HIT,
                    });
                }
                VideoState::Playing(session, playback)
            }

            (VideoState::Playing(session, mut playback), VideoInput::TargetExpired { id }) => {
                if playback.game.expire(id) {
                    out.push(VideoAction::DestroyTarget { id });
                }
                VideoState::Playing(session, playback)
            }

            (VideoState::Retrying(mut session), VideoInput::PenaltyElapsed) => {
                out.push(VideoAction::DestroyBanner);
                if !ctx.running {
                    self.finish(VideoPhase::Retrying, false, &mut out)
                } else {
                    // The strict lock is re-read for every loop.
                    session.strict = ctx.settings.startle.strict;
                    let path = session.retry_path.clone().unwrap_or_else(|| session.path.clone());
                    session.path = path.clone();
                    out.push(phase(VideoPhase::Retrying, VideoPhase::Preparing));
                    out.push(VideoAction::ExtractAudio { path });
                    VideoState::Preparing(session)
                }
            }

            (VideoState::Mercy, VideoInput::MercyElapsed) => {
                out.push(VideoAction::DestroyBanner);
                self.finish(VideoPhase::Mercy, ctx.running, &mut out)
            }

            (state, input) => {
                debug!(?input, phase = ?phase_of(&state), "video input ignored");
                state
            }
        };

        out
    }

    fn begin_playback<R: Rng + ?Sized>(
        &mut self,
        mut session: VideoSession,
        audio: Option<PathBuf>,
        opened: Result<VideoMeta, MediaError>,
        ctx: &StepCtx<'_>,
        rng: &mut R,
        out: &mut Vec<VideoAction>,
    ) -> VideoState {
        if session.strict && !self.host_hidden {
            self.host_hidden = true;
            out.push(VideoAction::HideHost);
        }
        out.push(VideoAction::StartVideo);
        session.targets_total = 0;
        session.targets_hit = 0;
        session.targets_clicked = 0;
        session.retry_path = None;
        out.push(VideoAction::AwardXp {
            base: xp::VIDEO_START,
        });
        if let Some(path) = audio {
            out.push(VideoAction::PlayAudio { path });
        }

        let meta = match opened {
            Ok(meta) => meta,
            Err(err) => {
                debug!(%err, "video could not be opened");
                out.push(phase(VideoPhase::Preparing, VideoPhase::Evaluating));
                out.push(VideoAction::ReleaseVideo);
                return self.judge(session, AttentionGame::default(), ctx, rng, out);
            }
        };

        let spawns = plan_spawns(meta.duration_secs(), &ctx.settings.attention, rng);
        if !spawns.is_empty() {
            session.retry_path = Some(session.path.clone());
        }
        let game = AttentionGame::new(spawns);
        session.targets_total = game.total;

        out.push(phase(VideoPhase::Preparing, VideoPhase::Playing));
        out.push(VideoAction::ScheduleAfter {
            delay: Duration::zero(),
            input: VideoInput::Frame,
        });
        VideoState::Playing(
            session,
            Playback {
                meta,
                started_at: ctx.now,
                game,
            },
        )
    }

    fn frame<R: Rng + ?Sized>(
        &mut self,
        session: VideoSession,
        mut playback: Playback,
        ctx: &StepCtx<'_>,
        rng: &mut R,
        out: &mut Vec<VideoAction>,
    ) -> VideoState {
        if !ctx.running {
            out.push(VideoAction::ReleaseVideo);
            return self.finish(VideoPhase::Playing, false, out);
        }

        let elapsed = (ctx.now - playback.started_at).num_milliseconds() as f64 / 1000.0;
        if playback.meta.is_finished(elapsed) {
            return self.evaluate(session, playback.game, ctx, rng, out);
        }

        if let Some(id) = playback.game.due(elapsed) {
            let text = pick_text(&ctx.settings.attention, rng);
            out.push(VideoAction::SpawnTarget { id, text });
            let lifespan = (ctx.settings.attention.lifespan_secs * 1000.0) as i64;
            out.push(VideoAction::ScheduleAfter {
                delay: Duration::milliseconds(lifespan),
                input: VideoInput::TargetExpired { id },
            });
        }

        out.push(VideoAction::Present {
            frame: playback.meta.target_frame(elapsed),
        });
        VideoState::Playing(session, playback)
    }

    fn evaluate<R: Rng + ?Sized>(
        &mut self,
        session: VideoSession,
        game: AttentionGame,
        ctx: &StepCtx<'_>,
        rng: &mut R,
        out: &mut Vec<VideoAction>,
    ) -> VideoState {
        out.push(phase(VideoPhase::Playing, VideoPhase::Evaluating));
        out.push(VideoAction::ReleaseVideo);
        self.judge(session, game, ctx, rng, out)
    }

    /// Evaluating: score the run and pick the next rung of the ladder.
    fn judge<R: Rng + ?Sized>(
        &mut self,
        mut session: VideoSession,
        game: AttentionGame,
        ctx: &StepCtx<'_>,
        rng: &mut R,
        out: &mut Vec<VideoAction>,
    ) -> VideoState {
        let mut verdict = None;
        if ctx.settings.attention.enabled {
            let v = Verdict::judge(&game, rng.gen::<f64>());
            if v.passed {
                out.push(VideoAction::AwardXp { base: xp::PASS });
                if session.targets_clicked >= BONUS_CLICKS {
                    out.push(VideoAction::AwardXp {
                        base: xp::ATTENTION_BONUS,
                    });
                }
            }
            out.push(VideoAction::Verdict(v));
            verdict = Some(v);
        }

        let loop_needed = verdict.is_some_and(|v| v.loop_needed());
        if !(loop_needed && session.retry_path.is_some()) {
            return self.finish(VideoPhase::Evaluating, ctx.running, out);
        }

        session.penalty_loop_count += 1;
        if session.penalty_loop_count >= MAX_PENALTY_LOOPS {
            info!(loops = session.penalty_loop_count, "mercy");
            out.push(phase(VideoPhase::Evaluating, VideoPhase::Mercy));
            out.push(VideoAction::PrepareResources);
            out.push(VideoAction::AwardXp { base: xp::MERCY });
            out.push(VideoAction::ShowBanner(Banner::Mercy));
            out.push(VideoAction::ScheduleAfter {
                delay: Duration::milliseconds(MERCY_HOLD_MS),
                input: VideoInput::MercyElapsed,
            });
            return VideoState::Mercy;
        }

        let troll = verdict.is_some_and(|v| v.troll);
        info!(loops = session.penalty_loop_count, troll, "penalty loop");
        out.push(phase(VideoPhase::Evaluating, VideoPhase::Retrying));
        out.push(VideoAction::PrepareResources);
        out.push(VideoAction::AwardXp {
            base: xp::PENALTY_LOOP,
        });
        if ctx.settings.startle.strict && !self.host_hidden {
            self.host_hidden = true;
            out.push(VideoAction::HideHost);
        }
        out.push(VideoAction::ShowBanner(Banner::Penalty { troll }));
        out.push(VideoAction::ScheduleAfter {
            delay: Duration::milliseconds(PENALTY_HOLD_MS),
            input: VideoInput::PenaltyElapsed,
        });
        VideoState::Retrying(session)
    }

    /// Any -> Idle.
    fn finish(&mut self, from: VideoPhase, rearm: bool, out: &mut Vec<VideoAction>) -> VideoState {
        out.push(phase(from, VideoPhase::Idle));
        out.push(VideoAction::EndVideo);
        if self.host_hidden {
            self.host_hidden = false;
            out.push(VideoAction::RestoreHost);
        }
        if rearm {
            out.push(VideoAction::Rearm);
        }
        VideoState::Idle
    }
}

fn phase(from: VideoPhase, to: VideoPhase) -> VideoAction {
    VideoAction::Phase { from, to }
}

fn phase_of(state: &VideoState) -> VideoPhase {
    match state {
        VideoState::Idle => VideoPhase::Idle,
        VideoState::Preparing(_) => VideoPhase::Preparing,
        VideoState::Playing(..) => VideoPhase::Playing,
        VideoState::Retrying(_) => VideoPhase::Retrying,
        VideoState::Mercy => VideoPhase::Mercy,
    }
}
