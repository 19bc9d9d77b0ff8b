//! Startle video: sequencer, attention mini-game and frame sync.

pub mod attention;
pub mod playback;
mod sequencer;

pub use attention::{AttentionGame, Verdict};
pub use playback::VideoMeta;
pub use sequencer::{
    xp, Banner, StepCtx, VideoAction, VideoInput, VideoPhase, VideoSequencer, VideoSession,
    BONUS_CLICKS, FRAME_INTERVAL_MS, GRACE_DELAY_MS, MAX_PENALTY_LOOPS, MERCY_HOLD_MS,
    PENALTY_HOLD_MS,
};
