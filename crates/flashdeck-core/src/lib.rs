//! # Flashdeck Core Library
//!
//! This library provides the core logic of flashdeck: a timed effect engine
//! that schedules visual and audio interruptions (image flashes, subliminal
//! text, bubbles and a mandatory "startle" video) across a session, arbitrates
//! which of them may share the screen, and rewards the player with XP.
//! It follows a CLI-first philosophy: the `flashdeck` binary drives the same
//! engine headlessly, and a desktop shell is a thin layer of collaborators
//! over this crate.
//!
//! ## Architecture
//!
//! - **Engine**: a single-threaded loop driven by `tick(now)`. Timers,
//!   watcher commands and worker results are all applied from inside `tick`
//! - **Scheduler**: one timer per event type, cancelled by generation tokens
//! - **Resource arbiter**: admission control for effects on screen
//! - **Video sequencer**: the startle state machine with its penalty ladder
//! - **Progression**: XP, levels, unlocks and the intensity ramp
//! - **Watchers**: panic hotkey and daily time window, on their own threads
//!
//! ## Key Components
//!
//! - [`Engine`]: top-level wiring and public API
//! - [`ResourceArbiter`]: single source of truth for concurrent effects
//! - [`VideoSequencer`]: pure transition function over [`VideoInput`]s
//! - [`Settings`]: TOML-backed configuration
//! - [`Services`]: collaborator traits the engine talks through

pub mod arbiter;
pub mod command;
pub mod effects;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod overlays;
pub mod progression;
pub mod scheduler;
pub mod services;
pub mod storage;
pub mod video;
pub mod watchers;

pub use arbiter::{ArbiterLimits, ResourceArbiter, ResourceCounters};
pub use command::{Command, CommandReceiver, CommandSender};
pub use effects::{EffectKind, EventType, MediaCategory};
pub use engine::{Engine, EngineSnapshot};
pub use error::{ConfigError, CoreError, MediaError, Result, ServiceError};
pub use events::{DenyReason, Event};
pub use media::{DirectoryLibrary, MediaQueue, StaticLibrary};
pub use progression::{Feature, PlayerProgress, ProgressionEngine, XpContext};
pub use scheduler::{ScheduleEntry, Scheduler, SessionState};
pub use services::{Services, SurfaceHandle, SurfaceRequest};
pub use storage::Settings;
pub use video::{Banner, VideoInput, VideoPhase, VideoSequencer, VideoSession};
pub use watchers::{PanicWatcher, TimeWindowWatcher, WatcherHandle};
