//! Messages posted onto the engine loop from other threads.
//!
//! Watchers and worker jobs never touch engine state. They send a
//! [`Command`] and `Engine::tick` applies it on the loop thread.

use std::path::PathBuf;

use chrono::NaiveDateTime;

use crate::effects::EventType;
use crate::error::MediaError;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    /// Panic hotkey pressed. Guards are applied on the loop.
    Panic,
    /// Local wall-clock reading from the time-window watcher.
    ClockCheck(NaiveDateTime),
    /// Manual firing, as from a tray menu.
    Trigger { event: EventType, strict: bool },
    /// Result of a background audio extraction.
    AudioReady {
        epoch: u64,
        video: PathBuf,
        audio: Result<PathBuf, MediaError>,
    },
}

pub type CommandSender = crossbeam_channel::Sender<Command>;
pub type CommandReceiver = crossbeam_channel::Receiver<Command>;

pub fn channel() -> (CommandSender, CommandReceiver) {
    crossbeam_channel::unbounded()
}
