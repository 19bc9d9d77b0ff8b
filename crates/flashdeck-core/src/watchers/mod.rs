//! Background polling loops.
//!
//! Each watcher runs on its own thread and only ever sends a
//! [`Command`](crate::command::Command) to the engine loop. Decisions that
//! depend on engine state (is the session running, is panic disabled) are
//! made on the loop when the command is applied.

mod panic;
mod time_window;

pub use panic::{PanicWatcher, PANIC_DEBOUNCE_MS, PANIC_POLL_MS};
pub use time_window::{window_decision, TimeWindowWatcher, WindowDecision, WINDOW_POLL_SECS};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::warn;

/// Stops and joins a watcher thread when dropped.
#[derive(Debug)]
pub struct WatcherHandle {
    name: &'static str,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    fn new(name: &'static str, stop: Arc<AtomicBool>, thread: JoinHandle<()>) -> Self {
        Self {
            name,
            stop,
            thread: Some(thread),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(watcher = self.name, "watcher thread panicked");
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sleep in short slices so a stop request is noticed quickly.
fn sleep_unless_stopped(stop: &AtomicBool, total: std::time::Duration) {
    const SLICE: std::time::Duration = std::time::Duration::from_millis(50);
    let mut left = total;
    while !left.is_zero() && !stop.load(Ordering::Relaxed) {
        let step = left.min(SLICE);
        std::thread::sleep(step);
        left -= step;
    }
}
