use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{sleep_unless_stopped, WatcherHandle};
use crate::command::{Command, CommandSender};
use crate::services::HotkeySource;

pub const PANIC_POLL_MS: u64 = 50;
pub const PANIC_DEBOUNCE_MS: u64 = 500;

/// Polls a global hotkey and posts [`Command::Panic`].
pub struct PanicWatcher {
    pub poll: Duration,
    pub debounce: Duration,
}

impl Default for PanicWatcher {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(PANIC_POLL_MS),
            debounce: Duration::from_millis(PANIC_DEBOUNCE_MS),
        }
    }
}

impl PanicWatcher {
    pub fn spawn(
        self,
        mut source: Box<dyn HotkeySource>,
        tx: CommandSender,
    ) -> std::io::Result<WatcherHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("flashdeck-panic".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    match source.is_pressed() {
                        Ok(true) => {
                            info!("panic hotkey pressed");
                            if tx.send(Command::Panic).is_err() {
                                debug!("engine loop gone, panic watcher exiting");
                                break;
                            }
                            sleep_unless_stopped(&flag, self.debounce);
                        }
                        Ok(false) => {}
                        Err(err) => warn!(?err, "hotkey poll failed"),
                    }
                    sleep_unless_stopped(&flag, self.poll);
                }
            })?;
        Ok(WatcherHandle::new("panic", stop, thread))
    }
}
