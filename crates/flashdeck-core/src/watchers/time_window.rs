use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDateTime};
use tracing::debug;

use super::{sleep_unless_stopped, WatcherHandle};
use crate::command::{Command, CommandSender};
use crate::storage::TimeWindowSettings;

pub const WINDOW_POLL_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    Start,
    Stop,
}

/// What the time window asks of a session at local time `now`.
///
/// `None` when the window is disabled, malformed, or already satisfied.
/// `start == end` is an empty window.
pub fn window_decision(
    now: NaiveDateTime,
    window: &TimeWindowSettings,
    running: bool,
) -> Option<WindowDecision> {
    if !window.enabled {
        return None;
    }
    let (start, end) = window.bounds()?;

    let weekday = now.weekday().num_days_from_monday() as u8;
    let inside = window.active_weekdays.contains(&weekday) && {
        let t = now.time();
        if start <= end {
            start <= t && t < end
        } else {
            t >= start || t < end
        }
    };

    match (inside, running) {
        (true, false) => Some(WindowDecision::Start),
        (false, true) => Some(WindowDecision::Stop),
        _ => None,
    }
}

/// Posts the local wall clock every few seconds as [`Command::ClockCheck`].
///
/// The engine owns the decision, since only it knows whether a session is
/// running.
pub struct TimeWindowWatcher {
    pub poll: Duration,
}

impl Default for TimeWindowWatcher {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(WINDOW_POLL_SECS),
        }
    }
}

impl TimeWindowWatcher {
    pub fn spawn(self, tx: CommandSender) -> std::io::Result<WatcherHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("flashdeck-window".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    if tx.send(Command::ClockCheck(Local::now().naive_local())).is_err() {
                        debug!("engine loop gone, window watcher exiting");
                        break;
                    }
                    sleep_unless_stopped(&flag, self.poll);
                }
            })?;
        Ok(WatcherHandle::new("time_window", stop, thread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command;
    use chrono::NaiveDate;

    // 2024-01-01 was a Monday.
    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn window(start: &str, end: &str) -> TimeWindowSettings {
        TimeWindowSettings {
            enabled: true,
            start: start.into(),
            end: end.into(),
            active_weekdays: (0..7).collect(),
        }
    }

    #[test]
    fn test_disabled_window_never_decides() {
        let mut w = window("16:00", "18:00");
        w.enabled = false;
        assert_eq!(window_decision(at(1, 17, 0), &w, false), None);
        assert_eq!(window_decision(at(1, 3, 0), &w, true), None);
    }

    #[test]
    fn test_starts_inside_and_stops_outside() {
        let w = window("16:00", "18:00");
        assert_eq!(window_decision(at(1, 16, 0), &w, false), Some(WindowDecision::Start));
        assert_eq!(window_decision(at(1, 17, 0), &w, true), None);
        assert_eq!(window_decision(at(1, 18, 0), &w, true), Some(WindowDecision::Stop));
        assert_eq!(window_decision(at(1, 9, 0), &w, false), None);
    }

    #[test]
    fn test_overnight_window_wraps_midnight() {
        let w = window("22:00", "02:00");
        assert_eq!(window_decision(at(1, 23, 30), &w, false), Some(WindowDecision::Start));
        assert_eq!(window_decision(at(2, 1, 0), &w, false), Some(WindowDecision::Start));
        assert_eq!(window_decision(at(2, 2, 0), &w, true), Some(WindowDecision::Stop));
        assert_eq!(window_decision(at(2, 12, 0), &w, true), Some(WindowDecision::Stop));
    }

    #[test]
    fn test_inactive_weekday_counts_as_outside() {
        let mut w = window("00:00", "23:59");
        w.active_weekdays = vec![0, 1, 2, 3, 4];
        // Saturday 2024-01-06.
        assert_eq!(window_decision(at(6, 12, 0), &w, true), Some(WindowDecision::Stop));
        assert_eq!(window_decision(at(6, 12, 0), &w, false), None);
        assert_eq!(window_decision(at(5, 12, 0), &w, false), Some(WindowDecision::Start));
    }

    #[test]
    fn test_malformed_bounds_are_ignored() {
        let w = window("4pm", "18:00");
        assert_eq!(window_decision(at(1, 17, 0), &w, false), None);
    }

    #[test]
    fn test_watcher_posts_clock_checks() {
        let (tx, rx) = command::channel();
        let handle = TimeWindowWatcher {
            poll: Duration::from_millis(1),
        }
        .spawn(tx)
        .unwrap();
        let cmd = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(cmd, Command::ClockCheck(_)));
        assert_eq!(handle.name(), "time_window");
        handle.stop();
    }
}
