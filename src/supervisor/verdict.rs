//! Exit classification and the anti-flap crash record.

use std::time::Duration;

use tokio::time::Instant;

/// How an exit is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Exit code 0 (or an unobservable status without a signal).
    Clean,
    /// Killed by a signal, or a non-zero exit code.
    Crashed,
}

/// What the coordination context should do after an exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Launch the child again after `delay`.
    Relaunch {
        /// Backoff delay before the relaunch.
        delay: Duration,
    },
    /// A surviving same-executable process took over; nothing else to do.
    Adopted {
        /// Pid of the adopted process.
        pid: u32,
    },
    /// Tear the wrapper down.
    Terminate,
    /// Stay alive without a child; a later request may launch again.
    Idle,
}

/// Result of [`ChildSupervisor::on_exit`](super::ChildSupervisor::on_exit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitVerdict {
    /// Pid that exited.
    pub pid: u32,
    /// Clean or crashed.
    pub class: ExitClass,
    /// The exit happened inside the settle window.
    pub early: bool,
    /// The crash came within the anti-flap window of the previous one.
    pub relaunch_suppressed: bool,
    /// How long the child ran.
    pub uptime: Duration,
    /// Follow-up for the coordination context.
    pub action: ExitAction,
}

/// Anti-flap bookkeeping: when did the child last crash.
#[derive(Debug, Clone, Copy)]
pub struct CrashRecord {
    last_crash_at: Option<Instant>,
    recent_crash_window: Option<Duration>,
}

impl CrashRecord {
    /// Empty record; `None` window disables suppression.
    pub fn new(recent_crash_window: Option<Duration>) -> Self {
        Self {
            last_crash_at: None,
            recent_crash_window,
        }
    }

    /// Seeds the record with a crash that happened `ago`.
    ///
    /// Used with the persisted wall-clock crash time so that a flapping child
    /// is recognized across launcher restarts.
    pub fn seed(&mut self, ago: Duration) {
        self.last_crash_at = Instant::now().checked_sub(ago);
    }

    /// Records a crash at `at`; returns whether it falls inside the window of
    /// the previous one.
    pub fn record(&mut self, at: Instant) -> bool {
        let suppressed = match (self.last_crash_at, self.recent_crash_window) {
            (Some(prev), Some(window)) => at.saturating_duration_since(prev) <= window,
            _ => false,
        };
        self.last_crash_at = Some(at);
        suppressed
    }

    /// Time of the last recorded crash.
    pub fn last_crash_at(&self) -> Option<Instant> {
        self.last_crash_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_second_crash_inside_window_is_suppressed() {
        let mut rec = CrashRecord::new(Some(Duration::from_secs(10)));
        assert!(!rec.record(Instant::now()));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(rec.record(Instant::now()));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!rec.record(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_window_never_suppresses() {
        let mut rec = CrashRecord::new(None);
        assert!(!rec.record(Instant::now()));
        assert!(!rec.record(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_record_suppresses_first_crash() {
        tokio::time::advance(Duration::from_secs(60)).await;
        let mut rec = CrashRecord::new(Some(Duration::from_secs(10)));
        rec.seed(Duration::from_secs(4));
        assert!(rec.record(Instant::now()));
    }
}
