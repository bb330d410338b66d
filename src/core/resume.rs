//! Detection of a resume from system sleep.
//!
//! The monotonic clock stops while the machine sleeps, the wall clock does
//! not. Comparing how far each advanced between two checks reveals the time
//! spent asleep:
//!
//! ```text
//!   check ──── 5s ──── check ── (suspend 40m) ── check
//!   wall:  +5s                   wall: +40m5s
//!   mono:  +5s                   mono: +5s      gap = 40m ─► Resumed
//! ```
//!
//! A forward wall-clock adjustment larger than the threshold looks the same;
//! the session's reaction (re-reading child and dock state) is harmless then.

use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::session::Message;

/// Compares wall-clock and monotonic progress between checks.
#[derive(Debug, Clone)]
pub(crate) struct ResumeDetector {
    wall: SystemTime,
    mono: Instant,
    threshold: Duration,
}

impl ResumeDetector {
    pub(crate) fn new(threshold: Duration) -> Self {
        Self {
            wall: SystemTime::now(),
            mono: Instant::now(),
            threshold,
        }
    }

    /// Returns the time spent asleep since the previous check, if it reaches the threshold.
    pub(crate) fn check(&mut self) -> Option<Duration> {
        self.check_at(SystemTime::now(), Instant::now())
    }

    pub(crate) fn check_at(&mut self, wall: SystemTime, mono: Instant) -> Option<Duration> {
        // A wall clock set backwards yields zero progress, never a resume.
        let wall_elapsed = wall.duration_since(self.wall).unwrap_or_default();
        let mono_elapsed = mono.saturating_duration_since(self.mono);
        self.wall = wall;
        self.mono = mono;

        let gap = wall_elapsed.saturating_sub(mono_elapsed);
        (gap >= self.threshold).then_some(gap)
    }
}

/// Checks every `every` until `token` is cancelled and posts
/// [`Message::Resumed`] when a sleep is detected.
pub(crate) fn spawn(
    every: Duration,
    threshold: Duration,
    tx: mpsc::UnboundedSender<Message>,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut detector = ResumeDetector::new(threshold);
        let mut ticks = tokio::time::interval(every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticks.tick() => {
                    if let Some(slept) = detector.check() {
                        tracing::info!(?slept, "resumed from sleep");
                        if tx.send(Message::Resumed { slept }).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
}
