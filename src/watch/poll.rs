//! # Polling fallback.
//!
//! Used when no event primitive is available, or when subscribing with the
//! selected primitive fails. Polls liveness at `fast` during the first `ramp`
//! after subscription (the child is most likely to die early), then relaxes to
//! `interval`. Still produces exactly one [`ExitEvent`].

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::{self, Instant};

use crate::error::WatchError;
use crate::sys::{self, Liveness};
use crate::watch::{ExitEvent, ExitWatchStrategy};

/// Periodic liveness probing.
#[derive(Debug, Clone, Copy)]
pub struct PollStrategy {
    /// Steady-state probe interval.
    pub interval: Duration,
    /// Probe interval during the ramp.
    pub fast: Duration,
    /// How long after subscription the fast interval applies.
    pub ramp: Duration,
}

impl Default for PollStrategy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            fast: Duration::from_millis(250),
            ramp: Duration::from_secs(2),
        }
    }
}

impl PollStrategy {
    fn delay_at(&self, elapsed: Duration) -> Duration {
        let d = if elapsed < self.ramp {
            self.fast
        } else {
            self.interval
        };
        d.max(Duration::from_millis(1))
    }
}

impl ExitWatchStrategy for PollStrategy {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn subscribe(&self, pid: u32) -> Result<BoxFuture<'static, ExitEvent>, WatchError> {
        let me = *self;
        Ok(async move { poll_until_exit(pid, me).await }.boxed())
    }
}

/// Probes `pid` until it is no longer running.
pub(crate) async fn poll_until_exit(pid: u32, policy: PollStrategy) -> ExitEvent {
    let started = Instant::now();
    loop {
        match sys::liveness(pid) {
            Liveness::Running => time::sleep(policy.delay_at(started.elapsed())).await,
            other => return ExitEvent::from_liveness(pid, other),
        }
    }
}
