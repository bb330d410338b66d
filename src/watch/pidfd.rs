//! # pidfd strategy (Linux).
//!
//! Opens a pidfd for the watched process and registers it with the tokio
//! reactor. The descriptor turns readable when the process exits, so no thread
//! is parked and nothing polls. The status is then collected with a
//! non-blocking reap.

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use crate::error::WatchError;
use crate::sys::{self, Liveness};
use crate::watch::poll::{PollStrategy, poll_until_exit};
use crate::watch::{ExitEvent, ExitWatchStrategy};

/// Reactor-driven exit notification through `pidfd_open(2)`.
#[derive(Debug, Clone, Copy)]
pub struct PidFdStrategy {
    fallback: PollStrategy,
}

impl PidFdStrategy {
    /// Returns the strategy if the running kernel supports `pidfd_open`.
    pub fn probe(fallback: PollStrategy) -> Option<Self> {
        match sys::pidfd_open(sys::current_pid()) {
            Ok(_fd) => Some(Self { fallback }),
            Err(e) => {
                tracing::debug!(error = %e, "pidfd_open unsupported");
                None
            }
        }
    }
}

impl ExitWatchStrategy for PidFdStrategy {
    fn name(&self) -> &'static str {
        "pidfd"
    }

    fn subscribe(&self, pid: u32) -> Result<BoxFuture<'static, ExitEvent>, WatchError> {
        let fd = match sys::pidfd_open(pid) {
            Ok(fd) => fd,
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                let ev = ExitEvent::from_liveness(pid, sys::liveness(pid));
                return Ok(futures::future::ready(ev).boxed());
            }
            Err(e) => {
                return Err(WatchError::MonitorUnavailable {
                    strategy: "pidfd",
                    reason: e.to_string(),
                });
            }
        };

        let afd = AsyncFd::with_interest(fd, Interest::READABLE).map_err(|e| {
            WatchError::MonitorUnavailable {
                strategy: "pidfd",
                reason: e.to_string(),
            }
        })?;

        let fallback = self.fallback;
        Ok(async move {
            if let Err(e) = afd.readable().await {
                tracing::warn!(pid, error = %e, "pidfd readiness failed; polling");
                return poll_until_exit(pid, fallback).await;
            }
            drop(afd);
            collect(pid, fallback).await
        }
        .boxed())
    }
}

/// The pidfd fired; reap. A pid that still reads as running (rare reparenting
/// race with a foreign reaper) is handed to the poller.
async fn collect(pid: u32, fallback: PollStrategy) -> ExitEvent {
    for _ in 0..3 {
        match sys::liveness(pid) {
            Liveness::Running => tokio::time::sleep(Duration::from_millis(5)).await,
            other => return ExitEvent::from_liveness(pid, other),
        }
    }
    poll_until_exit(pid, fallback).await
}
