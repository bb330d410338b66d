//! # kqueue strategy (macOS and the BSDs).
//!
//! One kqueue holds a one-shot `EVFILT_PROC`/`NOTE_EXIT` registration per
//! watched pid. A dedicated monitor thread drains it and wakes the waiting
//! futures through oneshot channels; the status is collected afterwards with a
//! non-blocking reap.
//!
//! ```text
//! subscribe(pid) ─► pending[pid] += tx ─► kevent(EV_ADD|EV_ONESHOT, NOTE_EXIT)
//!                                                   │
//! monitor thread: loop { kevent(wait ≤ tick) ─► pending.remove(pid) ─► tx.send(()) }
//! ```
//!
//! The monitor thread is detached. `shutdown` only raises the stop flag, so it
//! never blocks the caller; the thread notices within one tick and exits.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::error::WatchError;
use crate::sys;
use crate::watch::poll::{PollStrategy, poll_until_exit};
use crate::watch::{ExitEvent, ExitWatchStrategy};

const TICK: Duration = Duration::from_millis(250);

struct Shared {
    kq: OwnedFd,
    pending: Mutex<HashMap<u32, Vec<oneshot::Sender<()>>>>,
    stop: AtomicBool,
}

/// Exit notification through a kqueue drained by a monitor thread.
pub struct KqueueStrategy {
    shared: Arc<Shared>,
    fallback: PollStrategy,
}

impl KqueueStrategy {
    /// Creates the kqueue and starts the monitor thread.
    pub fn new(fallback: PollStrategy) -> Result<Self, WatchError> {
        let unavailable = |reason: String| WatchError::MonitorUnavailable {
            strategy: "kqueue",
            reason,
        };

        let kq = sys::kqueue().map_err(|e| unavailable(e.to_string()))?;
        let shared = Arc::new(Shared {
            kq,
            pending: Mutex::new(HashMap::new()),
            stop: AtomicBool::new(false),
        });

        let worker = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("lifeline-kqueue".into())
            .spawn(move || monitor(worker))
            .map_err(|e| unavailable(e.to_string()))?;

        Ok(Self { shared, fallback })
    }
}

fn monitor(shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::Acquire) {
        let exited = match sys::kqueue_drain(&shared.kq, TICK) {
            Ok(pids) => pids,
            Err(e) => {
                tracing::error!(error = %e, "kqueue monitor failed; pending watches fall back to polling");
                break;
            }
        };
        if exited.is_empty() {
            continue;
        }
        let mut pending = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
        for pid in exited {
            for tx in pending.remove(&pid).unwrap_or_default() {
                let _ = tx.send(());
            }
        }
    }
    // Dropping the senders wakes every waiter; they finish by polling.
    shared
        .pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
}

impl ExitWatchStrategy for KqueueStrategy {
    fn name(&self) -> &'static str {
        "kqueue"
    }

    fn subscribe(&self, pid: u32) -> Result<BoxFuture<'static, ExitEvent>, WatchError> {
        if self.shared.stop.load(Ordering::Acquire) {
            return Err(WatchError::MonitorUnavailable {
                strategy: "kqueue",
                reason: "monitor stopped".into(),
            });
        }

        let (tx, rx) = oneshot::channel();
        // Insert before registering: the exit may fire before kevent returns.
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(pid)
            .or_default()
            .push(tx);

        if let Err(e) = sys::kqueue_watch_exit(&self.shared.kq, pid) {
            self.shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&pid);
            if e.raw_os_error() == Some(libc::ESRCH) {
                let ev = ExitEvent::from_liveness(pid, sys::liveness(pid));
                return Ok(futures::future::ready(ev).boxed());
            }
            return Err(WatchError::MonitorUnavailable {
                strategy: "kqueue",
                reason: e.to_string(),
            });
        }

        let fallback = self.fallback;
        Ok(async move {
            // Err means the monitor stopped; polling finishes the job either way.
            let _ = rx.await;
            poll_until_exit(pid, fallback).await
        }
        .boxed())
    }

    fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }
}

impl Drop for KqueueStrategy {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kqueue_reports_exit_code() {
        let strategy = KqueueStrategy::new(PollStrategy::default()).unwrap();
        let child = std::process::Command::new("/bin/sh")
            .args(["-c", "sleep 0.2; exit 4"])
            .spawn()
            .unwrap();
        let ev = tokio::time::timeout(Duration::from_secs(5), strategy.subscribe(child.id()).unwrap())
            .await
            .expect("kqueue must fire");
        assert_eq!(ev.exit_code, Some(4));
        strategy.shutdown();
        strategy.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_the_monitor() {
        let strategy = KqueueStrategy::new(PollStrategy::default()).unwrap();
        let started = std::time::Instant::now();
        strategy.shutdown();
        drop(strategy);
        assert!(started.elapsed() < TICK);
    }

    #[tokio::test]
    async fn test_waiters_finish_after_shutdown() {
        let strategy = KqueueStrategy::new(PollStrategy {
            interval: Duration::from_millis(20),
            fast: Duration::from_millis(5),
            ramp: Duration::ZERO,
        })
        .unwrap();
        let mut child = std::process::Command::new("/bin/sleep")
            .arg("0.3")
            .spawn()
            .unwrap();
        let exit = strategy.subscribe(child.id()).unwrap();
        strategy.shutdown();
        assert!(matches!(
            strategy.subscribe(child.id()),
            Err(WatchError::MonitorUnavailable { .. })
        ));
        let ev = tokio::time::timeout(Duration::from_secs(5), exit)
            .await
            .expect("polling must finish the watch");
        assert_eq!(ev.pid, child.id());
        let _ = child.wait();
    }
}
