//! # Process exit watcher.
//!
//! Delivers exactly one [`ExitEvent`] per watched pid, using the best exit
//! notification primitive the host offers:
//!
//! | Strategy                                  | Mechanism                                  | Hosts        |
//! |-------------------------------------------|--------------------------------------------|--------------|
//! | [`PidFdStrategy`](pidfd::PidFdStrategy)    | pidfd registered with the tokio reactor     | Linux ≥ 5.3  |
//! | [`KqueueStrategy`](kqueue::KqueueStrategy) | `NOTE_EXIT` on a kqueue, monitor thread     | macOS, BSDs  |
//! | [`PollStrategy`]                           | liveness probe, 250ms ramp then 1s          | everywhere   |
//!
//! The strategy is picked once by [`select_strategy`]. If it cannot subscribe a
//! particular pid, [`ExitWatcher::watch_or_poll`] falls back to polling for that
//! pid and publishes `MonitorFallback`.
//!
//! ## Cancellation
//! ```text
//! watch(pid) ─► token_g ─► spawn { select! { token_g.cancelled() ⇒ drop,
//!                                            strategy future   ⇒ send once } }
//! cancel(pid) ─► token_g.cancel()      (idempotent; late events are never sent)
//! ```

mod poll;
mod strategy;

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;
#[cfg(target_os = "linux")]
pub mod pidfd;

pub use poll::PollStrategy;
pub use strategy::ExitWatchStrategy;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::SystemTime;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::WatchError;
use crate::events::{Bus, Event, EventKind};
use crate::sys::Liveness;

/// A process exit, produced once per watched pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    /// Process that exited.
    pub pid: u32,
    /// Exit code, when the process exited normally and its status was observable.
    pub exit_code: Option<i32>,
    /// Terminating signal, when killed by one and its status was observable.
    pub signal: Option<i32>,
    /// When the exit was observed.
    pub at: SystemTime,
}

impl ExitEvent {
    /// Builds an event for a clean exit with the given code (tests, synthetic exits).
    pub fn with_code(pid: u32, code: i32) -> Self {
        Self {
            pid,
            exit_code: Some(code),
            signal: None,
            at: SystemTime::now(),
        }
    }

    /// Builds an event for a death by signal.
    pub fn with_signal(pid: u32, signal: i32) -> Self {
        Self {
            pid,
            exit_code: None,
            signal: Some(signal),
            at: SystemTime::now(),
        }
    }

    pub(crate) fn from_liveness(pid: u32, liveness: Liveness) -> Self {
        let (exit_code, signal) = match liveness {
            Liveness::Exited { code, signal } => (code, signal),
            Liveness::Running | Liveness::Gone => (None, None),
        };
        Self {
            pid,
            exit_code,
            signal,
            at: SystemTime::now(),
        }
    }

    /// Whether the process was terminated by a signal.
    pub fn signaled(&self) -> bool {
        self.signal.is_some()
    }
}

/// Single-fire future for one watched pid.
///
/// Resolves to `Some(event)` on exit, or `None` if the watch was cancelled.
#[must_use = "an ExitWatch does nothing unless awaited"]
pub struct ExitWatch {
    pid: u32,
    rx: oneshot::Receiver<ExitEvent>,
}

impl ExitWatch {
    /// The watched pid.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Future for ExitWatch {
    type Output = Option<ExitEvent>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

type Watches = Arc<Mutex<HashMap<u32, (u64, CancellationToken)>>>;

/// Registry of active exit watches on top of one [`ExitWatchStrategy`].
pub struct ExitWatcher {
    strategy: Arc<dyn ExitWatchStrategy>,
    fallback: PollStrategy,
    watches: Watches,
    next_id: AtomicU64,
    bus: Bus,
}

impl ExitWatcher {
    /// Creates a watcher over `strategy`; `fallback` is used when it cannot subscribe.
    pub fn new(strategy: Arc<dyn ExitWatchStrategy>, fallback: PollStrategy, bus: Bus) -> Self {
        Self {
            strategy,
            fallback,
            watches: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            bus,
        }
    }

    /// Name of the selected strategy.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Watches `pid` with the selected strategy.
    ///
    /// Replaces (and cancels) an existing watch on the same pid. Must be called
    /// inside a tokio runtime.
    pub fn watch(&self, pid: u32) -> Result<ExitWatch, WatchError> {
        let fut = self.strategy.subscribe(pid)?;
        Ok(self.arm(pid, fut))
    }

    /// Watches `pid`, falling back to polling if the strategy is unavailable.
    pub fn watch_or_poll(&self, pid: u32) -> ExitWatch {
        match self.watch(pid) {
            Ok(w) => w,
            Err(e) => {
                self.bus.publish(
                    Event::new(EventKind::MonitorFallback)
                        .with_pid(pid)
                        .with_source(self.strategy.name())
                        .with_reason(e.to_string()),
                );
                let fut = poll::poll_until_exit(pid, self.fallback).boxed();
                self.arm(pid, fut)
            }
        }
    }

    fn arm(&self, pid: u32, fut: BoxFuture<'static, ExitEvent>) -> ExitWatch {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some((_, old)) = self
            .watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid, (id, token.clone()))
        {
            old.cancel();
        }

        let (tx, rx) = oneshot::channel();
        let watches = Arc::clone(&self.watches);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                ev = fut => {
                    let mut map = watches.lock().unwrap_or_else(|e| e.into_inner());
                    if map.get(&pid).is_some_and(|(cur, _)| *cur == id) {
                        map.remove(&pid);
                    }
                    drop(map);
                    if !token.is_cancelled() {
                        let _ = tx.send(ev);
                    }
                }
            }
        });

        ExitWatch { pid, rx }
    }

    /// Cancels the watch on `pid`. Idempotent; unknown pids are ignored.
    pub fn cancel(&self, pid: u32) {
        if let Some((_, token)) = self
            .watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&pid)
        {
            token.cancel();
        }
    }

    /// Cancels every watch and releases the strategy's resources. Idempotent.
    pub fn cancel_all(&self) {
        let drained: Vec<CancellationToken> = self
            .watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, (_, t))| t)
            .collect();
        for token in drained {
            token.cancel();
        }
        self.strategy.shutdown();
    }

    /// Number of active watches.
    pub fn active(&self) -> usize {
        self.watches.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Picks the best available strategy by probing the host.
///
/// pidfd (async reactor source) is preferred, then kqueue (monitor thread),
/// then polling.
pub fn select_strategy(fallback: PollStrategy) -> Arc<dyn ExitWatchStrategy> {
    #[cfg(target_os = "linux")]
    {
        if let Some(s) = pidfd::PidFdStrategy::probe(fallback) {
            return Arc::new(s);
        }
    }

    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    {
        match kqueue::KqueueStrategy::new(fallback) {
            Ok(s) => return Arc::new(s),
            Err(e) => tracing::warn!(error = %e, "kqueue unavailable"),
        }
    }

    Arc::new(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn watcher() -> ExitWatcher {
        let poll = PollStrategy {
            interval: Duration::from_millis(20),
            fast: Duration::from_millis(5),
            ramp: Duration::from_millis(50),
        };
        ExitWatcher::new(select_strategy(poll), poll, Bus::new(16))
    }

    struct Broken;

    impl ExitWatchStrategy for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn subscribe(&self, _pid: u32) -> Result<BoxFuture<'static, ExitEvent>, WatchError> {
            Err(WatchError::MonitorUnavailable {
                strategy: "broken",
                reason: "no monitor thread".into(),
            })
        }
    }

    /// Never resolves unless the test drives it.
    struct Manual(Mutex<Option<oneshot::Receiver<ExitEvent>>>);

    impl ExitWatchStrategy for Manual {
        fn name(&self) -> &'static str {
            "manual"
        }
        fn subscribe(&self, _pid: u32) -> Result<BoxFuture<'static, ExitEvent>, WatchError> {
            let rx = self.0.lock().unwrap().take().unwrap();
            Ok(async move { rx.await.unwrap() }.boxed())
        }
    }

    #[tokio::test]
    async fn test_already_exited_pid_resolves_immediately() {
        let w = watcher();
        let ev = tokio::time::timeout(Duration::from_secs(2), w.watch_or_poll(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.pid, 0);
    }

    #[tokio::test]
    async fn test_watch_delivers_exit_of_real_child_once() {
        let w = watcher();
        let child = std::process::Command::new("/bin/sh")
            .args(["-c", "exit 2"])
            .spawn()
            .unwrap();
        let ev = tokio::time::timeout(Duration::from_secs(5), w.watch_or_poll(child.id()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.exit_code, Some(2));
        assert_eq!(w.active(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_monitor_falls_back_to_polling() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let w = ExitWatcher::new(Arc::new(Broken), PollStrategy::default(), bus);

        assert!(matches!(
            w.watch(0),
            Err(WatchError::MonitorUnavailable { .. })
        ));
        let ev = w.watch_or_poll(0).await.unwrap();
        assert_eq!(ev.pid, 0);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::MonitorFallback);
    }

    #[tokio::test]
    async fn test_cancel_suppresses_late_delivery() {
        let (fire, rx) = oneshot::channel();
        let w = ExitWatcher::new(
            Arc::new(Manual(Mutex::new(Some(rx)))),
            PollStrategy::default(),
            Bus::new(4),
        );
        let watch = w.watch(99).unwrap();
        w.cancel(99);
        w.cancel(99);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = fire.send(ExitEvent::with_code(99, 0));
        assert_eq!(watch.await, None);
    }

    #[tokio::test]
    async fn test_cancel_all_is_idempotent() {
        let w = watcher();
        let child = std::process::Command::new("/bin/sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id();
        let watch = w.watch_or_poll(pid);
        w.cancel_all();
        w.cancel_all();
        assert_eq!(watch.await, None);
        crate::sys::send_signal(pid, libc::SIGKILL).unwrap();
        let _ = crate::sys::liveness(pid);
    }
}
