//! # Runtime events emitted by the session and its components.
//!
//! [`EventKind`] groups events into:
//! - **Child lifecycle**: launched, exited, crash detected, relaunch scheduled/suppressed, adopted
//! - **Instance coordination**: primary/secondary election, connection attempts, forwarded requests
//! - **Shell sync**: dock verification failures, window activation, resume from sleep
//! - **Teardown**: shutdown requested, completed, grace exceeded
//! - **Subscriber health**: overflow and panics of event subscribers
//!
//! [`Event`] carries optional metadata (pid, exit status, attempt, delay, reason).
//!
//! ## Ordering
//! Every event gets a process-wide monotonically increasing `seq`.
//!
//! ## Example
//! ```rust
//! use lifeline::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::CrashDetected)
//!     .with_pid(4242)
//!     .with_exit_code(Some(11))
//!     .with_reason("early crash");
//!
//! assert_eq!(ev.kind, EventKind::CrashDetected);
//! assert_eq!(ev.pid, Some(4242));
//! assert_eq!(ev.reason.as_deref(), Some("early crash"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked while handling an event. Sets `source`, `reason`.
    SubscriberPanicked,
    /// Subscriber queue was full or closed; event dropped for it. Sets `source`, `reason`.
    SubscriberOverflow,

    // === Child lifecycle ===
    /// Child process spawned. Sets `pid`, `attempt` (launch count in this session).
    ChildLaunched,
    /// Spawning the child failed. Sets `reason`.
    LaunchFailed,
    /// Tracked child exited. Sets `pid`, `exit_code`/`signal`.
    ChildExited,
    /// Exit classified as a crash. Sets `pid`, `exit_code`/`signal`, `reason`.
    CrashDetected,
    /// Relaunch armed after an exit. Sets `delay_ms`, `attempt`.
    RelaunchScheduled,
    /// Relaunch withheld by the anti-flap window. Sets `pid`, `reason`.
    RelaunchSuppressed,
    /// Processes running the child's executable outlived the tracked pid. Sets `reason` (pid list).
    OrphansFound,
    /// A surviving same-executable process became the tracked child. Sets `pid`.
    ChildAdopted,
    /// Exit notification primitive unavailable, polling instead. Sets `pid`, `source`, `reason`.
    MonitorFallback,

    // === Instance coordination ===
    /// This invocation holds the service registration.
    BecamePrimary,
    /// Another invocation holds the service registration.
    BecameSecondary,
    /// A connection probe to the primary failed. Sets `attempt`, `delay_ms`, `reason`.
    ConnectAttemptFailed,
    /// Connected to the primary. Sets `attempt`.
    ConnectedToPrimary,
    /// All probes failed; launching an independent child. Sets `reason`.
    FallbackLaunch,
    /// The primary received a forwarded request. Sets `reason` (request name).
    RequestReceived,

    // === Shell sync ===
    /// Dock visibility settled on the intended state. Sets `reason` ("visible"/"hidden").
    DockSettled,
    /// Dock visibility could not be confirmed after bounded retries. Sets `attempt`, `reason`.
    DockSyncFailure,
    /// Window activation was requested from the window manager. Sets `pid`, `reason`.
    WindowsActivated,
    /// The machine woke from sleep; child and dock state are re-read. Sets `delay_ms` (time asleep).
    SystemResumed,

    // === Teardown ===
    /// Teardown started (child quit, OS signal, or a `Terminate` request). Sets `reason`.
    ShutdownRequested,
    /// Teardown completed within grace.
    TeardownCompleted,
    /// Teardown exceeded grace; forced exit. Sets `reason` (stuck stage).
    GraceExceeded,
}

impl EventKind {
    /// Short stable label (kebab-case) for log records.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::SubscriberPanicked => "subscriber-panicked",
            EventKind::SubscriberOverflow => "subscriber-overflow",
            EventKind::ChildLaunched => "child-launched",
            EventKind::LaunchFailed => "launch-failed",
            EventKind::ChildExited => "child-exited",
            EventKind::CrashDetected => "crash-detected",
            EventKind::RelaunchScheduled => "relaunch-scheduled",
            EventKind::RelaunchSuppressed => "relaunch-suppressed",
            EventKind::OrphansFound => "orphans-found",
            EventKind::ChildAdopted => "child-adopted",
            EventKind::MonitorFallback => "monitor-fallback",
            EventKind::BecamePrimary => "became-primary",
            EventKind::BecameSecondary => "became-secondary",
            EventKind::ConnectAttemptFailed => "connect-attempt-failed",
            EventKind::ConnectedToPrimary => "connected-to-primary",
            EventKind::FallbackLaunch => "fallback-launch",
            EventKind::RequestReceived => "request-received",
            EventKind::DockSettled => "dock-settled",
            EventKind::DockSyncFailure => "dock-sync-failure",
            EventKind::WindowsActivated => "windows-activated",
            EventKind::SystemResumed => "system-resumed",
            EventKind::ShutdownRequested => "shutdown-requested",
            EventKind::TeardownCompleted => "teardown-completed",
            EventKind::GraceExceeded => "grace-exceeded",
        }
    }
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Monotonic process-wide sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Process id the event refers to.
    pub pid: Option<u32>,
    /// Exit code of the child, when observable.
    pub exit_code: Option<i32>,
    /// Terminating signal of the child, when observable.
    pub signal: Option<i32>,
    /// Attempt counter (launches, connection probes, dock retries).
    pub attempt: Option<u32>,
    /// Scheduled delay in milliseconds.
    pub delay_ms: Option<u32>,
    /// Emitting component or subscriber name.
    pub source: Option<Arc<str>>,
    /// Human-readable detail.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event with the current timestamp and the next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            pid: None,
            exit_code: None,
            signal: None,
            attempt: None,
            delay_ms: None,
            source: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    #[inline]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    #[inline]
    pub fn with_signal(mut self, signal: Option<i32>) -> Self {
        self.signal = signal;
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    #[inline]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_source(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_source(subscriber)
            .with_reason(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::ChildLaunched);
        let b = Event::new(EventKind::ChildExited);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_delay_saturates() {
        let ev = Event::new(EventKind::RelaunchScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
