//! # LogWriter: structured event logging
//!
//! Renders every runtime [`Event`] as a `tracing` record. Degraded paths
//! (crashes, monitor fallback, dock sync failures, grace exceeded) log at `warn`,
//! routine lifecycle at `info`, chatty coordination at `debug`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO lifeline: child-launched pid=4242 attempt=1
//! WARN lifeline: crash-detected pid=4242 exit_code=11 reason="early crash"
//! WARN lifeline: relaunch-suppressed pid=4242 reason="crash within 10s of previous crash"
//! INFO lifeline: teardown-completed
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let label = e.kind.as_label();
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::CrashDetected
            | EventKind::RelaunchSuppressed
            | EventKind::MonitorFallback
            | EventKind::DockSyncFailure
            | EventKind::GraceExceeded
            | EventKind::LaunchFailed
            | EventKind::FallbackLaunch
            | EventKind::SubscriberPanicked
            | EventKind::SubscriberOverflow => {
                tracing::warn!(
                    target: "lifeline",
                    seq = e.seq,
                    pid = e.pid,
                    exit_code = e.exit_code,
                    signal = e.signal,
                    source = e.source.as_deref(),
                    "{label} {reason}"
                );
            }
            EventKind::ConnectAttemptFailed | EventKind::DockSettled | EventKind::RequestReceived => {
                tracing::debug!(
                    target: "lifeline",
                    seq = e.seq,
                    attempt = e.attempt,
                    delay_ms = e.delay_ms,
                    "{label} {reason}"
                );
            }
            _ => {
                tracing::info!(
                    target: "lifeline",
                    seq = e.seq,
                    pid = e.pid,
                    exit_code = e.exit_code,
                    attempt = e.attempt,
                    delay_ms = e.delay_ms,
                    "{label} {reason}"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
