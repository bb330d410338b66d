//! # Dock visibility controller.
//!
//! The shell confirms dock-icon visibility asynchronously, so the controller
//! tracks what we *want* separately from what the shell *shows*:
//!
//! ```text
//!            request_visible()                    verify: confirmed
//!   Hidden ───────────────────► Showing ─────────────────────────► Visible
//!     ▲                                                               │
//!     │           verify: confirmed         request_hidden()          │
//!     └──────────────────────── Hiding ◄──────────────────────────────┘
//! ```
//!
//! Each transform returns a [`VerifyTicket`]. The coordination context arms a
//! timer and hands the ticket back to [`DockVisibilityController::on_verify`],
//! which settles on a match and re-issues the transform on a mismatch, at
//! most `max_retries` times. Exhausted retries end in a `DockSyncFailure`
//! event: dock visibility is cosmetic and never fails the session.

use std::sync::Arc;
use std::time::Duration;

use crate::events::{Bus, Event, EventKind};
use crate::shell::DesktopShell;

/// Visible phase of the dock icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockPhase {
    Hidden,
    Showing,
    Visible,
    Hiding,
}

/// Intended vs. confirmed visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DockState {
    pub intended_visible: bool,
    pub confirmed_visible: bool,
    /// A change was requested from the shell and is not yet verified.
    pub transform_pending: bool,
    /// Re-issues of the current transform.
    pub retries: u32,
}

/// Identifies one armed verification; stale tickets are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyTicket(u64);

pub struct DockVisibilityController {
    shell: Arc<dyn DesktopShell>,
    bus: Bus,
    state: DockState,
    generation: u64,
    max_retries: u32,
}

impl DockVisibilityController {
    pub fn new(shell: Arc<dyn DesktopShell>, max_retries: u32, bus: Bus) -> Self {
        Self {
            shell,
            bus,
            state: DockState::default(),
            generation: 0,
            max_retries,
        }
    }

    pub fn state(&self) -> DockState {
        self.state
    }

    pub fn phase(&self) -> DockPhase {
        match (self.state.transform_pending, self.state.intended_visible) {
            (true, true) => DockPhase::Showing,
            (true, false) => DockPhase::Hiding,
            (false, _) if self.state.confirmed_visible => DockPhase::Visible,
            (false, _) => DockPhase::Hidden,
        }
    }

    /// Wants the icon shown. Returns a ticket to verify if a transform began.
    pub async fn request_visible(&mut self) -> Option<VerifyTicket> {
        self.request(true).await
    }

    /// Wants the icon hidden. Returns a ticket to verify if a transform began.
    pub async fn request_hidden(&mut self) -> Option<VerifyTicket> {
        self.request(false).await
    }

    async fn request(&mut self, visible: bool) -> Option<VerifyTicket> {
        self.state.intended_visible = visible;
        // An in-flight transform is reconciled with the new intent on verify.
        if self.state.transform_pending || visible == self.state.confirmed_visible {
            return None;
        }
        self.state.retries = 0;
        Some(self.begin().await)
    }

    async fn begin(&mut self) -> VerifyTicket {
        self.state.transform_pending = true;
        self.generation += 1;
        self.shell.set_dock_visible(self.state.intended_visible).await;
        VerifyTicket(self.generation)
    }

    /// Verification timer fired. Returns the next ticket to arm, if any.
    pub async fn on_verify(&mut self, ticket: VerifyTicket) -> Option<VerifyTicket> {
        if ticket.0 != self.generation || !self.state.transform_pending {
            return None;
        }

        self.state.confirmed_visible = self.shell.dock_visible().await;
        let label = if self.state.intended_visible {
            "visible"
        } else {
            "hidden"
        };

        if self.state.confirmed_visible == self.state.intended_visible {
            self.state.transform_pending = false;
            self.state.retries = 0;
            self.bus
                .publish(Event::new(EventKind::DockSettled).with_reason(label));
            return None;
        }

        if self.state.retries >= self.max_retries {
            tracing::warn!(
                intended = label,
                retries = self.state.retries,
                "dock visibility out of sync; giving up"
            );
            self.bus.publish(
                Event::new(EventKind::DockSyncFailure)
                    .with_attempt(self.state.retries)
                    .with_reason(format!("dock did not become {label}")),
            );
            self.state.transform_pending = false;
            self.state.retries = 0;
            return None;
        }

        self.state.retries += 1;
        Some(self.begin().await)
    }

    /// Re-reads the shell and re-issues the intent when a transform is pending
    /// or the shell drifted from the confirmed state. Any armed ticket goes
    /// stale. Returns the ticket for the new transform, if one began.
    pub async fn reconcile(&mut self) -> Option<VerifyTicket> {
        self.state.confirmed_visible = self.shell.dock_visible().await;
        if !self.state.transform_pending
            && self.state.confirmed_visible == self.state.intended_visible
        {
            return None;
        }
        self.state.retries = 0;
        Some(self.begin().await)
    }

    /// Drives verification inline until settled or given up, pausing `delay`
    /// between checks. Used by teardown. Returns whether the intent was reached.
    pub async fn settle(&mut self, mut ticket: Option<VerifyTicket>, delay: Duration) -> bool {
        while let Some(t) = ticket {
            tokio::time::sleep(delay).await;
            ticket = self.on_verify(t).await;
        }
        !self.state.transform_pending && self.state.confirmed_visible == self.state.intended_visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::HeadlessShell;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Shell that ignores every request.
    #[derive(Default)]
    struct StuckShell {
        requests: AtomicUsize,
    }

    #[async_trait]
    impl DesktopShell for StuckShell {
        async fn set_dock_visible(&self, _visible: bool) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }
        async fn dock_visible(&self) -> bool {
            false
        }
    }

    /// Shell that applies a request only on the second attempt.
    #[derive(Default)]
    struct SlowShell {
        seen_once: AtomicBool,
        visible: AtomicBool,
    }

    #[async_trait]
    impl DesktopShell for SlowShell {
        async fn set_dock_visible(&self, visible: bool) {
            if self.seen_once.swap(true, Ordering::SeqCst) {
                self.visible.store(visible, Ordering::SeqCst);
            }
        }
        async fn dock_visible(&self) -> bool {
            self.visible.load(Ordering::SeqCst)
        }
    }

    fn controller(shell: Arc<dyn DesktopShell>) -> DockVisibilityController {
        DockVisibilityController::new(shell, 3, Bus::new(16))
    }

    #[tokio::test]
    async fn test_show_settles_visible() {
        let mut dock = controller(Arc::new(HeadlessShell::new()));
        let t = dock.request_visible().await.unwrap();
        assert_eq!(dock.phase(), DockPhase::Showing);
        assert_eq!(dock.on_verify(t).await, None);
        assert_eq!(dock.phase(), DockPhase::Visible);
        assert_eq!(dock.request_visible().await, None);
    }

    #[tokio::test]
    async fn test_back_to_back_show_hide_settles_hidden() {
        let mut dock = controller(Arc::new(HeadlessShell::new()));
        let mut ticket = dock.request_visible().await;
        assert_eq!(dock.request_hidden().await, None);
        assert_eq!(dock.phase(), DockPhase::Hiding);

        let mut verifications = 0;
        while let Some(t) = ticket {
            verifications += 1;
            assert!(verifications <= 4, "must settle within bounded retries");
            ticket = dock.on_verify(t).await;
        }
        assert_eq!(dock.phase(), DockPhase::Hidden);
        assert!(!dock.state().transform_pending);
    }

    #[tokio::test]
    async fn test_stuck_shell_gives_up_after_bounded_retries() {
        let shell = Arc::new(StuckShell::default());
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let mut dock = DockVisibilityController::new(shell.clone(), 3, bus);

        let mut ticket = dock.request_visible().await;
        while let Some(t) = ticket {
            ticket = dock.on_verify(t).await;
        }
        assert_eq!(shell.requests.load(Ordering::SeqCst), 4);
        assert!(!dock.state().transform_pending);
        assert_eq!(dock.phase(), DockPhase::Hidden);

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::DockSyncFailure);
        assert_eq!(ev.attempt, Some(3));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_a_dropped_request() {
        let mut dock = controller(Arc::new(SlowShell::default()));
        let t1 = dock.request_visible().await.unwrap();
        let t2 = dock.on_verify(t1).await.unwrap();
        assert_eq!(dock.state().retries, 1);
        assert_eq!(dock.on_verify(t2).await, None);
        assert_eq!(dock.phase(), DockPhase::Visible);
    }

    #[tokio::test]
    async fn test_stale_ticket_is_ignored() {
        let mut dock = controller(Arc::new(SlowShell::default()));
        let t1 = dock.request_visible().await.unwrap();
        let _t2 = dock.on_verify(t1).await.unwrap();
        let before = dock.state();
        assert_eq!(dock.on_verify(t1).await, None);
        assert_eq!(dock.state(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_drives_verification_inline() {
        let mut dock = controller(Arc::new(HeadlessShell::new()));
        let t = dock.request_visible().await;
        assert!(dock.settle(t, Duration::from_millis(500)).await);
        let t = dock.request_hidden().await;
        assert!(dock.settle(t, Duration::from_millis(500)).await);
        assert_eq!(dock.phase(), DockPhase::Hidden);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hide_during_pending_show_reconciles_to_hidden() {
        let shell = Arc::new(HeadlessShell::new());
        let mut dock = controller(shell.clone());
        let armed = dock.request_visible().await.unwrap();
        assert_eq!(dock.request_hidden().await, None);

        let ticket = dock.reconcile().await;
        assert!(ticket.is_some());
        assert!(dock.settle(ticket, Duration::from_millis(10)).await);
        assert_eq!(dock.phase(), DockPhase::Hidden);
        assert!(!shell.dock_visible().await);
        assert_eq!(dock.on_verify(armed).await, None);
    }

    #[tokio::test]
    async fn test_reconcile_repairs_drift_and_is_quiet_when_in_sync() {
        let shell = Arc::new(HeadlessShell::new());
        let mut dock = controller(shell.clone());
        let t = dock.request_visible().await.unwrap();
        assert_eq!(dock.on_verify(t).await, None);
        assert_eq!(dock.reconcile().await, None);

        shell.set_dock_visible(false).await;
        let t = dock.reconcile().await.unwrap();
        assert_eq!(dock.phase(), DockPhase::Showing);
        assert!(shell.dock_visible().await);
        assert_eq!(dock.on_verify(t).await, None);
        assert_eq!(dock.phase(), DockPhase::Visible);
    }
}
