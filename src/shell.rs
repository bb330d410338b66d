//! # Desktop-shell collaborator.
//!
//! The host desktop shell (dock, workspace manager) is an external collaborator:
//! lifeline only needs to request dock-icon visibility, read back the confirmed
//! visibility, and post fire-and-forget notifications.
//!
//! [`HeadlessShell`] is the default implementation: it confirms visibility
//! immediately and records notifications through `tracing`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

/// Contract for the desktop shell hosting the launcher.
///
/// Visibility is asynchronous: `set_dock_visible` only *requests* a change,
/// `dock_visible` reports what the shell actually shows.
#[async_trait]
pub trait DesktopShell: Send + Sync + 'static {
    /// Requests the dock icon to be shown or hidden.
    async fn set_dock_visible(&self, visible: bool);

    /// Returns the visibility the shell currently confirms.
    async fn dock_visible(&self) -> bool;

    /// The child was launched.
    async fn post_launch_notification(&self, _pid: u32) {}

    /// The child terminated.
    async fn post_termination_notification(&self, _pid: u32) {}

    /// Something the shell may display changed (running state, pid).
    async fn notify_state_change(&self, _running: bool) {}
}

/// Shell without a dock: visibility requests are confirmed instantly.
#[derive(Debug, Default)]
pub struct HeadlessShell {
    visible: AtomicBool,
}

impl HeadlessShell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DesktopShell for HeadlessShell {
    async fn set_dock_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    async fn dock_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    async fn post_launch_notification(&self, pid: u32) {
        tracing::debug!(pid, "shell: launch notification");
    }

    async fn post_termination_notification(&self, pid: u32) {
        tracing::debug!(pid, "shell: termination notification");
    }

    async fn notify_state_change(&self, running: bool) {
        tracing::debug!(running, "shell: state change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_headless_confirms_immediately() {
        let shell = HeadlessShell::new();
        assert!(!shell.dock_visible().await);
        shell.set_dock_visible(true).await;
        assert!(shell.dock_visible().await);
    }
}
