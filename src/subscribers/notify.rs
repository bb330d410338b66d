//! # ShellNotifier: desktop-shell notifications
//!
//! Translates child lifecycle events into the shell's fire-and-forget
//! notifications. Runs on its own subscriber worker, so a slow shell never
//! delays the session loop.
//!
//! ```text
//! ChildLaunched / ChildAdopted ─► post_launch_notification + notify_state_change(true)
//! ChildExited                  ─► post_termination_notification + notify_state_change(false)
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::shell::DesktopShell;
use crate::subscribers::Subscribe;

/// Forwards lifecycle events to a [`DesktopShell`].
pub struct ShellNotifier {
    shell: Arc<dyn DesktopShell>,
}

impl ShellNotifier {
    #[must_use]
    pub fn new(shell: Arc<dyn DesktopShell>) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl Subscribe for ShellNotifier {
    async fn on_event(&self, e: &Event) {
        let Some(pid) = e.pid else { return };
        match e.kind {
            EventKind::ChildLaunched | EventKind::ChildAdopted => {
                self.shell.post_launch_notification(pid).await;
                self.shell.notify_state_change(true).await;
            }
            EventKind::ChildExited => {
                self.shell.post_termination_notification(pid).await;
                self.shell.notify_state_change(false).await;
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "shell-notifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl DesktopShell for Recorder {
        async fn set_dock_visible(&self, _visible: bool) {}
        async fn dock_visible(&self) -> bool {
            false
        }
        async fn post_launch_notification(&self, pid: u32) {
            self.0.lock().unwrap().push(format!("launch:{pid}"));
        }
        async fn post_termination_notification(&self, pid: u32) {
            self.0.lock().unwrap().push(format!("terminate:{pid}"));
        }
        async fn notify_state_change(&self, running: bool) {
            self.0.lock().unwrap().push(format!("running:{running}"));
        }
    }

    #[tokio::test]
    async fn test_maps_lifecycle_to_notifications() {
        let shell = Arc::new(Recorder::default());
        let notifier = ShellNotifier::new(shell.clone());

        notifier
            .on_event(&Event::new(EventKind::ChildLaunched).with_pid(7))
            .await;
        notifier
            .on_event(&Event::new(EventKind::CrashDetected).with_pid(7))
            .await;
        notifier
            .on_event(&Event::new(EventKind::ChildExited).with_pid(7))
            .await;

        let seen = shell.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec!["launch:7", "running:true", "terminate:7", "running:false"]
        );
    }
}
