//! # Exit-notification strategy interface.
//!
//! A strategy turns a pid into a future that resolves once, when the process
//! exits. The watcher picks one strategy at startup by capability probing
//! ([`select_strategy`](super::select_strategy)) and never branches on the
//! platform at call sites.

use futures::future::BoxFuture;

use crate::error::WatchError;
use crate::watch::ExitEvent;

/// Contract for OS-level exit notification.
pub trait ExitWatchStrategy: Send + Sync + 'static {
    /// Short name for logs (`"pidfd"`, `"kqueue"`, `"poll"`).
    fn name(&self) -> &'static str;

    /// Subscribes to the exit of `pid`.
    ///
    /// The returned future resolves exactly once. A pid that is invalid or
    /// already gone resolves immediately. Fails with
    /// [`WatchError::MonitorUnavailable`] when the primitive cannot be used.
    fn subscribe(&self, pid: u32) -> Result<BoxFuture<'static, ExitEvent>, WatchError>;

    /// Releases monitor resources (threads, descriptors). Idempotent.
    fn shutdown(&self) {}
}
