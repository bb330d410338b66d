//! # Window-manager collaborator and window list cache.
//!
//! Activation requests ask the window manager to raise the child's windows.
//! Listing windows is expensive (an X round trip or a subprocess), so the
//! session keeps a ttl-bounded [`WindowListCache`] and only consults the
//! manager when the cached list has expired or was invalidated.

mod cache;
mod wmctrl;

pub use cache::WindowListCache;
pub use wmctrl::WmctrlWindowManager;

use async_trait::async_trait;

/// Opaque window handle as reported by the window manager.
pub type WindowId = u64;

/// Contract for the window-manager capability.
#[async_trait]
pub trait WindowManager: Send + Sync + 'static {
    /// Raises and focuses the windows owned by `pid`. Returns whether any was activated.
    async fn activate_windows(&self, pid: u32) -> bool;

    /// Lists the windows owned by `pid`, in stacking order.
    async fn list_window_ids(&self, pid: u32) -> Vec<WindowId>;
}

/// Window manager for headless sessions: owns no windows, activates nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWindowManager;

#[async_trait]
impl WindowManager for NoopWindowManager {
    async fn activate_windows(&self, _pid: u32) -> bool {
        false
    }

    async fn list_window_ids(&self, _pid: u32) -> Vec<WindowId> {
        Vec::new()
    }
}
