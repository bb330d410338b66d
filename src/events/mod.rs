//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Session`, `ChildSupervisor`, `ExitWatcher`, `InstanceCoordinator`,
//!   `DockVisibilityController` (through the session), `SubscriberSet` workers.
//! - **Consumers**: the session's subscriber listener, which fans out to
//!   [`SubscriberSet`](crate::SubscriberSet).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
