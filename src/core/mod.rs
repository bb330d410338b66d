//! Runtime core: configuration and the coordination session.
//!
//! The public API of this module is [`Config`], [`SessionBuilder`] and
//! [`Session`].
//!
//! Internal modules:
//! - [`session`]: the single task that owns the supervisor, dock and window cache;
//! - [`scheduler`]: cancellable timers that post back into the session queue;
//! - [`resume`]: detection of a resume from system sleep;
//! - [`shutdown`]: OS termination signal handling.

mod builder;
mod config;
mod resume;
mod scheduler;
mod session;
mod shutdown;

pub use builder::SessionBuilder;
pub use config::Config;
pub use session::{Session, SessionHandle};
pub use shutdown::wait_for_shutdown_signal;
