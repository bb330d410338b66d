//! # Event subscribers for the lifeline runtime.
//!
//! ## Architecture
//! ```text
//!   Session / Supervisor / Watcher ── publish(Event) ──► Bus
//!                                                          │
//!                                         session listener ─► SubscriberSet::emit
//!                                                                ├──► LogWriter      (tracing records)
//!                                                                ├──► ShellNotifier  (desktop shell)
//!                                                                └──► user subscribers
//! ```

mod log;
mod notify;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use notify::ShellNotifier;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
