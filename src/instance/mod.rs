//! # Single-instance coordination.
//!
//! Every launcher invocation runs an election on a well-known registration:
//!
//! ```text
//! try_become_primary()
//!   ├─ flock(<runtime_dir>/<service>.lock) ok ─► Primary: bind <service>.sock, serve requests
//!   └─ lock held elsewhere                     ─► Secondary:
//!         connect_to_primary()  (200ms, 400ms, 800ms ... up to N probes)
//!           ├─ connected ─► forward(Request) ─► exit
//!           └─ exhausted ─► launch an independent child
//! ```
//!
//! The lock decides the election; the socket is only the request channel. A
//! secondary that probes while the primary is still binding simply retries.

mod connection;
mod coordinator;
mod listener;
mod protocol;

pub use connection::{Connection, ConnectionState, Connector};
pub use coordinator::{Election, InstanceCoordinator, InstanceRole, Registration};
pub use listener::{RequestSink, serve};
pub use protocol::{Request, Response};
