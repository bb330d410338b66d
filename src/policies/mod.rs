//! Retry and restart policies.
//!
//! ## Contents
//! - [`RestartPolicy`] whether the child is relaunched after an exit
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so concurrent launchers do not retry in lockstep
//!
//! ## Wiring
//! ```text
//! Config { restart, relaunch_backoff, connect_backoff, connect_attempts }
//!   ├─► supervisor::ChildSupervisor  restart + relaunch_backoff after an exit
//!   └─► instance::InstanceCoordinator connect_backoff between connection probes
//! ```

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::RestartPolicy;
