//! # lifeline
//!
//! **Lifeline** is a desktop launcher that starts one long-lived child process
//! (typically a web browser), supervises it for its whole life and keeps the
//! desktop shell (dock icon, windows) in sync with it.
//!
//! Only one launcher instance is authoritative per user session. Later
//! invocations forward their request (launch, open paths, activate) to it and
//! exit.
//!
//! ## Architecture
//! ```text
//!  lifeline <paths>            lifeline <paths>          lifeline --status
//!        │                            │                         │
//!        ▼                            ▼                         ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ InstanceCoordinator: flock(<runtime>/<service>.lock)                 │
//! │   Primary ─► Session              Secondary ─► Connector ─► forward  │
//! └──────┬───────────────────────────────────────────────────────────────┘
//!        ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │ Session (one task, one mpsc queue)                                   │
//! │   ChildSupervisor ── launch / classify exits / relaunch / adopt      │
//! │   ExitWatcher     ── pidfd | kqueue | polling  ─► ChildExited        │
//! │   DockVisibilityController ── request + delayed verification         │
//! │   WindowListCache ── TTL-bounded window list for activation          │
//! │   StateStore      ── last pid / last crash across runs               │
//! └──────┬───────────────────────────────────────────────────────────────┘
//!        │ publish(Event)
//!        ▼
//!       Bus ─► SubscriberSet ─► LogWriter, ShellNotifier, user subscribers
//! ```
//!
//! ### Child lifecycle
//! ```text
//! Idle ─► Launching ─► Running ─┬─ exit 0       ─► ExitConfirmed
//!                               └─ signal / ≠0  ─► CrashConfirmed
//!
//! verdict:
//!   early exit + surviving same-executable process ─► Adopted (keep running)
//!   crash within recent_crash_window of previous   ─► relaunch suppressed
//!   RestartPolicy allows                            ─► Relaunch after backoff
//!   otherwise                                       ─► Terminate | Idle
//! ```
//!
//! ## Features
//! | Area              | Description                                               | Key types / traits                          |
//! |-------------------|-----------------------------------------------------------|---------------------------------------------|
//! | **Session**       | Owns the child, dock and windows; graceful teardown.      | [`Session`], [`SessionBuilder`]             |
//! | **Supervision**   | Launch, exit classification, anti-flap, orphan adoption.  | [`ChildSupervisor`], [`ExitVerdict`]        |
//! | **Exit watching** | Kernel notification with polling fallback.                | [`ExitWatcher`], [`ExitWatchStrategy`]      |
//! | **Single instance** | Election, request forwarding with backoff.              | [`InstanceCoordinator`], [`Request`]        |
//! | **Desktop**       | Dock visibility and window activation.                    | [`DesktopShell`], [`WindowManager`]         |
//! | **Subscriber API**| Hook into lifecycle events.                               | [`Subscribe`], [`Event`]                    |
//! | **Policies**      | Relaunch and connection backoff.                          | [`RestartPolicy`], [`BackoffPolicy`]        |
//! | **Configuration** | Defaults, TOML file, CLI overrides.                       | [`Config`]                                  |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use lifeline::{Config, LogWriter, Request, SessionBuilder, Subscribe};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config {
//!         executable: Some("/usr/bin/firefox".into()),
//!         ..Config::default()
//!     };
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!
//!     SessionBuilder::new(cfg)
//!         .with_subscribers(subs)
//!         .build()?
//!         .run(Some(Request::Launch))
//!         .await?;
//!     Ok(())
//! }
//! ```

#[cfg(not(unix))]
compile_error!("lifeline supervises processes through unix APIs and only builds on unix targets");

mod core;
mod dock;
mod error;
mod events;
mod instance;
mod policies;
mod shell;
mod state;
mod subscribers;
mod supervisor;
pub(crate) mod sys;
mod watch;
mod windows;

// ---- Public re-exports ----

pub use core::{Config, Session, SessionBuilder, SessionHandle, wait_for_shutdown_signal};
pub use dock::{DockPhase, DockState, DockVisibilityController, VerifyTicket};
pub use error::{
    ConfigError, ConnectionError, LaunchError, RuntimeError, StateError, WatchError,
};
pub use events::{Bus, Event, EventKind};
pub use instance::{
    Connection, ConnectionState, Connector, Election, InstanceCoordinator, InstanceRole,
    Registration, Request, RequestSink, Response, serve,
};
pub use policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
pub use shell::{DesktopShell, HeadlessShell};
pub use state::{PersistedState, StateStore};
pub use subscribers::{LogWriter, ShellNotifier, Subscribe, SubscriberSet};
pub use supervisor::{
    ChildProcess, ChildState, ChildSupervisor, CrashRecord, ExitAction, ExitClass, ExitSink,
    ExitVerdict, Phase,
};
pub use watch::{ExitEvent, ExitWatch, ExitWatchStrategy, ExitWatcher, PollStrategy, select_strategy};
pub use windows::{NoopWindowManager, WindowId, WindowListCache, WindowManager, WmctrlWindowManager};
