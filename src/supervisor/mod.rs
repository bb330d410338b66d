//! # Child process supervision.
//!
//! [`ChildSupervisor`] launches the child, registers it with the exit watcher,
//! classifies its exit and tells the coordination context what to do next
//! ([`ExitAction`]).
//!
//! ## Classification
//! | Exit                                   | Class     | Follow-up                                      |
//! |----------------------------------------|-----------|------------------------------------------------|
//! | code 0 (or status unobservable)        | `Clean`   | relaunch under `Always`, else terminate / idle |
//! | signal or non-zero code                | `Crashed` | relaunch under `OnFailure`/`Always`            |
//! | crash ≤ `recent_crash_window` after the previous one | `Crashed`, suppressed | terminate / idle   |
//! | any exit inside `settle` with a surviving same-executable process | adopted | keep running |
//!
//! "Terminate" applies when `terminate_with_child` is set; otherwise the
//! session idles until another request launches the child.

mod child;
mod orphans;
mod verdict;

pub use child::{ChildProcess, ChildState, ChildSupervisor, ExitSink, Phase};
pub use verdict::{CrashRecord, ExitAction, ExitClass, ExitVerdict};
