//! # ChildSupervisor: launch, exit classification, orphan handling, termination.
//!
//! ```text
//! Idle ──launch()──► Launching ──spawned──► Running ──on_exit()──► ExitConfirmed
//!  ▲                    │                      │                 └► CrashConfirmed
//!  └──── spawn error ───┘                      └─ adopt(orphan) ─► Running
//!
//! any phase ──shutdown()──► Terminated   (late exit events are discarded)
//! ```
//!
//! The supervisor never blocks and never awaits the child: each launched pid
//! is registered with the [`ExitWatcher`] and a small forwarder task hands the
//! resulting [`ExitEvent`] to the [`ExitSink`] (the session queue). The same
//! forwarder updates a `watch` channel so that [`ChildSupervisor::wait_for_exit`]
//! completes without the coordination loop running.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::time::Instant;

use crate::core::Config;
use crate::error::LaunchError;
use crate::events::{Bus, Event, EventKind};
use crate::supervisor::orphans;
use crate::supervisor::verdict::{CrashRecord, ExitAction, ExitClass, ExitVerdict};
use crate::sys;
use crate::watch::{ExitEvent, ExitWatcher};

/// Receives exit events of supervised children (usually the session queue).
pub type ExitSink = Arc<dyn Fn(ExitEvent) + Send + Sync>;

/// Lifecycle state of one child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    /// Spawned, not yet registered with the exit watcher.
    Starting,
    /// Running and watched.
    Running,
    /// Exited with code 0.
    ExitedClean,
    /// Exited with a signal or a non-zero code.
    ExitedCrashed,
    /// No longer watched; fate unknown.
    Unknown,
}

/// Supervisor state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Launching,
    Running,
    ExitConfirmed,
    CrashConfirmed,
    Terminated,
}

/// A launched (or adopted) child.
#[derive(Debug, Clone)]
pub struct ChildProcess {
    pub pid: u32,
    /// Canonical executable path (the identity used for orphan detection).
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub launched_at: Instant,
    /// Wall-clock launch time, for persistence.
    pub launched_wall: SystemTime,
    pub state: ChildState,
}

/// Owns the child process and its lifecycle state machine.
pub struct ChildSupervisor {
    cfg: Config,
    watcher: Arc<ExitWatcher>,
    sink: ExitSink,
    bus: Bus,

    phase: Phase,
    child: Option<ChildProcess>,
    watching: bool,
    crash: CrashRecord,
    consecutive_crashes: u32,
    launches: u32,
    /// Same-executable processes that predate our launch; never orphans of ours.
    preexisting: HashSet<u32>,

    exit_tx: watch::Sender<Option<ExitEvent>>,
}

impl ChildSupervisor {
    /// Creates an idle supervisor. Exits of launched children are passed to `sink`.
    pub fn new(cfg: Config, watcher: Arc<ExitWatcher>, sink: ExitSink, bus: Bus) -> Self {
        let crash = CrashRecord::new(cfg.crash_window());
        let (exit_tx, _) = watch::channel(None);
        Self {
            cfg,
            watcher,
            sink,
            bus,
            phase: Phase::Idle,
            child: None,
            watching: false,
            crash,
            consecutive_crashes: 0,
            launches: 0,
            preexisting: HashSet::new(),
            exit_tx,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The current or most recent child.
    pub fn child(&self) -> Option<&ChildProcess> {
        self.child.as_ref()
    }

    /// Pid of the child while it is running.
    pub fn running_pid(&self) -> Option<u32> {
        match self.phase {
            Phase::Running => self.child.as_ref().map(|c| c.pid),
            _ => None,
        }
    }

    /// Number of launches performed by this supervisor.
    pub fn launches(&self) -> u32 {
        self.launches
    }

    /// Mutable access to the anti-flap record (seeded from persisted state).
    pub fn crash_record_mut(&mut self) -> &mut CrashRecord {
        &mut self.crash
    }

    /// Spawns `path` with `args` and starts watching it.
    ///
    /// `path` must be an existing executable file; `args` are passed verbatim.
    /// The launcher's environment is inherited plus the configured overrides.
    /// On error the phase stays (or returns to) `Idle`.
    pub fn launch(&mut self, path: &Path, args: &[String]) -> Result<ChildProcess, LaunchError> {
        match self.phase {
            Phase::Terminated => return Err(LaunchError::Terminated),
            Phase::Running | Phase::Launching => {
                let pid = self.child.as_ref().map(|c| c.pid).unwrap_or(0);
                return Err(LaunchError::AlreadyRunning { pid });
            }
            _ => {}
        }

        if let Err(err) = validate(path) {
            self.launch_failed(&err);
            return Err(err);
        }

        let executable = orphans::identity(path);
        self.preexisting = orphans::processes_running(&executable, &HashSet::new())
            .into_iter()
            .collect();

        self.phase = Phase::Launching;
        let spawned = Command::new(path)
            .args(args)
            .envs(&self.cfg.env)
            .stdin(Stdio::null())
            .spawn();
        // The std handle is dropped on purpose: the exit watcher reaps the pid.
        let pid = match spawned {
            Ok(child) => child.id(),
            Err(source) => {
                self.phase = Phase::Idle;
                let err = LaunchError::Spawn {
                    path: path.to_path_buf(),
                    source,
                };
                self.launch_failed(&err);
                return Err(err);
            }
        };

        self.launches += 1;
        let mut child = ChildProcess {
            pid,
            executable,
            args: args.to_vec(),
            launched_at: Instant::now(),
            launched_wall: SystemTime::now(),
            state: ChildState::Starting,
        };
        self.arm(pid);
        child.state = ChildState::Running;
        self.child = Some(child.clone());
        self.phase = Phase::Running;

        self.bus.publish(
            Event::new(EventKind::ChildLaunched)
                .with_pid(pid)
                .with_attempt(self.launches)
                .with_source(path.display().to_string()),
        );
        Ok(child)
    }

    fn launch_failed(&self, err: &LaunchError) {
        self.bus.publish(
            Event::new(EventKind::LaunchFailed)
                .with_source(err.as_label())
                .with_reason(err.to_string()),
        );
    }

    /// Registers `pid` with the watcher and forwards its exit.
    fn arm(&mut self, pid: u32) {
        let watch = self.watcher.watch_or_poll(pid);
        let sink = Arc::clone(&self.sink);
        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            if let Some(ev) = watch.await {
                exit_tx.send_replace(Some(ev));
                sink(ev);
            }
        });
        self.watching = true;
    }

    /// Stops watching the current child. Later exit events for it are ignored.
    /// Idempotent.
    pub fn cancel_watch(&mut self) {
        if let Some(child) = self.child.as_mut() {
            self.watcher.cancel(child.pid);
            if self.watching && self.phase == Phase::Running {
                child.state = ChildState::Unknown;
            }
        }
        self.watching = false;
    }

    /// Classifies an exit of the tracked child.
    ///
    /// Returns `None` (and changes nothing) for events about other pids, after
    /// [`cancel_watch`](Self::cancel_watch), or once the supervisor is terminated.
    pub fn on_exit(&mut self, ev: ExitEvent) -> Option<ExitVerdict> {
        if self.phase != Phase::Running || !self.watching {
            tracing::debug!(pid = ev.pid, phase = ?self.phase, "discarding exit event");
            return None;
        }
        let child = self.child.as_ref()?;
        if child.pid != ev.pid {
            tracing::debug!(pid = ev.pid, tracked = child.pid, "exit of untracked pid");
            return None;
        }

        let now = Instant::now();
        let uptime = now.saturating_duration_since(child.launched_at);
        let early = uptime < self.cfg.settle;
        let executable = child.executable.clone();
        self.watching = false;
        self.watcher.cancel(ev.pid);

        if early && self.cfg.adopt_orphans {
            let mut exclude = self.preexisting.clone();
            exclude.insert(ev.pid);
            if let Some(&survivor) = orphans::processes_running(&executable, &exclude).first() {
                self.adopt_unchecked(survivor, executable);
                return Some(ExitVerdict {
                    pid: ev.pid,
                    class: ExitClass::Clean,
                    early,
                    relaunch_suppressed: false,
                    uptime,
                    action: ExitAction::Adopted { pid: survivor },
                });
            }
        }

        // Published only once the exit is final; a hand-off reports ChildAdopted.
        self.bus.publish(
            Event::new(EventKind::ChildExited)
                .with_pid(ev.pid)
                .with_exit_code(ev.exit_code)
                .with_signal(ev.signal),
        );

        let crashed = ev.signaled() || ev.exit_code.is_some_and(|c| c != 0);
        let (class, relaunch_suppressed, action) = if crashed {
            self.phase = Phase::CrashConfirmed;
            self.set_child_state(ChildState::ExitedCrashed);
            let suppressed = self.crash.record(now);
            self.consecutive_crashes = self.consecutive_crashes.saturating_add(1);

            let reason = if early { "early crash" } else { "crash" };
            self.bus.publish(
                Event::new(EventKind::CrashDetected)
                    .with_pid(ev.pid)
                    .with_exit_code(ev.exit_code)
                    .with_signal(ev.signal)
                    .with_reason(reason),
            );

            let action = if suppressed {
                self.bus.publish(
                    Event::new(EventKind::RelaunchSuppressed)
                        .with_pid(ev.pid)
                        .with_reason("crashed again inside the recent crash window"),
                );
                self.terminal_action()
            } else if self.cfg.restart.relaunch_after_crash() {
                ExitAction::Relaunch {
                    delay: self.cfg.relaunch_backoff.next(self.consecutive_crashes - 1),
                }
            } else {
                self.terminal_action()
            };
            (ExitClass::Crashed, suppressed, action)
        } else {
            self.phase = Phase::ExitConfirmed;
            self.set_child_state(ChildState::ExitedClean);
            self.consecutive_crashes = 0;
            let action = if self.cfg.restart.relaunch_after_clean_exit() {
                ExitAction::Relaunch {
                    delay: self.cfg.relaunch_backoff.next(0),
                }
            } else {
                self.terminal_action()
            };
            (ExitClass::Clean, false, action)
        };

        Some(ExitVerdict {
            pid: ev.pid,
            class,
            early,
            relaunch_suppressed,
            uptime,
            action,
        })
    }

    fn terminal_action(&self) -> ExitAction {
        if self.cfg.terminate_with_child {
            ExitAction::Terminate
        } else {
            ExitAction::Idle
        }
    }

    fn set_child_state(&mut self, state: ChildState) {
        if let Some(c) = self.child.as_mut() {
            c.state = state;
        }
    }

    /// Processes running the child's executable other than the tracked pid,
    /// the launcher, and processes that predate the launch. Reported only.
    pub fn check_for_orphans(&self) -> Vec<u32> {
        let Some(child) = &self.child else {
            return Vec::new();
        };
        let mut exclude = self.preexisting.clone();
        if self.phase == Phase::Running {
            exclude.insert(child.pid);
        }
        let found = orphans::processes_running(&child.executable, &exclude);
        if !found.is_empty() {
            let list = found
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            self.bus
                .publish(Event::new(EventKind::OrphansFound).with_reason(list));
        }
        found
    }

    /// Takes over tracking of `pid`, which must run the child's executable.
    ///
    /// Returns `false` when there is no prior child to compare with, the
    /// executable differs, a child is already running, or the supervisor is
    /// terminated.
    pub fn adopt(&mut self, pid: u32) -> bool {
        if matches!(self.phase, Phase::Running | Phase::Terminated) {
            return false;
        }
        let Some(executable) = self.child.as_ref().map(|c| c.executable.clone()) else {
            return false;
        };
        if sys::executable_of(pid).is_none_or(|exe| exe != executable) {
            return false;
        }
        self.adopt_unchecked(pid, executable);
        true
    }

    /// Starts tracking an instance of `path` that is already running, so that
    /// a launcher started next to a running browser supervises it instead of
    /// spawning a second one.
    ///
    /// Returns the adopted pid, or `None` when a child is tracked already, the
    /// supervisor is terminated, or no such process exists.
    pub fn adopt_existing(&mut self, path: &Path) -> Option<u32> {
        if matches!(
            self.phase,
            Phase::Running | Phase::Launching | Phase::Terminated
        ) {
            return None;
        }
        let executable = orphans::identity(path);
        let pid = *orphans::processes_running(&executable, &HashSet::new()).first()?;
        self.preexisting.clear();
        self.adopt_unchecked(pid, executable);
        Some(pid)
    }

    fn adopt_unchecked(&mut self, pid: u32, executable: PathBuf) {
        let args = self.child.as_ref().map(|c| c.args.clone()).unwrap_or_default();
        self.child = Some(ChildProcess {
            pid,
            executable,
            args,
            launched_at: Instant::now(),
            launched_wall: SystemTime::now(),
            state: ChildState::Running,
        });
        self.phase = Phase::Running;
        self.arm(pid);
        self.bus.publish(Event::new(EventKind::ChildAdopted).with_pid(pid));
    }

    /// Waits up to `timeout` for the running child to exit.
    ///
    /// Returns `true` if it exited (or nothing is running). Only the calling
    /// task waits; exit detection keeps running elsewhere.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let Some(pid) = self.running_pid() else {
            return true;
        };
        let mut rx = self.exit_tx.subscribe();
        let exited = rx.wait_for(|last| last.is_some_and(|e| e.pid == pid));
        matches!(tokio::time::timeout(timeout, exited).await, Ok(Ok(_)))
    }

    /// Stops the running child: SIGTERM, bounded wait, then SIGKILL.
    ///
    /// Returns `true` once the child is gone. The exit itself is still
    /// delivered to the sink.
    pub async fn terminate_child(&mut self) -> bool {
        let Some(pid) = self.running_pid() else {
            return true;
        };
        let stop = self.cfg.child_stop_timeout;

        tracing::info!(pid, "stopping child");
        if let Err(e) = sys::send_signal(pid, libc::SIGTERM) {
            tracing::warn!(pid, error = %e, "SIGTERM failed");
        }
        if self.wait_for_exit(stop).await {
            return true;
        }

        tracing::warn!(pid, timeout = ?stop, "child ignored SIGTERM; killing");
        if let Err(e) = sys::send_signal(pid, libc::SIGKILL) {
            tracing::warn!(pid, error = %e, "SIGKILL failed");
        }
        self.wait_for_exit(stop).await
    }

    /// Cancels every watch and refuses further launches. Idempotent.
    pub fn shutdown(&mut self) {
        if self.phase == Phase::Terminated {
            return;
        }
        self.cancel_watch();
        self.watcher.cancel_all();
        self.phase = Phase::Terminated;
    }
}

fn validate(path: &Path) -> Result<(), LaunchError> {
    match sys::is_executable(path) {
        Ok(true) => Ok(()),
        Ok(false) => Err(LaunchError::NotExecutable {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LaunchError::NotFound {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(LaunchError::Spawn {
            path: path.to_path_buf(),
            source,
        }),
    }
}
