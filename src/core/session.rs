//! # Session: the single coordination context.
//!
//! The [`Session`] owns the [`ChildSupervisor`], the dock controller and the
//! window cache. Everything that can change them arrives as a [`Message`] on
//! one queue and is handled by one task, so none of that state is shared.
//!
//! ```text
//!  exit watcher ──ChildExited──┐
//!  request listener ──Request──┤
//!  scheduler ──DockVerify/Relaunch──► [ mpsc queue ] ──► Session::handle()
//!  resume detector ──Resumed───┤                              │
//!  OS signals ──Shutdown───────┘                              │
//!                                                             ▼
//!                                  supervisor / dock / windows / persisted state
//!
//! Stop ─► teardown (bounded by grace):
//!   1. stop the child if it still runs   (SIGTERM, wait, SIGKILL)
//!   2. cancel timers and exit watches    (late events are discarded)
//!   3. hide the dock (re-issued if a show is still pending) and verify
//!   4. stop the listener, release the primary registration
//! ```
//!
//! Events are published on the [`Bus`] and fanned out to subscribers by a
//! listener task that is drained before [`Session::run`] returns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::scheduler::{Scheduler, Timer};
use crate::core::{Config, resume, shutdown};
use crate::dock::{DockVisibilityController, VerifyTicket};
use crate::error::{LaunchError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::instance::{self, Registration, Request, RequestSink, Response};
use crate::state::{StateStore, unix_secs};
use crate::subscribers::SubscriberSet;
use crate::supervisor::{ChildSupervisor, ExitAction, ExitClass};
use crate::sys;
use crate::watch::ExitEvent;
use crate::windows::{WindowListCache, WindowManager};

/// Everything the coordination context reacts to.
pub(crate) enum Message {
    ChildExited(ExitEvent),
    Request {
        request: Request,
        reply: Option<oneshot::Sender<Response>>,
    },
    DockVerify(VerifyTicket),
    Relaunch,
    Resumed {
        slept: Duration,
    },
    Shutdown {
        reason: String,
    },
}

enum Flow {
    Continue,
    Stop(String),
}

/// Cloneable handle for talking to a running session from other tasks.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl SessionHandle {
    /// Sends `request` and waits for the answer. `None` once the session is gone.
    pub async fn request(&self, request: Request) -> Option<Response> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Request {
                request,
                reply: Some(reply),
            })
            .ok()?;
        rx.await.ok()
    }

    /// Asks the session to tear down.
    pub fn shutdown(&self, reason: impl Into<String>) {
        let _ = self.tx.send(Message::Shutdown {
            reason: reason.into(),
        });
    }
}

/// The primary's coordination context. Built by [`SessionBuilder`](crate::core::SessionBuilder).
pub struct Session {
    pub(super) cfg: Config,
    pub(super) executable: PathBuf,
    pub(super) bus: Bus,
    pub(super) events: Option<broadcast::Receiver<Event>>,
    pub(super) subs: Option<SubscriberSet>,
    pub(super) supervisor: ChildSupervisor,
    pub(super) dock: DockVisibilityController,
    pub(super) windows: WindowListCache,
    pub(super) wm: Arc<dyn WindowManager>,
    pub(super) state: StateStore,
    pub(super) scheduler: Scheduler,
    pub(super) tx: mpsc::UnboundedSender<Message>,
    pub(super) rx: mpsc::UnboundedReceiver<Message>,
    pub(super) registration: Option<Registration>,
    pub(super) token: CancellationToken,
    pub(super) os_signals: bool,
}

impl Session {
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.tx.clone(),
        }
    }

    /// Runs until the session stops, then tears down.
    ///
    /// `initial` is the request this invocation was started with (usually
    /// `Launch` or `Open`). A failing initial launch ends the session with
    /// [`RuntimeError::Startup`].
    pub async fn run(mut self, initial: Option<Request>) -> Result<(), RuntimeError> {
        let fanout_stop = CancellationToken::new();
        let fanout = self.start_subscribers(fanout_stop.clone());
        self.seed_crash_record();
        self.start_request_listener();
        if self.os_signals {
            self.start_signal_listener();
        }
        if let Some(every) = self.cfg.resume_check() {
            resume::spawn(every, self.cfg.resume_gap, self.tx.clone(), self.token.child_token());
        }

        let mut startup_error = None;
        let mut stop = None;
        if let Some(request) = initial {
            match self.startup(request).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop(reason)) => stop = Some(reason),
                Err(e) => {
                    stop = Some(format!("startup failed: {e}"));
                    startup_error = Some(e);
                }
            }
        }

        let reason = match stop {
            Some(r) => r,
            None => loop {
                let Some(msg) = self.rx.recv().await else {
                    break "queue closed".to_string();
                };
                if let Flow::Stop(reason) = self.handle_message(msg).await {
                    break reason;
                }
            },
        };

        let result = self.teardown(&reason).await;

        fanout_stop.cancel();
        if let Some(task) = fanout {
            let _ = task.await;
        }

        match startup_error {
            Some(e) => Err(RuntimeError::Startup(e)),
            None => result,
        }
    }

    /// Forwards bus events to the subscribers; drains and shuts them down on cancel.
    fn start_subscribers(&mut self, token: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = self.events.take()?;
        let subs = self.subs.take()?;
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => subs.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "event listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = token.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            subs.emit(&ev);
                        }
                        break;
                    }
                }
            }
            subs.shutdown().await;
        }))
    }

    /// Seeds the anti-flap record with a crash persisted by an earlier run.
    fn seed_crash_record(&mut self) {
        let persisted = match self.state.load() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring persisted state");
                return;
            }
        };
        let (Some(ago), Some(window)) = (
            persisted.since_last_crash(SystemTime::now()),
            self.cfg.crash_window(),
        ) else {
            return;
        };
        if ago <= window {
            tracing::info!(?ago, "previous run crashed recently");
            self.supervisor.crash_record_mut().seed(ago);
        }
    }

    fn start_request_listener(&mut self) {
        let Some(listener) = self.registration.as_mut().and_then(|r| r.take_listener()) else {
            return;
        };
        let tx = self.tx.clone();
        let sink: RequestSink = Arc::new(move |request, reply| {
            tx.send(Message::Request {
                request,
                reply: Some(reply),
            })
            .is_ok()
        });
        if let Err(e) = instance::serve(listener, sink, self.token.child_token()) {
            tracing::warn!(error = %e, "cannot serve secondary requests");
        }
    }

    fn start_signal_listener(&self) {
        let tx = self.tx.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                sig = shutdown::wait_for_shutdown_signal() => match sig {
                    Ok(name) => {
                        let _ = tx.send(Message::Shutdown { reason: format!("received {name}") });
                    }
                    Err(e) => tracing::warn!(error = %e, "cannot listen for OS signals"),
                },
            }
        });
    }

    async fn startup(&mut self, request: Request) -> Result<Flow, LaunchError> {
        match request {
            Request::Open { paths } => self.launch_child(&paths).await.map(|_| Flow::Continue),
            Request::Launch | Request::Activate => {
                self.launch_child(&[]).await.map(|_| Flow::Continue)
            }
            Request::Status => Ok(Flow::Continue),
            Request::Terminate => Ok(Flow::Stop("terminate requested".into())),
        }
    }

    async fn handle_message(&mut self, msg: Message) -> Flow {
        match msg {
            Message::ChildExited(ev) => self.on_child_exited(ev).await,
            Message::Request { request, reply } => {
                self.bus
                    .publish(Event::new(EventKind::RequestReceived).with_reason(request.name()));
                let (flow, response) = self.handle_request(request).await;
                if let Some(reply) = reply {
                    let _ = reply.send(response);
                }
                flow
            }
            Message::DockVerify(ticket) => {
                if let Some(next) = self.dock.on_verify(ticket).await {
                    self.arm_dock(next);
                }
                Flow::Continue
            }
            Message::Relaunch => self.on_relaunch().await,
            Message::Resumed { slept } => self.on_resumed(slept).await,
            Message::Shutdown { reason } => Flow::Stop(reason),
        }
    }

    async fn handle_request(&mut self, request: Request) -> (Flow, Response) {
        let running = self.supervisor.running_pid();
        match request {
            Request::Status => (
                Flow::Continue,
                Response::Status {
                    running: running.is_some(),
                    pid: running,
                },
            ),
            Request::Terminate => (Flow::Stop("terminate requested".into()), Response::Ack),
            Request::Launch | Request::Activate => match running {
                Some(pid) => {
                    self.activate(pid).await;
                    (Flow::Continue, Response::Ack)
                }
                None => (Flow::Continue, self.launch_response(&[]).await),
            },
            Request::Open { paths } => match running {
                Some(pid) => {
                    self.hand_off(&paths);
                    self.activate(pid).await;
                    (Flow::Continue, Response::Ack)
                }
                None => (Flow::Continue, self.launch_response(&paths).await),
            },
        }
    }

    async fn launch_response(&mut self, extra: &[String]) -> Response {
        match self.launch_child(extra).await {
            Ok(_) => Response::Ack,
            Err(e) => Response::error(e.to_string()),
        }
    }

    async fn launch_child(&mut self, extra: &[String]) -> Result<u32, LaunchError> {
        self.scheduler.cancel(Timer::Relaunch);
        let attached = if self.cfg.adopt_existing {
            self.supervisor.adopt_existing(&self.executable)
        } else {
            None
        };
        let pid = match attached {
            Some(pid) => {
                tracing::info!(pid, executable = %self.executable.display(), "attached to running instance");
                self.hand_off(extra);
                self.state.update(|s| s.last_pid = Some(pid));
                pid
            }
            None => {
                let mut args = self.cfg.args.clone();
                args.extend(extra.iter().cloned());

                let child = self.supervisor.launch(&self.executable, &args)?;
                tracing::info!(pid = child.pid, executable = %self.executable.display(), "child launched");
                self.state.update(|s| {
                    s.last_pid = Some(child.pid);
                    s.launch_count += 1;
                });
                child.pid
            }
        };
        self.windows.set_owner(Some(pid));
        if let Some(ticket) = self.dock.request_visible().await {
            self.arm_dock(ticket);
        }
        Ok(pid)
    }

    /// Passes `paths` to the running child through a short-lived invocation of
    /// its executable (the child's own remoting picks them up).
    fn hand_off(&self, paths: &[String]) {
        if paths.is_empty() {
            return;
        }
        let spawned = tokio::process::Command::new(&self.executable)
            .args(paths)
            .stdin(std::process::Stdio::null())
            .spawn();
        match spawned {
            Ok(mut helper) => {
                tokio::spawn(async move {
                    if let Err(e) = helper.wait().await {
                        tracing::debug!(error = %e, "hand-off invocation failed");
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "cannot hand paths to the running child"),
        }
    }

    async fn activate(&mut self, pid: u32) {
        self.windows.set_owner(Some(pid));
        let mut ids = self.windows.get().await;
        if ids.is_empty() {
            ids = self.windows.wait_for_windows(self.cfg.activation_wait).await;
        }
        let activated = !ids.is_empty() && self.wm.activate_windows(pid).await;
        self.windows.invalidate();
        self.bus.publish(
            Event::new(EventKind::WindowsActivated)
                .with_pid(pid)
                .with_reason(format!("windows={} activated={activated}", ids.len())),
        );
    }

    async fn on_child_exited(&mut self, ev: ExitEvent) -> Flow {
        let Some(verdict) = self.supervisor.on_exit(ev) else {
            return Flow::Continue;
        };
        let crashed = verdict.class == ExitClass::Crashed;
        self.state.update(|s| {
            s.last_exit_code = ev.exit_code;
            if crashed {
                s.last_crash_at = Some(unix_secs(ev.at));
            }
        });

        match verdict.action {
            ExitAction::Adopted { pid } => {
                tracing::info!(exited = verdict.pid, adopted = pid, "tracking surviving process");
                self.windows.set_owner(Some(pid));
                self.state.update(|s| s.last_pid = Some(pid));
                Flow::Continue
            }
            ExitAction::Relaunch { delay } => {
                self.windows.set_owner(None);
                self.bus.publish(
                    Event::new(EventKind::RelaunchScheduled)
                        .with_delay(delay)
                        .with_attempt(self.supervisor.launches() + 1),
                );
                self.scheduler
                    .schedule(Timer::Relaunch, delay, Message::Relaunch);
                Flow::Continue
            }
            ExitAction::Terminate => {
                self.supervisor.check_for_orphans();
                Flow::Stop(format!("child {} exited", verdict.pid))
            }
            ExitAction::Idle => {
                self.supervisor.check_for_orphans();
                self.go_idle().await
            }
        }
    }

    async fn on_relaunch(&mut self) -> Flow {
        if self.supervisor.running_pid().is_some() {
            return Flow::Continue;
        }
        match self.launch_child(&[]).await {
            Ok(_) => Flow::Continue,
            Err(e) if self.cfg.terminate_with_child => Flow::Stop(format!("relaunch failed: {e}")),
            Err(e) => {
                tracing::warn!(error = %e, "relaunch failed; idling");
                self.go_idle().await
            }
        }
    }

    /// The machine slept: exit notifications and dock confirmations may have
    /// been missed, so both are re-read.
    async fn on_resumed(&mut self, slept: Duration) -> Flow {
        self.bus
            .publish(Event::new(EventKind::SystemResumed).with_delay(slept));
        self.windows.invalidate();

        if let Some(pid) = self.supervisor.running_pid() {
            let liveness = sys::liveness(pid);
            if !matches!(liveness, sys::Liveness::Running) {
                tracing::info!(pid, "child gone after resume");
                if let Flow::Stop(reason) = self
                    .on_child_exited(ExitEvent::from_liveness(pid, liveness))
                    .await
                {
                    return Flow::Stop(reason);
                }
            }
        }

        if let Some(ticket) = self.dock.reconcile().await {
            self.arm_dock(ticket);
        }
        Flow::Continue
    }

    async fn go_idle(&mut self) -> Flow {
        self.windows.set_owner(None);
        if let Some(ticket) = self.dock.request_hidden().await {
            self.arm_dock(ticket);
        }
        Flow::Continue
    }

    fn arm_dock(&mut self, ticket: VerifyTicket) {
        self.scheduler.schedule(
            Timer::DockVerify,
            self.cfg.dock_verify_delay,
            Message::DockVerify(ticket),
        );
    }

    async fn teardown(&mut self, reason: &str) -> Result<(), RuntimeError> {
        tracing::info!(reason, "tearing down");
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(reason));

        let grace = self.cfg.grace;
        let deadline = Instant::now() + grace;
        let mut stuck = None;

        if let Some(pid) = self.supervisor.running_pid()
            && time::timeout_at(deadline, self.supervisor.terminate_child())
                .await
                .is_err()
        {
            // The stop sequence was cut short: never leave the child behind.
            tracing::warn!(pid, "child outlived the grace period; killing it");
            if let Err(e) = sys::send_signal(pid, libc::SIGKILL) {
                tracing::warn!(pid, error = %e, "cannot kill child");
            }
            stuck = Some("child");
        }

        self.scheduler.cancel_all();
        self.supervisor.shutdown();
        self.windows.set_owner(None);

        if stuck.is_none() {
            let delay = self.cfg.dock_verify_delay;
            let dock = &mut self.dock;
            let hide = async move {
                // A pending show swallows the request; its timer is gone, so
                // the transform is driven here.
                let ticket = match dock.request_hidden().await {
                    Some(ticket) => Some(ticket),
                    None => dock.reconcile().await,
                };
                dock.settle(ticket, delay).await
            };
            match time::timeout_at(deadline, hide).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!("dock did not confirm hidden"),
                Err(_) => stuck = Some("dock"),
            }
        }

        self.token.cancel();
        if let Some(mut registration) = self.registration.take() {
            registration.release();
        }

        match stuck {
            None => {
                self.bus.publish(Event::new(EventKind::TeardownCompleted));
                Ok(())
            }
            Some(stage) => {
                self.bus
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(stage));
                Err(RuntimeError::GraceExceeded { grace, stage })
            }
        }
    }
}
