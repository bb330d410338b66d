use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{Config, scheduler::Scheduler, session::{Message, Session}},
    dock::DockVisibilityController,
    error::ConfigError,
    events::Bus,
    instance::Registration,
    shell::{DesktopShell, HeadlessShell},
    state::StateStore,
    subscribers::{ShellNotifier, Subscribe, SubscriberSet},
    supervisor::{ChildSupervisor, ExitSink},
    watch::{ExitWatchStrategy, ExitWatcher, select_strategy},
    windows::{NoopWindowManager, WindowListCache, WindowManager},
};

/// Builder for constructing a [`Session`] with optional collaborators.
pub struct SessionBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    shell: Arc<dyn DesktopShell>,
    wm: Arc<dyn WindowManager>,
    strategy: Option<Arc<dyn ExitWatchStrategy>>,
    registration: Option<Registration>,
    state: Option<StateStore>,
    bus: Option<Bus>,
    os_signals: bool,
}

impl SessionBuilder {
    /// Creates a builder with a headless shell and no window manager.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            shell: Arc::new(HeadlessShell::new()),
            wm: Arc::new(NoopWindowManager),
            strategy: None,
            registration: None,
            state: None,
            bus: None,
            os_signals: true,
        }
    }

    /// Sets event subscribers.
    ///
    /// A [`ShellNotifier`] for the configured shell is always added.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    pub fn with_shell(mut self, shell: Arc<dyn DesktopShell>) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_window_manager(mut self, wm: Arc<dyn WindowManager>) -> Self {
        self.wm = wm;
        self
    }

    /// Overrides the platform exit-notification strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn ExitWatchStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Makes the session serve secondaries and release the registration on teardown.
    pub fn with_registration(mut self, registration: Registration) -> Self {
        self.registration = Some(registration);
        self
    }

    pub fn with_state_store(mut self, store: StateStore) -> Self {
        self.state = Some(store);
        self
    }

    /// Publishes on an existing bus (e.g. the one the election ran on).
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Whether SIGINT/SIGTERM/SIGQUIT/SIGHUP start a teardown. Defaults to `true`.
    pub fn with_os_signals(mut self, enabled: bool) -> Self {
        self.os_signals = enabled;
        self
    }

    /// Builds the session.
    ///
    /// Must be called inside a tokio runtime (subscriber workers are spawned here).
    pub fn build(self) -> Result<Session, ConfigError> {
        let cfg = self.cfg;
        let executable = cfg.executable()?.to_path_buf();

        let bus = self
            .bus
            .unwrap_or_else(|| Bus::new(cfg.bus_capacity_clamped()));
        let events = bus.subscribe();

        let mut subscribers = self.subscribers;
        subscribers.push(Arc::new(ShellNotifier::new(Arc::clone(&self.shell))));
        let subs = SubscriberSet::new(subscribers, bus.clone());

        let poll = cfg.poll_strategy();
        let strategy = self.strategy.unwrap_or_else(|| select_strategy(poll));
        let watcher = Arc::new(ExitWatcher::new(strategy, poll, bus.clone()));
        tracing::debug!(strategy = watcher.strategy_name(), "exit watcher ready");

        let (tx, rx) = mpsc::unbounded_channel();
        let exits = tx.clone();
        let sink: ExitSink = Arc::new(move |ev| {
            let _ = exits.send(Message::ChildExited(ev));
        });

        let supervisor = ChildSupervisor::new(cfg.clone(), watcher, sink, bus.clone());
        let dock = DockVisibilityController::new(self.shell, cfg.dock_max_retries, bus.clone());
        let windows = WindowListCache::new(Arc::clone(&self.wm), cfg.window_cache_ttl);
        let state = self
            .state
            .unwrap_or_else(|| StateStore::new(cfg.state_path()));

        Ok(Session {
            executable,
            bus,
            events: Some(events),
            subs: Some(subs),
            supervisor,
            dock,
            windows,
            wm: self.wm,
            state,
            scheduler: Scheduler::new(tx.clone()),
            tx,
            rx,
            registration: self.registration,
            token: CancellationToken::new(),
            os_signals: self.os_signals,
            cfg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_requires_executable() {
        assert!(matches!(
            SessionBuilder::new(Config::default()).build(),
            Err(ConfigError::MissingExecutable)
        ));
    }

    #[tokio::test]
    async fn test_build_with_executable() {
        let cfg = Config {
            executable: Some("/bin/true".into()),
            ..Config::default()
        };
        let session = SessionBuilder::new(cfg)
            .with_state_store(StateStore::disabled())
            .with_os_signals(false)
            .build()
            .unwrap();
        assert_eq!(session.executable, std::path::PathBuf::from("/bin/true"));
        assert!(session.registration.is_none());
    }
}
