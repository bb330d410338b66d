//! # Runtime configuration.
//!
//! [`Config`] centralizes the settings of one launcher invocation: what to run,
//! how exits are classified and answered, and the timings of every retry or
//! verification timer.
//!
//! Config is built in three layers:
//! 1. [`Config::default`] (documented below),
//! 2. an optional TOML file ([`Config::load`] / [`Config::from_toml_str`]),
//! 3. command-line overrides applied by the binary.
//!
//! ## Sentinel values
//! - `recent_crash_window = 0s` → anti-flap disabled
//! - `grace = 0s` → teardown stages are not awaited
//! - `connect_attempts = 0` → treated as a single attempt
//! - `resume_check_interval = 0s` → sleep/wake detection disabled
//! - `runtime_dir = None` → `$XDG_RUNTIME_DIR`, else the temp dir
//! - `state_path = None` → `<data_local_dir>/lifeline/state.json`
//!
//! ## File format
//! ```toml
//! executable = "/usr/bin/firefox"
//! args = ["--new-window"]
//! restart = "on-failure"
//! settle_ms = 2000
//! recent_crash_window_ms = 10000
//! relaunch_jitter = "equal"
//!
//! [env]
//! MOZ_ENABLE_WAYLAND = "1"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
use crate::watch::PollStrategy;

/// Settings for one launcher invocation.
///
/// All fields are public; prefer the helper accessors over checking sentinels
/// at call sites.
#[derive(Clone, Debug)]
pub struct Config {
    /// Child executable. Must be set before a session can launch anything.
    pub executable: Option<PathBuf>,
    /// Arguments passed verbatim to the child.
    pub args: Vec<String>,
    /// Environment overrides on top of the inherited environment.
    pub env: BTreeMap<String, String>,

    /// Tear the wrapper down once the child has exited for good.
    pub terminate_with_child: bool,
    /// Window after launch during which an exit is treated as an early failure.
    pub settle: Duration,
    /// Two crashes closer than this suppress the second relaunch.
    pub recent_crash_window: Duration,
    /// Whether the child is launched again after it exits.
    pub restart: RestartPolicy,
    /// Delays between relaunches of a crashing child.
    pub relaunch_backoff: BackoffPolicy,

    /// Upper bound on the whole teardown sequence.
    pub grace: Duration,
    /// How long the child gets between SIGTERM and SIGKILL.
    pub child_stop_timeout: Duration,
    /// Adopt a surviving same-executable process when the tracked pid exits early.
    pub adopt_orphans: bool,
    /// Track an instance of the executable that is already running instead of
    /// launching a second one.
    pub adopt_existing: bool,

    /// Lifetime of a cached window list.
    pub window_cache_ttl: Duration,
    /// How long an activation request waits for the child's first window.
    pub activation_wait: Duration,

    /// Delay before a dock visibility change is verified.
    pub dock_verify_delay: Duration,
    /// Verification retries before the dock is reported out of sync.
    pub dock_max_retries: u32,

    /// Backoff between connection attempts to the primary.
    pub connect_backoff: BackoffPolicy,
    /// Number of connection attempts before falling back to an independent launch.
    pub connect_attempts: u32,

    /// How often the session checks whether the machine resumed from sleep.
    pub resume_check_interval: Duration,
    /// Minimum time asleep that counts as a resume.
    pub resume_gap: Duration,

    /// Steady-state liveness check interval of the polling fallback.
    pub poll_interval: Duration,
    /// Probe interval of the polling fallback during the settle window.
    pub poll_fast: Duration,

    /// Well-known name of the single-instance registration.
    pub service_name: String,
    /// Directory holding the registration lock and socket.
    pub runtime_dir: Option<PathBuf>,
    /// Persisted state file.
    pub state_path: Option<PathBuf>,

    /// Capacity of the event bus ring buffer (min 1; clamped by the bus).
    pub bus_capacity: usize,
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `terminate_with_child = true`, `restart = Never`
    /// - `settle = 2s`, `recent_crash_window = 10s`
    /// - `grace = 5s`, `child_stop_timeout = 3s`
    /// - `window_cache_ttl = 300ms`, `activation_wait = 5s`
    /// - `adopt_orphans = true`, `adopt_existing = true`
    /// - `dock_verify_delay = 500ms`, `dock_max_retries = 3`
    /// - `resume_check_interval = 5s`, `resume_gap = 5s`
    /// - `connect_backoff = BackoffPolicy::connect()`, `connect_attempts = 5`
    /// - `poll_interval = 1s`, `poll_fast = 250ms`
    /// - `bus_capacity = 256`
    fn default() -> Self {
        Self {
            executable: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            terminate_with_child: true,
            settle: Duration::from_secs(2),
            recent_crash_window: Duration::from_secs(10),
            restart: RestartPolicy::default(),
            relaunch_backoff: BackoffPolicy::relaunch(),
            grace: Duration::from_secs(5),
            child_stop_timeout: Duration::from_secs(3),
            adopt_orphans: true,
            adopt_existing: true,
            window_cache_ttl: Duration::from_millis(300),
            activation_wait: Duration::from_secs(5),
            dock_verify_delay: Duration::from_millis(500),
            dock_max_retries: 3,
            connect_backoff: BackoffPolicy::connect(),
            connect_attempts: 5,
            resume_check_interval: Duration::from_secs(5),
            resume_gap: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            poll_fast: Duration::from_millis(250),
            service_name: "lifeline".into(),
            runtime_dir: None,
            state_path: None,
            bus_capacity: 256,
        }
    }
}

impl Config {
    /// Returns the configured executable.
    pub fn executable(&self) -> Result<&Path, ConfigError> {
        self.executable
            .as_deref()
            .ok_or(ConfigError::MissingExecutable)
    }

    /// Returns the anti-flap window, `None` when disabled.
    #[inline]
    pub fn crash_window(&self) -> Option<Duration> {
        if self.recent_crash_window.is_zero() {
            None
        } else {
            Some(self.recent_crash_window)
        }
    }

    /// Returns the sleep/wake check interval, `None` when disabled.
    #[inline]
    pub fn resume_check(&self) -> Option<Duration> {
        if self.resume_check_interval.is_zero() {
            None
        } else {
            Some(self.resume_check_interval)
        }
    }

    /// Returns the number of connection attempts (at least one).
    #[inline]
    pub fn connect_attempts_clamped(&self) -> u32 {
        self.connect_attempts.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Polling fallback derived from the poll intervals and the settle window.
    pub fn poll_strategy(&self) -> PollStrategy {
        PollStrategy {
            interval: self.poll_interval,
            fast: self.poll_fast,
            ramp: self.settle,
        }
    }

    /// Directory for the registration lock and socket.
    pub fn runtime_dir(&self) -> PathBuf {
        self.runtime_dir
            .clone()
            .or_else(dirs::runtime_dir)
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Location of the persisted state file, if one can be determined.
    pub fn state_path(&self) -> Option<PathBuf> {
        self.state_path
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("lifeline").join("state.json")))
    }

    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("lifeline").join("config.toml"))
    }

    /// Loads a TOML file on top of the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses TOML text on top of the defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let file: FileConfig = toml::from_str(text)?;
        let mut cfg = Self::default();
        file.apply(&mut cfg);
        Ok(cfg)
    }
}

/// On-disk shape of [`Config`]. Every field is optional; durations are in
/// milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    executable: Option<PathBuf>,
    args: Option<Vec<String>>,
    env: Option<BTreeMap<String, String>>,
    terminate_with_child: Option<bool>,
    settle_ms: Option<u64>,
    recent_crash_window_ms: Option<u64>,
    restart: Option<RestartPolicy>,
    relaunch_backoff_ms: Option<u64>,
    relaunch_backoff_max_ms: Option<u64>,
    relaunch_jitter: Option<JitterPolicy>,
    grace_ms: Option<u64>,
    child_stop_timeout_ms: Option<u64>,
    adopt_orphans: Option<bool>,
    adopt_existing: Option<bool>,
    window_cache_ttl_ms: Option<u64>,
    activation_wait_ms: Option<u64>,
    dock_verify_delay_ms: Option<u64>,
    dock_max_retries: Option<u32>,
    connect_backoff_ms: Option<u64>,
    connect_jitter: Option<JitterPolicy>,
    connect_attempts: Option<u32>,
    resume_check_interval_ms: Option<u64>,
    resume_gap_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    poll_fast_ms: Option<u64>,
    service_name: Option<String>,
    runtime_dir: Option<PathBuf>,
    state_path: Option<PathBuf>,
    bus_capacity: Option<usize>,
}

impl FileConfig {
    fn apply(self, cfg: &mut Config) {
        fn ms(v: Option<u64>, slot: &mut Duration) {
            if let Some(v) = v {
                *slot = Duration::from_millis(v);
            }
        }
        fn set<T>(v: Option<T>, slot: &mut T) {
            if let Some(v) = v {
                *slot = v;
            }
        }

        if self.executable.is_some() {
            cfg.executable = self.executable;
        }
        set(self.args, &mut cfg.args);
        set(self.env, &mut cfg.env);
        set(self.terminate_with_child, &mut cfg.terminate_with_child);
        ms(self.settle_ms, &mut cfg.settle);
        ms(self.recent_crash_window_ms, &mut cfg.recent_crash_window);
        set(self.restart, &mut cfg.restart);
        ms(self.relaunch_backoff_ms, &mut cfg.relaunch_backoff.first);
        ms(self.relaunch_backoff_max_ms, &mut cfg.relaunch_backoff.max);
        set(self.relaunch_jitter, &mut cfg.relaunch_backoff.jitter);
        ms(self.grace_ms, &mut cfg.grace);
        ms(self.child_stop_timeout_ms, &mut cfg.child_stop_timeout);
        set(self.adopt_orphans, &mut cfg.adopt_orphans);
        set(self.adopt_existing, &mut cfg.adopt_existing);
        ms(self.window_cache_ttl_ms, &mut cfg.window_cache_ttl);
        ms(self.activation_wait_ms, &mut cfg.activation_wait);
        ms(self.dock_verify_delay_ms, &mut cfg.dock_verify_delay);
        set(self.dock_max_retries, &mut cfg.dock_max_retries);
        ms(self.connect_backoff_ms, &mut cfg.connect_backoff.first);
        set(self.connect_jitter, &mut cfg.connect_backoff.jitter);
        set(self.connect_attempts, &mut cfg.connect_attempts);
        ms(self.resume_check_interval_ms, &mut cfg.resume_check_interval);
        ms(self.resume_gap_ms, &mut cfg.resume_gap);
        ms(self.poll_interval_ms, &mut cfg.poll_interval);
        ms(self.poll_fast_ms, &mut cfg.poll_fast);
        set(self.service_name, &mut cfg.service_name);
        if self.runtime_dir.is_some() {
            cfg.runtime_dir = self.runtime_dir;
        }
        if self.state_path.is_some() {
            cfg.state_path = self.state_path;
        }
        set(self.bus_capacity, &mut cfg.bus_capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = Config::default();
        assert!(cfg.terminate_with_child);
        assert_eq!(cfg.settle, Duration::from_secs(2));
        assert_eq!(cfg.crash_window(), Some(Duration::from_secs(10)));
        assert_eq!(cfg.restart, RestartPolicy::Never);
        assert_eq!(cfg.connect_backoff.first, Duration::from_millis(200));
        assert_eq!(cfg.connect_attempts, 5);
        assert_eq!(cfg.dock_max_retries, 3);
        assert!(matches!(
            cfg.executable(),
            Err(ConfigError::MissingExecutable)
        ));
    }

    #[test]
    fn test_sentinels() {
        let cfg = Config {
            recent_crash_window: Duration::ZERO,
            connect_attempts: 0,
            bus_capacity: 0,
            ..Config::default()
        };
        assert_eq!(cfg.crash_window(), None);
        assert_eq!(cfg.connect_attempts_clamped(), 1);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            executable = "/usr/bin/firefox"
            args = ["--new-window", "about:blank"]
            restart = "on-failure"
            settle_ms = 500
            terminate_with_child = false

            [env]
            MOZ_ENABLE_WAYLAND = "1"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.executable().unwrap(), Path::new("/usr/bin/firefox"));
        assert_eq!(cfg.args, vec!["--new-window", "about:blank"]);
        assert_eq!(cfg.restart, RestartPolicy::OnFailure);
        assert_eq!(cfg.settle, Duration::from_millis(500));
        assert_eq!(cfg.poll_strategy().ramp, Duration::from_millis(500));
        assert!(!cfg.terminate_with_child);
        assert_eq!(cfg.env.get("MOZ_ENABLE_WAYLAND").map(String::as_str), Some("1"));
        assert_eq!(cfg.grace, Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_and_resume_keys() {
        let cfg = Config::from_toml_str(
            r#"
            relaunch_jitter = "decorrelated"
            connect_jitter = "full"
            adopt_existing = false
            resume_check_interval_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.relaunch_backoff.jitter, JitterPolicy::Decorrelated);
        assert_eq!(cfg.connect_backoff.jitter, JitterPolicy::Full);
        assert!(!cfg.adopt_existing);
        assert_eq!(cfg.resume_check(), None);
        assert_eq!(Config::default().resume_check(), Some(Duration::from_secs(5)));
        assert!(Config::from_toml_str(r#"relaunch_jitter = "sometimes""#).is_err());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Config::from_toml_str("setle_ms = 10").is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "restart = \"sometimes\"").unwrap();
        match Config::load(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_explicit_paths_win() {
        let cfg = Config {
            runtime_dir: Some("/tmp/rt".into()),
            state_path: Some("/tmp/s.json".into()),
            ..Config::default()
        };
        assert_eq!(cfg.runtime_dir(), PathBuf::from("/tmp/rt"));
        assert_eq!(cfg.state_path(), Some(PathBuf::from("/tmp/s.json")));
    }
}
