//! Error types used by the lifeline runtime.
//!
//! Each component owns one enum:
//!
//! - [`LaunchError`]: the child could not be started (fatal to that attempt).
//! - [`WatchError`]: no exit-notification primitive for a pid (caller falls back to polling).
//! - [`ConnectionError`]: single-instance registration or the secondary→primary channel failed.
//! - [`StateError`]: persisted state could not be read or written (logged, never fatal).
//! - [`ConfigError`]: configuration file could not be loaded.
//! - [`RuntimeError`]: the session itself failed or its teardown exceeded the grace period.
//!
//! Crashes of the child are **not** errors: they are an
//! [`ExitClass`](crate::supervisor::ExitClass) and a
//! [`EventKind::CrashDetected`](crate::events::EventKind::CrashDetected) event.
//!
//! All enums provide `as_label` (stable snake_case) for logs.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced while launching the child process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The executable does not exist.
    #[error("executable not found: {path}")]
    NotFound {
        /// Requested executable path.
        path: PathBuf,
    },

    /// The path exists but is not an executable regular file.
    #[error("not an executable file: {path}")]
    NotExecutable {
        /// Requested executable path.
        path: PathBuf,
    },

    /// The OS refused to spawn the process.
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        /// Requested executable path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A launch was requested while a child is already tracked.
    #[error("child already running (pid {pid})")]
    AlreadyRunning {
        /// Pid of the tracked child.
        pid: u32,
    },

    /// The supervisor has been torn down and accepts no more launches.
    #[error("supervisor terminated")]
    Terminated,
}

impl LaunchError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use lifeline::LaunchError;
    ///
    /// let err = LaunchError::NotFound { path: "/nope".into() };
    /// assert_eq!(err.as_label(), "launch_not_found");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            LaunchError::NotFound { .. } => "launch_not_found",
            LaunchError::NotExecutable { .. } => "launch_not_executable",
            LaunchError::Spawn { .. } => "launch_spawn_failed",
            LaunchError::AlreadyRunning { .. } => "launch_already_running",
            LaunchError::Terminated => "launch_terminated",
        }
    }
}

/// # Errors produced by the process exit watcher.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WatchError {
    /// The selected notification primitive could not be used for this pid.
    #[error("exit monitor unavailable ({strategy}): {reason}")]
    MonitorUnavailable {
        /// Strategy name that failed.
        strategy: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}

impl WatchError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            WatchError::MonitorUnavailable { .. } => "watch_monitor_unavailable",
        }
    }
}

/// # Errors produced by the single-instance coordinator.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Lock file could not be opened (not the same as "held by someone else").
    #[error("registration lock {path}: {source}")]
    Lock {
        /// Lock file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The primary could not bind its service socket.
    #[error("bind {path}: {source}")]
    Bind {
        /// Socket path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// All connection attempts to the primary failed.
    #[error("primary unreachable after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last observed failure.
        last: String,
    },

    /// I/O failure on an established connection.
    #[error("connection i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent something that is not a valid message.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl ConnectionError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectionError::Lock { .. } => "connection_lock",
            ConnectionError::Bind { .. } => "connection_bind",
            ConnectionError::Exhausted { .. } => "connection_exhausted",
            ConnectionError::Io(_) => "connection_io",
            ConnectionError::Protocol(_) => "connection_protocol",
        }
    }
}

/// # Errors produced by the persisted state store.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StateError {
    /// Reading or writing the state file failed.
    #[error("state file {path}: {source}")]
    Io {
        /// State file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The state file holds invalid JSON.
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        /// State file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("config file {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`Config`](crate::Config).
    #[error("config file {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// No executable was configured.
    #[error("no executable configured")]
    MissingExecutable,
}

/// # Errors produced by the session runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Teardown exceeded its grace period and was abandoned.
    #[error("teardown timeout {grace:?} exceeded; stuck at: {stage}; forcing exit")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Teardown stage that did not complete.
        stage: &'static str,
    },

    /// The initial launch failed and nothing is running.
    #[error("startup failed: {0}")]
    Startup(#[from] LaunchError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use lifeline::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stage: "dock" };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Startup(_) => "runtime_startup_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        let err = ConnectionError::Exhausted {
            attempts: 5,
            last: "refused".into(),
        };
        assert_eq!(err.as_label(), "connection_exhausted");
        assert!(err.to_string().contains("5 attempts"));

        let err = WatchError::MonitorUnavailable {
            strategy: "pidfd",
            reason: "ENOSYS".into(),
        };
        assert_eq!(err.as_label(), "watch_monitor_unavailable");
    }

    #[test]
    fn test_startup_wraps_launch_error() {
        let err: RuntimeError = LaunchError::Terminated.into();
        assert_eq!(err.as_label(), "runtime_startup_failed");
    }
}
