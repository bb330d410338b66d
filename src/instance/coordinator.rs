use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::core::Config;
use crate::error::ConnectionError;
use crate::events::{Bus, Event, EventKind};
use crate::instance::connection::Connector;

/// Outcome of the single-instance election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    Primary,
    Secondary,
}

/// Result of [`InstanceCoordinator::try_become_primary`].
pub enum Election {
    /// We hold the registration.
    Primary(Registration),
    /// Another invocation holds it.
    Secondary,
}

impl Election {
    pub fn role(&self) -> InstanceRole {
        match self {
            Election::Primary(_) => InstanceRole::Primary,
            Election::Secondary => InstanceRole::Secondary,
        }
    }
}

/// Names the registration (`<runtime_dir>/<service>.lock` and `.sock`) and
/// runs the election.
#[derive(Debug, Clone)]
pub struct InstanceCoordinator {
    runtime_dir: PathBuf,
    service_name: String,
    bus: Bus,
}

impl InstanceCoordinator {
    pub fn new(runtime_dir: PathBuf, service_name: impl Into<String>, bus: Bus) -> Self {
        Self {
            runtime_dir,
            service_name: service_name.into(),
            bus,
        }
    }

    pub fn from_config(cfg: &Config, bus: Bus) -> Self {
        Self::new(cfg.runtime_dir(), cfg.service_name.clone(), bus)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.runtime_dir.join(format!("{}.lock", self.service_name))
    }

    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join(format!("{}.sock", self.service_name))
    }

    /// Takes the registration lock without blocking.
    ///
    /// The winner removes any stale socket left by a dead primary and binds a
    /// fresh one. Losing the lock race is not an error.
    pub fn try_become_primary(&self) -> Result<Election, ConnectionError> {
        let lock_path = self.lock_path();
        let lock_err = |source| ConnectionError::Lock {
            path: lock_path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.runtime_dir).map_err(lock_err)?;
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(lock_err)?;

        match lock.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                tracing::debug!(lock = %lock_path.display(), "registration held elsewhere");
                self.bus.publish(Event::new(EventKind::BecameSecondary));
                return Ok(Election::Secondary);
            }
            Err(e) => return Err(lock_err(e)),
        }

        let socket_path = self.socket_path();
        match std::fs::remove_file(&socket_path) {
            Ok(()) => tracing::debug!(socket = %socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ConnectionError::Bind {
                    path: socket_path,
                    source,
                });
            }
        }
        let listener = UnixListener::bind(&socket_path)
            .and_then(|l| l.set_nonblocking(true).map(|()| l))
            .map_err(|source| ConnectionError::Bind {
                path: socket_path.clone(),
                source,
            })?;

        tracing::info!(socket = %socket_path.display(), "registered as primary");
        self.bus.publish(Event::new(EventKind::BecamePrimary));
        Ok(Election::Primary(Registration {
            lock: Some(lock),
            socket_path,
            listener: Some(listener),
        }))
    }

    /// Connection helper for a secondary, configured from `cfg`.
    pub fn connector(&self, cfg: &Config) -> Connector {
        Connector::new(
            self.socket_path(),
            cfg.connect_backoff,
            cfg.connect_attempts_clamped(),
            self.bus.clone(),
        )
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// The primary's hold on the service registration.
///
/// Dropping it removes the socket file and releases the lock.
pub struct Registration {
    lock: Option<File>,
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl Registration {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Hands the bound listener to the accept loop (once).
    pub fn take_listener(&mut self) -> Option<UnixListener> {
        self.listener.take()
    }

    /// Releases the registration. Idempotent.
    pub fn release(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        self.listener = None;
        if let Err(e) = std::fs::remove_file(&self.socket_path)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(error = %e, "failed to remove service socket");
        }
        if let Err(e) = FileExt::unlock(&lock) {
            tracing::warn!(error = %e, "failed to unlock registration");
        }
        tracing::debug!("registration released");
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(dir: &tempfile::TempDir) -> InstanceCoordinator {
        InstanceCoordinator::new(dir.path().to_path_buf(), "test", Bus::new(16))
    }

    #[test]
    fn test_exactly_one_of_n_becomes_primary() {
        let dir = tempfile::tempdir().unwrap();
        let elections: Vec<Election> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| coordinator(&dir).try_become_primary().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let primaries = elections
            .iter()
            .filter(|e| e.role() == InstanceRole::Primary)
            .count();
        assert_eq!(primaries, 1);
    }

    #[test]
    fn test_release_lets_the_next_instance_win() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(&dir);
        let Election::Primary(mut reg) = c.try_become_primary().unwrap() else {
            panic!("first instance must win");
        };
        assert!(reg.socket_path().exists());
        assert_eq!(c.try_become_primary().unwrap().role(), InstanceRole::Secondary);

        reg.release();
        reg.release();
        assert!(!c.socket_path().exists());
        assert_eq!(c.try_become_primary().unwrap().role(), InstanceRole::Primary);
    }

    #[test]
    fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(&dir);
        std::fs::write(c.socket_path(), b"stale").unwrap();
        let Election::Primary(mut reg) = c.try_become_primary().unwrap() else {
            panic!("lock is free");
        };
        assert!(reg.take_listener().is_some());
        assert!(reg.take_listener().is_none());
    }
}
