//! # Persisted launcher state.
//!
//! A small JSON record that survives launcher restarts. It is read once at
//! startup (to seed the anti-flap crash record) and written on launch and exit
//! transitions.
//!
//! Writes take an exclusive lock on `<path>.lock` (an independent fallback
//! instance may write concurrently), go to `<path>.tmp` and are renamed over
//! the target, so readers never observe a torn file. [`StateStore::update`]
//! holds the lock from read to rename.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Record persisted across launcher restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    /// Pid of the most recently launched or adopted child.
    pub last_pid: Option<u32>,
    /// Wall-clock time of the last crash, unix seconds.
    pub last_crash_at: Option<u64>,
    /// Exit code of the last observed exit.
    pub last_exit_code: Option<i32>,
    /// Launches performed over all sessions.
    pub launch_count: u64,
}

impl PersistedState {
    /// Time elapsed since the recorded crash, if any and not in the future.
    pub fn since_last_crash(&self, now: SystemTime) -> Option<Duration> {
        let at = UNIX_EPOCH + Duration::from_secs(self.last_crash_at?);
        now.duration_since(at).ok()
    }
}

/// Converts a wall-clock time to unix seconds.
pub fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// JSON file store for [`PersistedState`].
///
/// A store without a path is inert: loads return the default, saves succeed.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: Option<PathBuf>,
}

impl StateStore {
    /// Store backed by `path`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Store that never touches the filesystem.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Reads the record. A missing file yields the default record.
    pub fn load(&self) -> Result<PersistedState, StateError> {
        match &self.path {
            Some(path) => read(path),
            None => Ok(PersistedState::default()),
        }
    }

    /// Writes the record atomically.
    pub fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _lock = lock(path)?;
        write(path, state)
    }

    /// Loads, applies `f`, and saves while holding the lock, so concurrent
    /// updates never overwrite each other. Errors are logged, never returned.
    pub fn update(&self, f: impl FnOnce(&mut PersistedState)) {
        let Some(path) = &self.path else {
            return;
        };
        let result = lock(path).and_then(|_lock| {
            let mut state = read(path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "persisted state unreadable; starting fresh");
                PersistedState::default()
            });
            f(&mut state);
            write(path, &state)
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist state");
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read(path: &Path) -> Result<PersistedState, StateError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PersistedState::default());
        }
        Err(source) => return Err(io_error(path, source)),
    };
    serde_json::from_str(&text).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Takes the exclusive lock on `<path>.lock`; released when the file is dropped.
fn lock(path: &Path) -> Result<File, StateError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(path, e))?;
    }
    let lock_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path.with_extension("json.lock"))
        .map_err(|e| io_error(path, e))?;
    lock_file.lock_exclusive().map_err(|e| io_error(path, e))?;
    Ok(lock_file)
}

/// Replaces the file through `<path>.tmp`. The caller holds the lock.
fn write(path: &Path, state: &PersistedState) -> Result<(), StateError> {
    let content = serde_json::to_vec_pretty(state).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    let temp_path = path.with_extension("json.tmp");
    let mut temp = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| io_error(path, e))?;
    temp.write_all(&content).map_err(|e| io_error(path, e))?;
    temp.sync_all().map_err(|e| io_error(path, e))?;
    std::fs::rename(&temp_path, path).map_err(|e| io_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(Some(dir.path().join("state.json")));
        assert_eq!(store.load().unwrap(), PersistedState::default());
    }

    #[test]
    fn test_save_then_load_in_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/state.json");
        let store = StateStore::new(Some(path.clone()));
        let state = PersistedState {
            last_pid: Some(42),
            last_crash_at: Some(1_700_000_000),
            last_exit_code: Some(1),
            launch_count: 3,
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_reported_and_update_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = StateStore::new(Some(path));
        assert!(matches!(store.load(), Err(StateError::Corrupt { .. })));

        store.update(|s| s.launch_count += 1);
        assert_eq!(store.load().unwrap().launch_count, 1);
    }

    #[test]
    fn test_unknown_and_missing_fields_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, br#"{"last_pid": 7, "extra": true}"#).unwrap();
        let state = StateStore::new(Some(path)).load().unwrap();
        assert_eq!(state.last_pid, Some(7));
        assert_eq!(state.launch_count, 0);
    }

    #[test]
    fn test_since_last_crash() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        let state = PersistedState {
            last_crash_at: Some(995),
            ..Default::default()
        };
        assert_eq!(state.since_last_crash(now), Some(Duration::from_secs(5)));
        assert_eq!(PersistedState::default().since_last_crash(now), None);
    }

    #[test]
    fn test_disabled_store_is_inert() {
        let store = StateStore::disabled();
        store.save(&PersistedState::default()).unwrap();
        assert_eq!(store.load().unwrap(), PersistedState::default());
        assert!(store.path().is_none());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(Some(dir.path().join("state.json")));

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store.update(|s| s.launch_count += 1);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(store.load().unwrap().launch_count, 400);
    }
}
