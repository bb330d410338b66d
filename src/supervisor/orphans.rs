//! Process enumeration by executable identity.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::sys;

/// Resolves symlinks so that `/bin/x` and `/usr/bin/x` compare equal.
pub(crate) fn identity(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Pids whose executable image is `executable`, minus `exclude` and ourselves.
///
/// Enumeration failures yield an empty list.
pub(crate) fn processes_running(executable: &Path, exclude: &HashSet<u32>) -> Vec<u32> {
    let me = sys::current_pid();
    let pids = match sys::list_pids() {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "process enumeration unavailable");
            return Vec::new();
        }
    };

    let mut found: Vec<u32> = pids
        .into_iter()
        .filter(|pid| *pid != me && !exclude.contains(pid))
        .filter(|pid| sys::executable_of(*pid).is_some_and(|exe| exe == executable))
        .collect();
    found.sort_unstable();
    found
}
