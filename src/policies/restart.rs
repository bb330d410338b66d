//! # Restart policies for the supervised child.
//!
//! [`RestartPolicy`] decides whether the child is launched again after it exits.
//!
//! ```text
//! RestartPolicy::Never      → exit ends the session (or returns to idle)
//! RestartPolicy::OnFailure  → crashed child is relaunched with backoff
//! RestartPolicy::Always     → any exit relaunches the child
//! ```
//!
//! Crashes suppressed by the anti-flap window never relaunch, whatever the policy.

use clap::ValueEnum;
use serde::Deserialize;

/// Policy controlling whether the child is relaunched after it exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// The child runs once per launch request (default, desktop-launcher behaviour).
    #[default]
    Never,
    /// Relaunch only after a crash.
    OnFailure,
    /// Relaunch after any exit.
    Always,
}

impl RestartPolicy {
    /// Whether a crashed child may be relaunched.
    pub fn relaunch_after_crash(&self) -> bool {
        matches!(self, RestartPolicy::OnFailure | RestartPolicy::Always)
    }

    /// Whether a cleanly exited child may be relaunched.
    pub fn relaunch_after_clean_exit(&self) -> bool {
        matches!(self, RestartPolicy::Always)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        restart: RestartPolicy,
    }

    #[test]
    fn test_parses_kebab_case() {
        let h: Holder = toml::from_str(r#"restart = "on-failure""#).unwrap();
        assert_eq!(h.restart, RestartPolicy::OnFailure);
    }

    #[test]
    fn test_relaunch_matrix() {
        assert!(!RestartPolicy::Never.relaunch_after_crash());
        assert!(RestartPolicy::OnFailure.relaunch_after_crash());
        assert!(!RestartPolicy::OnFailure.relaunch_after_clean_exit());
        assert!(RestartPolicy::Always.relaunch_after_clean_exit());
    }
}
