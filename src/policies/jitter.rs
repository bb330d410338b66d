//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] randomizes backoff delays so that several launcher invocations
//! started at the same moment (a double-click, a file manager opening many files)
//! do not probe the primary instance in lockstep.
//!
//! - [`JitterPolicy::None`]: exact delays
//! - [`JitterPolicy::Full`]: random in `[0, delay]`
//! - [`JitterPolicy::Equal`]: `delay/2 + random[0, delay/2]`
//! - [`JitterPolicy::Decorrelated`]: random in `[base, prev × 3]`, capped at max

use std::time::Duration;

use clap::ValueEnum;
use rand::Rng;
use serde::Deserialize;

/// Policy controlling randomization of retry delays.
///
/// Named in kebab-case in config files and on the command line
/// (`none`, `full`, `equal`, `decorrelated`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum JitterPolicy {
    /// Use the exact backoff delay.
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// `delay/2 + random[0, delay/2]`; keeps roughly 75% of the delay on average.
    Equal,
    /// Random delay in `[base, prev × 3]`, capped at max.
    ///
    /// Needs context, see [`apply_decorrelated`](Self::apply_decorrelated).
    Decorrelated,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    ///
    /// `Decorrelated` returns the input unchanged here; use
    /// [`apply_decorrelated`](Self::apply_decorrelated).
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => full_jitter(delay),
            JitterPolicy::Equal => equal_jitter(delay),
            JitterPolicy::Decorrelated => delay,
        }
    }

    /// Applies decorrelated jitter with full context.
    ///
    /// Falls back to `apply(prev)` for the other variants.
    pub fn apply_decorrelated(&self, base: Duration, prev: Duration, max: Duration) -> Duration {
        if !matches!(self, JitterPolicy::Decorrelated) {
            return self.apply(prev);
        }

        let base_ms = base.as_millis() as u64;
        let prev_ms = prev.as_millis() as u64;
        let max_ms = max.as_millis() as u64;

        let upper = prev_ms.saturating_mul(3).min(max_ms).max(base_ms);
        if base_ms >= upper {
            return base;
        }
        Duration::from_millis(rand::rng().random_range(base_ms..=upper))
    }
}

fn full_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

fn equal_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    let half = ms / 2;
    let jitter = if half == 0 {
        0
    } else {
        rand::rng().random_range(0..=half)
    };
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_identity() {
        let d = Duration::from_millis(321);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn test_zero_delay_stays_zero() {
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_full_never_exceeds_input() {
        for _ in 0..200 {
            assert!(JitterPolicy::Full.apply(Duration::from_millis(400)) <= Duration::from_millis(400));
        }
    }

    #[test]
    fn test_decorrelated_base_above_upper_returns_base() {
        let out = JitterPolicy::Decorrelated.apply_decorrelated(
            Duration::from_secs(2),
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        assert_eq!(out, Duration::from_secs(2));
    }

    #[test]
    fn test_every_variant_has_a_name() {
        for (name, policy) in [
            ("none", JitterPolicy::None),
            ("full", JitterPolicy::Full),
            ("equal", JitterPolicy::Equal),
            ("decorrelated", JitterPolicy::Decorrelated),
        ] {
            assert_eq!(JitterPolicy::from_str(name, false), Ok(policy));
        }
    }
}
