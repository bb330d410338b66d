//! # Backoff policy for retries.
//!
//! [`BackoffPolicy`] controls how delays grow between repeated attempts. lifeline
//! uses it in two places:
//! - secondary→primary connection probing (the primary may still be binding its socket);
//! - relaunching a crashed child when the restart policy allows it.
//!
//! It is parameterized by:
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`, then jitter
//! is applied. The base is derived from the attempt number only, so jitter never
//! feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use lifeline::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(200),
//!     max: Duration::from_secs(5),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(200));
//! assert_eq!(backoff.next(1), Duration::from_millis(400));
//! assert_eq!(backoff.next(10), Duration::from_secs(5));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter applied to every computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a constant 1s delay capped at 30s, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Backoff used when probing the primary instance: 200ms doubling, capped at 5s,
    /// with equal jitter so that secondaries started together do not probe in lockstep.
    pub fn connect() -> Self {
        Self {
            first: Duration::from_millis(200),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }

    /// Backoff used between relaunches of a crashed child: 1s doubling, capped at 30s.
    pub fn relaunch() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay for the given attempt number (0-indexed).
    ///
    /// # Notes
    /// - `factor == 1.0` keeps the delay constant at `first` (up to `max`).
    /// - Non-finite or negative intermediate values clamp to `max`.
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base =
            if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
                self.max
            } else {
                Duration::from_secs_f64(unclamped_secs)
            };

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            _ => self.jitter.apply(base),
        }
    }

    /// Returns the same policy with a different jitter.
    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_connect_preset_doubles_from_200ms() {
        let policy = BackoffPolicy::connect().with_jitter(JitterPolicy::None);
        let delays: Vec<u64> = (0..5).map(|n| policy.next(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![200, 400, 800, 1600, 3200]);
        assert_eq!(policy.next(5), Duration::from_secs(5));
    }

    #[test]
    fn test_connect_preset_jitter_stays_within_half_and_base() {
        let policy = BackoffPolicy::connect();
        for attempt in 0..5 {
            let base = 200u64 << attempt;
            let delay = policy.next(attempt).as_millis() as u64;
            assert!(delay >= base / 2, "attempt {attempt}: {delay}ms below half of {base}ms");
            assert!(delay <= base, "attempt {attempt}: {delay}ms above {base}ms");
        }
    }

    #[test]
    fn test_constant_factor() {
        let policy = exact(500, 30_000, 1.0);
        for attempt in 0..10 {
            assert_eq!(policy.next(attempt), Duration::from_millis(500));
        }
    }

    #[test]
    fn test_first_exceeds_max() {
        let policy = exact(10_000, 5_000, 2.0);
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn test_huge_attempt_clamps_to_max() {
        let policy = BackoffPolicy::relaunch();
        assert_eq!(policy.next(100), Duration::from_secs(30));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_decorrelated_stays_between_first_and_max() {
        let policy = exact(100, 2_000, 2.0).with_jitter(JitterPolicy::Decorrelated);
        for _ in 0..100 {
            let delay = policy.next(6);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_secs(2));
        }
    }
}
