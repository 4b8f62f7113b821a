//! # Exponential backoff between retry attempts.
//!
//! [`BackoffPolicy`] maps a failed attempt number to the delay before the next one:
//! - [`BackoffPolicy::first`] the delay after the first failure;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor (2.0 = doubling);
//! - [`BackoffPolicy::max`] the cap (`Duration::MAX` = uncapped);
//! - [`BackoffPolicy::jitter`] optional randomization.
//!
//! The delay after attempt `n` (1-indexed) is `first × factor^(n-1)`, clamped to `max`,
//! then jitter is applied. The base is derived purely from the attempt number, so jitter
//! output never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use flightline::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.delay_after(1), Duration::from_secs(1));
//! assert_eq!(backoff.delay_after(2), Duration::from_secs(2));
//! assert_eq!(backoff.delay_after(3), Duration::from_secs(4));
//! // 1s × 2^9 = 512s → capped at max=10s
//! assert_eq!(backoff.delay_after(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to every computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns pure doubling:
    /// - `first = 1s`;
    /// - `factor = 2.0`;
    /// - `max = Duration::MAX` (uncapped);
    /// - `jitter = None`.
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1))
    }
}

impl BackoffPolicy {
    /// Doubling backoff starting at `first`, uncapped and without jitter.
    #[must_use]
    pub fn exponential(first: Duration) -> Self {
        Self {
            first,
            max: Duration::MAX,
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Constant delay between attempts.
    #[must_use]
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: Duration::MAX,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Returns a copy with a delay cap.
    #[must_use]
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Returns a copy with a jitter policy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the delay to wait after failed attempt `attempt` (1-indexed).
    ///
    /// `attempt = 0` is treated like `1`.
    ///
    /// # Notes
    /// - If `factor` equals 1.0, the delay stays at `first` (up to `max`).
    /// - Results that overflow `Duration` or are not finite clamp to `max`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if secs.is_finite() && secs >= 0.0 {
            Duration::try_from_secs_f64(secs)
                .map(|d| d.min(self.max))
                .unwrap_or(self.max)
        } else {
            self.max
        };

        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            _ => self.jitter.apply(base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubling(first_ms: u64, max: Duration) -> BackoffPolicy {
        BackoffPolicy::exponential(Duration::from_millis(first_ms)).with_max(max)
    }

    #[test]
    fn first_failure_waits_first() {
        let policy = doubling(100, Duration::from_secs(30));
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(0), Duration::from_millis(100));
    }

    #[test]
    fn doubles_without_jitter() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(8));
    }

    #[test]
    fn constant_factor_stays_flat() {
        let policy = BackoffPolicy::constant(Duration::from_millis(500));
        for attempt in 1..10 {
            assert_eq!(policy.delay_after(attempt), Duration::from_millis(500));
        }
    }

    #[test]
    fn clamped_to_max() {
        let policy = doubling(100, Duration::from_secs(1));
        assert_eq!(policy.delay_after(11), Duration::from_secs(1));
    }

    #[test]
    fn first_exceeding_max_is_clamped() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(10)).with_max(Duration::from_secs(5));
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
    }

    #[test]
    fn uncapped_overflow_saturates() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_after(u32::MAX), Duration::MAX);
        assert_eq!(policy.delay_after(200), Duration::MAX);
    }

    #[test]
    fn equal_jitter_stays_in_upper_half() {
        let policy = doubling(100, Duration::from_secs(30)).with_jitter(JitterPolicy::Equal);
        for attempt in 1..15 {
            let base_ms = (100.0 * 2.0f64.powi(attempt as i32 - 1)).min(30_000.0);
            let delay = policy.delay_after(attempt);
            assert!(delay >= Duration::from_millis((base_ms / 2.0) as u64));
            assert!(delay <= Duration::from_millis(base_ms as u64));
        }
    }

    #[test]
    fn decorrelated_jitter_respects_floor() {
        let policy = doubling(100, Duration::from_secs(30)).with_jitter(JitterPolicy::Decorrelated);
        let mut lowest = Duration::MAX;
        for _ in 0..100 {
            lowest = lowest.min(policy.delay_after(9));
        }
        assert!(lowest >= Duration::from_millis(100));
    }
}
