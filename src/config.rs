//! # Toolkit configuration.
//!
//! Provides [`Config`], centralized defaults for every primitive.
//!
//! Config is used in two ways:
//! 1. **Component creation**: `ExpiringCache::from_config(&cfg)`, `RetryPolicy::from_config(&cfg)`, ...
//! 2. **Validation**: [`Config::validate`] rejects values no component can honor.
//!
//! ## Sentinel values
//! - `max_concurrent = 0` → unlimited batch fan-out (no semaphore created)
//! - `attempt_timeout = 0s` → attempts run without a deadline

use std::time::Duration;

use crate::error::ConfigError;
use crate::events::OverflowPolicy;

/// Global configuration for the coordination primitives.
///
/// ## Field semantics
/// - `max_entries`: cache soft bound, restored after every `put`
/// - `ttl`: default time-to-live for cache entries
/// - `overshoot_margin`: extra room freed by one eviction batch
/// - `max_attempts`: retry budget (`>= 1`)
/// - `base_delay`: delay after the first failed attempt, doubled afterwards
/// - `attempt_timeout`: per-attempt deadline (`0s` = none)
/// - `bus_overflow` / `bus_capacity`: per-subscriber queue policy
/// - `max_concurrent`: batch concurrency bound (`0` = unlimited)
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of live cache entries after a mutating call returns.
    pub max_entries: usize,

    /// Default entry time-to-live used by `ExpiringCache::put`.
    pub ttl: Duration,

    /// Number of additional entries freed when capacity eviction runs.
    ///
    /// Eviction stops at `max_entries - overshoot_margin` (never below one entry),
    /// so a burst of inserts does not trigger an eviction on every call.
    pub overshoot_margin: usize,

    /// Total attempts permitted by the retry policy, including the first.
    pub max_attempts: u32,

    /// Backoff delay after attempt 1; attempt `n` waits `base_delay * 2^(n-1)`.
    pub base_delay: Duration,

    /// Optional per-attempt deadline applied by retrying loaders.
    ///
    /// - `Duration::ZERO` = no deadline
    /// - `> 0` = each attempt races against this timeout
    pub attempt_timeout: Duration,

    /// Backpressure policy of each subscriber queue on the broadcast bus.
    pub bus_overflow: OverflowPolicy,

    /// Queue capacity used by the bounded overflow policies.
    pub bus_capacity: usize,

    /// Maximum number of batch items processed concurrently (`0` = unlimited).
    pub max_concurrent: usize,
}

impl Config {
    /// Returns the batch concurrency limit as an `Option`.
    ///
    /// - `None` → one concurrent unit per item
    /// - `Some(n)` → at most `n` items in flight
    #[inline]
    pub fn concurrency_limit(&self) -> Option<usize> {
        if self.max_concurrent == 0 {
            None
        } else {
            Some(self.max_concurrent)
        }
    }

    /// Returns the per-attempt deadline as an `Option`.
    #[inline]
    pub fn attempt_deadline(&self) -> Option<Duration> {
        if self.attempt_timeout == Duration::ZERO {
            None
        } else {
            Some(self.attempt_timeout)
        }
    }

    /// Checks that every component can be built from this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.bus_overflow.is_bounded() && self.bus_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }

    /// Returns a copy with a different cache bound.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Returns a copy with a different default TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns a copy with a different eviction margin.
    #[must_use]
    pub fn with_overshoot_margin(mut self, margin: usize) -> Self {
        self.overshoot_margin = margin;
        self
    }

    /// Returns a copy with a different retry budget and base delay.
    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.base_delay = base_delay;
        self
    }

    /// Returns a copy with a per-attempt deadline.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Returns a copy with a different bus queue policy.
    #[must_use]
    pub fn with_bus(mut self, overflow: OverflowPolicy, capacity: usize) -> Self {
        self.bus_overflow = overflow;
        self.bus_capacity = capacity;
        self
    }

    /// Returns a copy with a batch concurrency bound.
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `max_entries = 100`, `ttl = 300s`, `overshoot_margin = 10`
    /// - `max_attempts = 3`, `base_delay = 1s`, `attempt_timeout = 0s` (none)
    /// - `bus_overflow = Unbounded`, `bus_capacity = 1024`
    /// - `max_concurrent = 0` (unlimited)
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl: Duration::from_secs(300),
            overshoot_margin: 10,
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::ZERO,
            bus_overflow: OverflowPolicy::Unbounded,
            bus_capacity: 1024,
            max_concurrent: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_entries, 100);
        assert_eq!(cfg.ttl, Duration::from_secs(300));
        assert_eq!(cfg.overshoot_margin, 10);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.base_delay, Duration::from_secs(1));
        assert_eq!(cfg.concurrency_limit(), None);
        assert_eq!(cfg.attempt_deadline(), None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let cfg = Config::default().with_max_entries(0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroCapacity));

        let cfg = Config::default().with_retry(0, Duration::from_secs(1));
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroAttempts));

        let cfg = Config::default().with_bus(OverflowPolicy::DropOldest, 0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroQueueCapacity));

        let cfg = Config::default().with_bus(OverflowPolicy::Unbounded, 0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn sentinels_map_to_options() {
        let cfg = Config::default()
            .with_max_concurrent(4)
            .with_attempt_timeout(Duration::from_millis(500));
        assert_eq!(cfg.concurrency_limit(), Some(4));
        assert_eq!(cfg.attempt_deadline(), Some(Duration::from_millis(500)));
    }
}
