use std::time::Duration;

use tokio::time::Instant;

/// A stored value with its expiry bookkeeping.
///
/// Invariant: `expires_at > created_at`.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    pub(crate) value: V,
    /// When the entry was (re)written.
    pub(crate) created_at: Instant,
    /// First instant at which the entry is no longer returned.
    pub(crate) expires_at: Instant,
    /// Monotonic insertion counter; breaks `created_at` ties during eviction.
    pub(crate) order: u64,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, now: Instant, ttl: Duration, order: u64) -> Self {
        // Clamp TTLs that overflow the clock to roughly thirty years.
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(30 * 365 * 24 * 60 * 60));
        Self {
            value,
            created_at: now,
            expires_at,
            order,
        }
    }

    /// True once `now` reached `expires_at`.
    #[inline]
    pub(crate) fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub(crate) fn time_remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Eviction rank: oldest first, insertion order on ties.
    #[inline]
    pub(crate) fn age_rank(&self) -> (Instant, u64) {
        (self.created_at, self.order)
    }
}
