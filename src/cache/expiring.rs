//! # ExpiringCache: TTL store with a soft size bound.
//!
//! ## Rules
//! - `get` never returns an entry with `now >= expires_at`; such entries are purged on access.
//! - After every `put`, `len() <= max_entries`.
//! - Capacity eviction removes expired entries first, then the oldest by `created_at`
//!   (insertion order on ties) down to `max_entries - overshoot_margin`.
//! - Eviction is by creation age, not by access: reads never refresh an entry.
//!
//! ## Put flow
//! ```text
//! put(k, v, ttl)
//!   ├─► ttl == 0 → drop existing k, store nothing
//!   ├─► insert/overwrite { created_at = now, expires_at = now + ttl }
//!   └─► len > max_entries?
//!         ├─► purge expired
//!         └─► still over → sort by (created_at, order), evict down to target
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::entry::CacheEntry;
use super::stats::{CacheCounters, CacheStats};
use crate::config::Config;
use crate::error::ConfigError;

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    next_order: u64,
}

impl<K: Eq + Hash, V> CacheState<K, V> {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired_at(now));
        before - self.entries.len()
    }
}

/// Thread-safe key/value store with per-entry TTL and a soft size bound.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use flightline::ExpiringCache;
///
/// let cache: ExpiringCache<String, u32> = ExpiringCache::new(2, Duration::from_secs(60), 0);
/// cache.put("a".to_string(), 1);
/// cache.put("b".to_string(), 2);
/// cache.put("c".to_string(), 3);
///
/// assert_eq!(cache.len(), 2);
/// assert_eq!(cache.get("a"), None); // oldest evicted
/// assert_eq!(cache.get("c"), Some(3));
/// ```
pub struct ExpiringCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    max_entries: usize,
    ttl: Duration,
    overshoot_margin: usize,
    counters: CacheCounters,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `max_entries` (clamped to a minimum of 1).
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration, overshoot_margin: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                next_order: 0,
            }),
            max_entries: max_entries.max(1),
            ttl,
            overshoot_margin,
            counters: CacheCounters::default(),
        }
    }

    /// Creates a cache from `cfg.max_entries`, `cfg.ttl` and `cfg.overshoot_margin`.
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        if cfg.max_entries == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(Self::new(cfg.max_entries, cfg.ttl, cfg.overshoot_margin))
    }

    /// Creates a cache with the documented defaults (100 entries, 300s, margin 10).
    #[must_use]
    pub fn with_defaults() -> Self {
        let cfg = Config::default();
        Self::new(cfg.max_entries, cfg.ttl, cfg.overshoot_margin)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value for `key` if present and not expired.
    ///
    /// An expired entry counts as a miss and is removed.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        let mut st = self.lock();
        let live = st
            .entries
            .get(key)
            .map(|e| (!e.is_expired_at(now)).then(|| e.value.clone()));

        match live {
            Some(Some(value)) => {
                drop(st);
                self.counters.hit();
                Some(value)
            }
            Some(None) => {
                st.entries.remove(key);
                drop(st);
                self.counters.expired(1);
                self.counters.miss();
                None
            }
            None => {
                drop(st);
                self.counters.miss();
                None
            }
        }
    }

    /// Inserts or overwrites `key` using the cache's default TTL.
    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.ttl);
    }

    /// Inserts or overwrites `key` with `expires_at = now + ttl`.
    ///
    /// A zero `ttl` stores nothing and drops any previous entry for `key`.
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut st = self.lock();

        if ttl.is_zero() {
            st.entries.remove(&key);
            return;
        }

        let order = st.next_order;
        st.next_order += 1;
        st.entries.insert(key, CacheEntry::new(value, now, ttl, order));
        self.counters.insert();

        if st.entries.len() > self.max_entries {
            self.shrink(&mut *st, now);
        }
    }

    /// Restores the size bound: expired entries first, then oldest-created.
    fn shrink(&self, st: &mut CacheState<K, V>, now: Instant) {
        let expired = st.purge_expired(now);
        self.counters.expired(expired);
        if st.entries.len() <= self.max_entries {
            tracing::trace!(expired, len = st.entries.len(), "cache bound restored by expiry");
            return;
        }

        let target = self.eviction_target();
        let excess = st.entries.len() - target;

        let mut ranked: Vec<((Instant, u64), K)> = st
            .entries
            .iter()
            .map(|(k, e)| (e.age_rank(), k.clone()))
            .collect();
        ranked.sort_unstable_by_key(|(rank, _)| *rank);

        for (_, key) in ranked.into_iter().take(excess) {
            st.entries.remove(&key);
        }
        self.counters.evicted(excess);
        tracing::debug!(
            evicted = excess,
            expired,
            len = st.entries.len(),
            max_entries = self.max_entries,
            "cache capacity eviction"
        );
    }

    /// Size an eviction batch shrinks to; never below one entry.
    #[inline]
    fn eviction_target(&self) -> usize {
        self.max_entries.saturating_sub(self.overshoot_margin).max(1)
    }

    /// True if `key` currently maps to a live entry. Does not purge or count.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired_at(now))
    }

    /// Time left before `key` expires, if it is live.
    pub fn time_to_live<Q>(&self, key: &Q) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .filter(|e| !e.is_expired_at(now))
            .map(|e| e.time_remaining(now))
    }

    /// Removes every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let removed = self.lock().purge_expired(Instant::now());
        self.counters.expired(removed);
        removed
    }

    /// Number of stored entries (expired ones count until purged).
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Configured size bound.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Default TTL used by [`put`](Self::put).
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Snapshot of hit/miss/insert/expiry/eviction counters.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Spawns a background sweep removing expired entries every `interval`.
    ///
    /// The sweep never changes what `get` returns; it only reclaims memory earlier.
    /// It stops when `token` is cancelled or the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, token: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let every = every.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(live) = cache.upgrade() else { break };
                        let removed = live.purge_expired();
                        if removed > 0 {
                            tracing::trace!(removed, "cache sweep");
                        }
                    }
                }
            }
        })
    }
}

impl<K, V> Default for ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max: usize, margin: usize) -> ExpiringCache<String, u32> {
        ExpiringCache::new(max, Duration::from_secs(300), margin)
    }

    #[tokio::test(start_paused = true)]
    async fn returns_value_until_ttl_elapses() {
        let c = cache(10, 0);
        c.put_with_ttl("k".into(), 7, Duration::from_secs(300));

        time::advance(Duration::from_millis(299_999)).await;
        assert_eq!(c.get("k"), Some(7));

        time::advance(Duration::from_millis(1)).await;
        assert_eq!(c.get("k"), None);
        assert_eq!(c.len(), 0, "expired entry purged on access");
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_resets_expiry() {
        let c = cache(10, 0);
        c.put_with_ttl("k".into(), 1, Duration::from_secs(10));
        time::advance(Duration::from_secs(8)).await;
        c.put_with_ttl("k".into(), 2, Duration::from_secs(10));
        time::advance(Duration::from_secs(8)).await;
        assert_eq!(c.get("k"), Some(2));
        assert_eq!(c.time_to_live("k"), Some(Duration::from_secs(2)));
    }

    #[test]
    fn batch_eviction_keeps_newest() {
        let c = cache(100, 10);
        for i in 0..100u32 {
            c.put(format!("k{i}"), i);
            assert!(c.len() <= 100);
        }
        assert_eq!(c.len(), 100);

        c.put("k100".into(), 100);
        assert_eq!(c.len(), 90);
        for i in 0..11u32 {
            assert!(!c.contains_key(&format!("k{i}")), "k{i} should be evicted");
        }
        for i in 11..=100u32 {
            assert_eq!(c.get(&format!("k{i}")), Some(i));
        }
        assert_eq!(c.stats().evictions, 11);
    }

    #[test]
    fn bound_holds_after_every_put() {
        let c = cache(5, 2);
        for i in 0..50u32 {
            c.put(format!("k{i}"), i);
            assert!(c.len() <= 5, "len {} after put {i}", c.len());
        }
        assert_eq!(c.get("k49"), Some(49));
    }

    #[test]
    fn margin_larger_than_bound_keeps_latest() {
        let c = cache(3, 10);
        for i in 0..4u32 {
            c.put(format!("k{i}"), i);
        }
        assert_eq!(c.len(), 1);
        assert_eq!(c.get("k3"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_evicted_before_live_ones() {
        let c = cache(3, 0);
        c.put_with_ttl("short".into(), 0, Duration::from_secs(1));
        c.put_with_ttl("a".into(), 1, Duration::from_secs(60));
        c.put_with_ttl("b".into(), 2, Duration::from_secs(60));
        time::advance(Duration::from_secs(2)).await;

        c.put_with_ttl("c".into(), 3, Duration::from_secs(60));
        assert_eq!(c.len(), 3);
        assert_eq!(c.get("a"), Some(1));
        let stats = c.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_refreshes_creation_age() {
        let c = cache(2, 0);
        c.put("a".into(), 1);
        time::advance(Duration::from_secs(1)).await;
        c.put("b".into(), 2);
        time::advance(Duration::from_secs(1)).await;
        c.put("a".into(), 10);
        time::advance(Duration::from_secs(1)).await;
        c.put("c".into(), 3);

        assert_eq!(c.get("b"), None);
        assert_eq!(c.get("a"), Some(10));
        assert_eq!(c.get("c"), Some(3));
    }

    #[test]
    fn reads_do_not_protect_from_eviction() {
        let c = cache(2, 0);
        c.put("a".into(), 1);
        c.put("b".into(), 2);
        assert_eq!(c.get("a"), Some(1));
        c.put("c".into(), 3);
        assert_eq!(c.get("a"), None, "eviction is by creation, not access");
    }

    #[test]
    fn zero_ttl_stores_nothing() {
        let c = cache(10, 0);
        c.put("k".into(), 1);
        c.put_with_ttl("k".into(), 2, Duration::ZERO);
        assert_eq!(c.get("k"), None);
        assert!(c.is_empty());
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let c = cache(10, 0);
        c.put("k".into(), 1);
        c.get("k");
        c.get("missing");
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses, stats.inserts), (1, 1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn from_config_rejects_zero_capacity() {
        let cfg = Config::default().with_max_entries(0);
        assert!(matches!(
            ExpiringCache::<String, u32>::from_config(&cfg),
            Err(ConfigError::ZeroCapacity)
        ));
        let c = ExpiringCache::<String, u32>::from_config(&Config::default()).unwrap();
        assert_eq!(c.max_entries(), 100);
        assert_eq!(c.ttl(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_reclaims_expired_entries() {
        let c = Arc::new(cache(10, 0));
        c.put_with_ttl("k".into(), 1, Duration::from_secs(1));
        let token = CancellationToken::new();
        let sweeper = c.spawn_sweeper(Duration::from_millis(500), token.clone());

        time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(c.len(), 0);

        token.cancel();
        sweeper.await.unwrap();
    }
}
