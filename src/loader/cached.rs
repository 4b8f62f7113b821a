//! # CachedLoader: read-through cache over a [`Fetch`] source.
//!
//! ```text
//! get(key)
//!   ├─ cache hit ───────────────────────────────► Ok(value)
//!   └─ miss ──► SingleFlight::load(key)
//!                  └─ leader only:
//!                       RetryPolicy::run              (if configured)
//!                         └─ DeadlineRace per attempt (if configured)
//!                              └─ Fetch::fetch(key, token)
//!                       Ok(v)  ──► cache.put(key, v)
//!                       Err(e) ──► not cached
//! ```
//!
//! Only successful fetches are cached. Concurrent misses for the same key share one fetch.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStats, ExpiringCache};
use crate::config::Config;
use crate::core::{BatchCoordinator, RetryPolicy, with_deadline};
use crate::error::{ConfigError, FlightError};
use crate::loader::{Fetch, SingleFlight};

/// Cache + single-flight (+ optional retry and per-attempt deadline) in front of a source.
///
/// Cloning is cheap; clones share the cache, the in-flight table and the source.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use flightline::{CachedLoader, ExpiringCache, FetchFn, FlightError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let source = FetchFn::new("upper", |key: String, _ctx: CancellationToken| async move {
///     Ok::<_, FlightError>(key.to_uppercase())
/// });
/// let loader = CachedLoader::new(source, ExpiringCache::new(10, Duration::from_secs(60), 0));
///
/// assert_eq!(loader.get("abc".to_string()).await, Ok("ABC".to_string()));
/// assert_eq!(loader.stats().inserts, 1);
/// # }
/// ```
pub struct CachedLoader<S: Fetch> {
    source: Arc<S>,
    cache: Arc<ExpiringCache<S::Key, S::Value>>,
    flights: SingleFlight<S::Key, S::Value>,
    retry: Option<RetryPolicy>,
    attempt_timeout: Option<Duration>,
}

impl<S: Fetch> Clone for CachedLoader<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            cache: Arc::clone(&self.cache),
            flights: self.flights.clone(),
            retry: self.retry.clone(),
            attempt_timeout: self.attempt_timeout,
        }
    }
}

impl<S> CachedLoader<S>
where
    S: Fetch,
    S::Key: Eq + Hash + Clone + Send + Sync + 'static,
    S::Value: Clone + Send + Sync + 'static,
{
    /// Loader without retries or deadlines: one fetch per miss.
    #[must_use]
    pub fn new(source: S, cache: ExpiringCache<S::Key, S::Value>) -> Self {
        Self {
            source: Arc::new(source),
            cache: Arc::new(cache),
            flights: SingleFlight::new(),
            retry: None,
            attempt_timeout: None,
        }
    }

    /// Loader with cache, retry and per-attempt deadline taken from `cfg`.
    pub fn from_config(source: S, cfg: &Config) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let mut loader = Self::new(source, ExpiringCache::from_config(cfg)?);
        loader.attempt_timeout = cfg.attempt_deadline();
        loader.retry = Some(RetryPolicy::from_config(cfg)?);
        Ok(loader)
    }

    /// Retries failed fetches with `policy`.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        let policy = match self.attempt_timeout {
            Some(timeout) if policy.attempt_timeout().is_none() => policy.with_attempt_timeout(timeout),
            _ => policy,
        };
        self.retry = Some(policy);
        self
    }

    /// Bounds every fetch attempt by `timeout`.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self.retry = self.retry.map(|p| p.with_attempt_timeout(timeout));
        self
    }

    /// Returns the value for `key`, fetching it on a miss.
    pub async fn get(&self, key: S::Key) -> Result<S::Value, FlightError> {
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }

        let source = Arc::clone(&self.source);
        let cache = Arc::clone(&self.cache);
        let retry = self.retry.clone();
        let timeout = self.attempt_timeout;
        let k = key.clone();

        self.flights
            .load(key, move || async move {
                let res = fetch_through(source.as_ref(), &k, retry.as_ref(), timeout).await;
                match &res {
                    Ok(value) => cache.put(k, value.clone()),
                    Err(e) => tracing::debug!(source = source.name(), error = %e, "fetch failed, not cached"),
                }
                res
            })
            .await
    }

    /// Loads every key through `batch`, returning results in key order.
    pub async fn get_many(
        &self,
        keys: Vec<S::Key>,
        batch: &BatchCoordinator,
    ) -> Vec<Result<S::Value, FlightError>> {
        let loader = self.clone();
        batch
            .run(keys, move |key, _ctx| {
                let loader = loader.clone();
                async move { loader.get(key).await }
            })
            .await
    }

    /// The underlying cache.
    pub fn cache(&self) -> &ExpiringCache<S::Key, S::Value> {
        &self.cache
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The fetch source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Keys with a fetch in progress.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }
}

async fn fetch_through<S>(
    source: &S,
    key: &S::Key,
    retry: Option<&RetryPolicy>,
    timeout: Option<Duration>,
) -> Result<S::Value, FlightError>
where
    S: Fetch,
    S::Key: Clone,
{
    let attempt = |ctx: CancellationToken| source.fetch(key.clone(), ctx);
    match (retry, timeout) {
        (Some(policy), _) => policy.run(attempt).await,
        (None, Some(timeout)) => with_deadline(timeout, attempt).await,
        (None, None) => attempt(CancellationToken::new()).await,
    }
}
