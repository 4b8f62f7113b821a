//! TTL cache with a soft size bound.
//!
//! ## Contents
//! - [`ExpiringCache`] the store (lazy expiry, batch eviction, optional sweeper)
//! - `CacheEntry` (internal) stored value with `created_at` / `expires_at`
//! - [`CacheStats`] counters snapshot
//!
//! The cache never fetches anything; compose it with
//! [`SingleFlight`](crate::SingleFlight) (see [`CachedLoader`](crate::CachedLoader)).

mod entry;
mod expiring;
mod stats;

pub use expiring::ExpiringCache;
pub use stats::CacheStats;
