//! # flightline
//!
//! **Flightline** is a small toolkit of in-process coordination primitives for
//! services that sit in front of slow or unreliable backends.
//!
//! It provides a TTL cache, single-flight load deduplication, deadline races,
//! retries with exponential backoff, an ordered broadcast bus and an ordered
//! batch fan-out. Everything is single-process and in-memory; the primitives
//! are meant to be composed by the caller.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!        items[0]          items[1]          items[N-1]
//!           │                 │                   │
//!           ▼                 ▼                   ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  BatchCoordinator (one unit per item, results in input order)     │
//! │  - optional semaphore (max_concurrent)                            │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │ CachedLoader │   │ CachedLoader │   │ CachedLoader │
//!     │   ::get()    │   │   ::get()    │   │   ::get()    │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//!     ┌───────────────────────────────────────────────────┐
//!     │ ExpiringCache ── hit ──► value                    │
//!     └──────────────────────┬────────────────────────────┘
//!                            │ miss
//!                            ▼
//!     ┌───────────────────────────────────────────────────┐
//!     │ SingleFlight (one leader per key, waiters attach) │
//!     └──────────────────────┬────────────────────────────┘
//!                            │ leader
//!                            ▼
//!     ┌───────────────────────────────────────────────────┐       Publishes:
//!     │ RetryPolicy ──► DeadlineRace ──► Fetch::fetch     │ ───►  - AttemptStarting
//!     └───────────────────────────────────────────────────┘       - AttemptFailed
//!                                                                 - BackoffScheduled
//!                                                                 - RetryExhausted
//!                                                                 - TimeoutHit
//!                                                                       │
//!                                                                       ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                BroadcastBus (one global publish order)            │
//! └───────────────┬─────────────────────┬─────────────────────┬───────┘
//!                 ▼                     ▼                     ▼
//!            [queue S1]            [queue S2]            [queue SN]
//!                 ▼                     ▼                     ▼
//!          Subscription 1        Subscription 2        Subscription N
//! ```
//!
//! ### Retry lifecycle
//! ```text
//! RetryPolicy::run(op)
//!
//! loop {
//!   ├─► attempt += 1, publish AttemptStarting
//!   ├─► op(child_token)            (raced against attempt_timeout if set)
//!   │       ├─ Ok  ──► return value
//!   │       └─ Err ──► publish AttemptFailed
//!   │                  ├─ not retryable     ─► return error verbatim
//!   │                  ├─ attempt == max    ─► publish RetryExhausted, return RetryExhausted
//!   │                  └─ otherwise:
//!   │                       ├─ delay = base_delay × 2^(attempt-1)
//!   │                       ├─ publish BackoffScheduled{ delay, attempt }
//!   │                       └─ sleep(delay) (cancellable)
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                          |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Cache**         | TTL entries, soft size bound with batch eviction.            | [`ExpiringCache`], [`CacheStats`]           |
//! | **Loading**       | Single-flight dedup and read-through loading.                | [`SingleFlight`], [`Fetch`], [`CachedLoader`] |
//! | **Execution**     | Deadlines, retries, ordered batches.                         | [`DeadlineRace`], [`RetryPolicy`], [`BatchCoordinator`] |
//! | **Events**        | Ordered fan-out to independent subscriber queues.            | [`BroadcastBus`], [`Subscription`], [`Event`] |
//! | **Policies**      | Backoff growth and optional jitter.                          | [`BackoffPolicy`], [`JitterPolicy`]         |
//! | **Errors**        | Typed, cloneable outcomes.                                   | [`FlightError`], [`ConfigError`]            |
//! | **Configuration** | Centralized defaults.                                        | [`Config`]                                  |
//!
//! ## Optional features
//! - `logging`: exports [`LogWriter`], a bus subscriber that writes events through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use flightline::{BatchCoordinator, CachedLoader, Config, FetchFn, FlightError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::default().with_retry(3, Duration::from_millis(10));
//!
//!     let source = FetchFn::new("prices", |sku: String, ctx: CancellationToken| async move {
//!         if ctx.is_cancelled() {
//!             return Err(FlightError::Canceled);
//!         }
//!         Ok(sku.len() as u64 * 100)
//!     });
//!     let loader = CachedLoader::from_config(source, &cfg)?;
//!
//!     let skus = vec!["apple".to_string(), "kiwi".to_string()];
//!     let prices = loader.get_many(skus, &BatchCoordinator::from_config(&cfg)).await;
//!
//!     assert_eq!(prices, vec![Ok(500), Ok(400)]);
//!     Ok(())
//! }
//! ```
mod cache;
mod config;
mod core;
mod error;
mod events;
mod loader;
mod policies;

// ---- Public re-exports ----

pub use cache::{CacheStats, ExpiringCache};
pub use config::Config;
pub use core::{BatchCoordinator, DeadlineRace, RetryPolicy, retry, with_deadline};
pub use error::{ConfigError, FlightError};
pub use events::{BroadcastBus, Event, EventKind, OverflowPolicy, Payload, Subscription, SubscriptionId};
pub use loader::{CachedLoader, Fetch, FetchFn, SingleFlight};
pub use policies::{BackoffPolicy, JitterPolicy};

// Optional: expose the tracing-backed bus subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use events::LogWriter;
