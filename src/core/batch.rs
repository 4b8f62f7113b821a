//! # BatchCoordinator: ordered fan-out / fan-in.
//!
//! Spawns one unit per input item and reassembles the results in **input order**,
//! whatever order the units finish in.
//!
//! ```text
//! items[0]  items[1]  ...  items[N-1]
//!    │         │               │
//!    └──► set.spawn(unit(idx, item, child_token))       (one per item)
//!              ├─ acquire permit (if max_concurrent > 0; cancellable)
//!              ├─ transform(item, token)                 (panics caught)
//!              └─ return (idx, result)
//!
//! join_next() ... ──► slots[idx] = result ──► Vec<Result<T, FlightError>>
//! ```
//!
//! ## Rules
//! - `output.len() == input.len()`; slot `i` always belongs to `items[i]`.
//! - A failing or panicking unit only fills its own slot.
//! - Units waiting for a permit when the parent is cancelled resolve to `Canceled`;
//!   running units observe cancellation through their token.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::{select, sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::FlightError;

/// Runs a transform over a batch of items concurrently, preserving input order.
///
/// # Example
/// ```
/// use flightline::{BatchCoordinator, FlightError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let out = BatchCoordinator::new()
///     .run(vec![1u32, 2, 3], |n, _ctx| async move {
///         if n == 2 { Err(FlightError::failed("two")) } else { Ok(n * 10) }
///     })
///     .await;
///
/// assert_eq!(out[0], Ok(10));
/// assert!(out[1].is_err());
/// assert_eq!(out[2], Ok(30));
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchCoordinator {
    max_concurrent: usize,
}

impl BatchCoordinator {
    /// Unbounded concurrency: every item starts immediately.
    #[must_use]
    pub fn new() -> Self {
        Self { max_concurrent: 0 }
    }

    /// At most `n` transforms in flight at once (`0` = unlimited).
    #[must_use]
    pub fn with_max_concurrent(n: usize) -> Self {
        Self { max_concurrent: n }
    }

    /// Uses `cfg.max_concurrent`.
    #[must_use]
    pub fn from_config(cfg: &Config) -> Self {
        Self::with_max_concurrent(cfg.max_concurrent)
    }

    /// The concurrency bound, `None` when unlimited.
    pub fn max_concurrent(&self) -> Option<usize> {
        match self.max_concurrent {
            0 => None,
            n => Some(n),
        }
    }

    /// Applies `transform` to every item and returns one result per item, in input order.
    pub async fn run<K, T, F, Fut>(&self, items: Vec<K>, transform: F) -> Vec<Result<T, FlightError>>
    where
        K: Send + 'static,
        T: Send + 'static,
        F: Fn(K, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FlightError>> + Send + 'static,
    {
        self.run_within(&CancellationToken::new(), items, transform).await
    }

    /// Like [`run`](Self::run), with every unit scoped under `parent`.
    pub async fn run_within<K, T, F, Fut>(
        &self,
        parent: &CancellationToken,
        items: Vec<K>,
        transform: F,
    ) -> Vec<Result<T, FlightError>>
    where
        K: Send + 'static,
        T: Send + 'static,
        F: Fn(K, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FlightError>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let transform = Arc::new(transform);
        let semaphore = self.build_semaphore();
        let mut set = JoinSet::new();

        for (idx, item) in items.into_iter().enumerate() {
            let transform = Arc::clone(&transform);
            let semaphore = semaphore.clone();
            let token = parent.child_token();
            set.spawn(async move { (idx, run_unit(item, token, semaphore, transform.as_ref()).await) });
        }

        let mut slots: Vec<Option<Result<T, FlightError>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, res)) => slots[idx] = Some(res),
                Err(e) => tracing::warn!(error = %e, "batch unit aborted"),
            }
        }

        let failed = slots
            .iter()
            .filter(|s| !matches!(s, Some(Ok(_))))
            .count();
        tracing::debug!(total, failed, "batch completed");

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(FlightError::Canceled)))
            .collect()
    }

    fn build_semaphore(&self) -> Option<Arc<Semaphore>> {
        self.max_concurrent().map(|n| Arc::new(Semaphore::new(n)))
    }
}

async fn run_unit<K, T, F, Fut>(
    item: K,
    token: CancellationToken,
    semaphore: Option<Arc<Semaphore>>,
    transform: &F,
) -> Result<T, FlightError>
where
    F: Fn(K, CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, FlightError>>,
{
    let _permit = match semaphore {
        Some(sem) => {
            let permit = sem.acquire_owned();
            tokio::pin!(permit);
            select! {
                biased;
                _ = token.cancelled() => return Err(FlightError::Canceled),
                res = &mut permit => match res {
                    Ok(p) => Some(p),
                    Err(_closed) => return Err(FlightError::Canceled),
                },
            }
        }
        None => None,
    };
    if token.is_cancelled() {
        return Err(FlightError::Canceled);
    }

    match AssertUnwindSafe(transform(item, token)).catch_unwind().await {
        Ok(res) => res,
        Err(panic) => Err(FlightError::from_panic(panic)),
    }
}
