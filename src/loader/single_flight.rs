//! # SingleFlight: one computation per key, shared by every concurrent caller.
//!
//! ```text
//! load(key, compute)
//!   ├─ lock table
//!   │    ├─ key in flight ──► waiters += 1, clone shared future          (compute dropped)
//!   │    └─ otherwise     ──► leader: spawn compute, insert shared handle
//!   ├─ unlock
//!   └─ await shared future ──► same Result for leader and waiters
//!
//! spawned load: catch_unwind(compute) ──► remove key from table ──► resolve
//! ```
//!
//! ## Rules
//! - `compute` runs at most once per wave; later callers attach instead.
//! - The handle is removed when the load completes, success or failure: nothing is cached.
//! - The load runs as its own task, so it finishes even when the leader's caller is dropped.
//! - A panic in `compute` resolves every waiter with `OperationFailed`.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::FlightError;

type SharedLoad<V> = Shared<BoxFuture<'static, Result<V, FlightError>>>;

struct InFlight<V> {
    load: SharedLoad<V>,
    waiters: Arc<AtomicUsize>,
}

type Table<K, V> = Mutex<HashMap<K, InFlight<V>>>;

/// Decrements the waiter count when a caller stops waiting (completed or dropped).
struct WaiterGuard(Arc<AtomicUsize>);

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Deduplicates concurrent loads of the same key.
///
/// Cloning is cheap and clones share the in-flight table.
///
/// # Example
/// ```
/// use flightline::{FlightError, SingleFlight};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flights: SingleFlight<String, u32> = SingleFlight::new();
/// let v = flights
///     .load("answer".to_string(), || async { Ok::<_, FlightError>(42) })
///     .await;
/// assert_eq!(v, Ok(42));
/// assert_eq!(flights.in_flight(), 0);
/// # }
/// ```
pub struct SingleFlight<K, V> {
    table: Arc<Table<K, V>>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty in-flight table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the outcome of the load for `key`, starting one with `compute` if none is in flight.
    ///
    /// `compute` is only invoked by the leader; attached callers drop it unused.
    pub async fn load<F, Fut>(&self, key: K, compute: F) -> Result<V, FlightError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FlightError>> + Send + 'static,
    {
        let (load, waiters) = {
            let mut table = self.lock();
            match table.get(&key) {
                Some(flight) => {
                    drop(compute);
                    let n = flight.waiters.fetch_add(1, Ordering::AcqRel) + 1;
                    tracing::trace!(waiters = n, "joined in-flight load");
                    (flight.load.clone(), Arc::clone(&flight.waiters))
                }
                None => {
                    let load = self.start(key.clone(), compute());
                    let waiters = Arc::new(AtomicUsize::new(1));
                    table.insert(
                        key,
                        InFlight {
                            load: load.clone(),
                            waiters: Arc::clone(&waiters),
                        },
                    );
                    tracing::trace!(in_flight = table.len(), "elected load leader");
                    (load, waiters)
                }
            }
        };

        let _guard = WaiterGuard(waiters);
        load.await
    }

    /// Number of keys currently being loaded.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Callers currently awaiting the load of `key` (0 when nothing is in flight).
    pub fn waiters(&self, key: &K) -> usize {
        self.lock()
            .get(key)
            .map_or(0, |flight| flight.waiters.load(Ordering::Acquire))
    }

    fn start<Fut>(&self, key: K, work: Fut) -> SharedLoad<V>
    where
        Fut: Future<Output = Result<V, FlightError>> + Send + 'static,
    {
        let table = Arc::clone(&self.table);
        let handle = tokio::spawn(async move {
            let res = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(res) => res,
                Err(panic) => Err(FlightError::from_panic(panic)),
            };
            table
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            res
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(FlightError::failed(format!("load task aborted: {e}"))))
        }
        .boxed()
        .shared()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, InFlight<V>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::task::JoinSet;
    use tokio::time;

    fn slow_value(
        calls: Arc<AtomicUsize>,
        value: u32,
    ) -> impl Future<Output = Result<u32, FlightError>> + Send + 'static {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            time::sleep(Duration::from_millis(100)).await;
            Ok(value)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_loads_compute_once() {
        let flights: SingleFlight<String, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut set = JoinSet::new();
        for _ in 0..10 {
            let flights = flights.clone();
            let calls = Arc::clone(&calls);
            set.spawn(async move { flights.load("k".into(), || slow_value(Arc::clone(&calls), 7)).await });
        }

        let mut results = Vec::new();
        while let Some(res) = set.join_next().await {
            results.push(res.unwrap());
        }

        assert_eq!(results, vec![Ok(7); 10]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_everyone_and_is_not_cached() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                time::sleep(Duration::from_millis(10)).await;
                Err(FlightError::ServiceUnavailable)
            }
        };

        let (a, b) = tokio::join!(flights.load("k", failing), flights.load("k", failing));
        assert_eq!(a, Err(FlightError::ServiceUnavailable));
        assert_eq!(b, Err(FlightError::ServiceUnavailable));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let again = flights.load("k", failing).await;
        assert_eq!(again, Err(FlightError::ServiceUnavailable));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_do_not_share() {
        let flights: SingleFlight<u8, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            flights.load(1, || slow_value(Arc::clone(&calls), 1)),
            flights.load(2, || slow_value(Arc::clone(&calls), 2)),
        );
        assert_eq!((a, b), (Ok(1), Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panic_becomes_operation_failed_and_clears_table() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let res = flights
            .load("boom", || async {
                if true {
                    panic!("kaboom");
                }
                Ok(0)
            })
            .await;

        assert_eq!(res, Err(FlightError::failed("panicked: kaboom")));
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_leader_does_not_strand_waiters() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let flights = flights.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move { flights.load("k", || slow_value(Arc::clone(&calls), 9)).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(flights.in_flight(), 1);

        let waiter = {
            let flights = flights.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move { flights.load("k", || slow_value(Arc::clone(&calls), 0)).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(flights.waiters(&"k"), 2);

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert_eq!(flights.waiters(&"k"), 1);

        assert_eq!(waiter.await.unwrap(), Ok(9));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.waiters(&"k"), 0);
    }
}
