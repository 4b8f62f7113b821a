//! # Race an operation against a deadline.
//!
//! [`DeadlineRace`] starts an operation and a timer together and surfaces whichever
//! finishes first.
//!
//! ## Flow
//! ```text
//! run_within(parent, op)
//!   ├─► child = parent.child_token()
//!   ├─► select! (biased)
//!   │     ├─ op(child) finished ──► Ok(v) / Err(op error)   (never masked as timeout)
//!   │     ├─ timer fired        ──► child.cancel(), publish TimeoutHit, Err(Timeout)
//!   │     └─ parent cancelled   ──► child.cancel(), Err(Canceled)
//!   └─► losing future dropped on return
//! ```
//!
//! ## Rules
//! - Exactly one of {value, `Timeout`, operation error} is returned.
//! - Cancellation is cooperative: the operation's token is cancelled when it loses, and the
//!   future itself is dropped, which aborts it at its next suspension point.
//! - Child cancellation does **not** affect the parent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::FlightError;
use crate::events::{BroadcastBus, Event, EventKind};

/// Deadline combinator with a fixed timeout.
#[derive(Clone)]
pub struct DeadlineRace {
    timeout: Duration,
    bus: Option<BroadcastBus>,
    label: Arc<str>,
}

impl DeadlineRace {
    /// Creates a race with the given deadline.
    ///
    /// A zero deadline still gives the operation one poll: an operation that is
    /// immediately ready wins.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            bus: None,
            label: Arc::from("deadline"),
        }
    }

    /// Publishes `TimeoutHit` to `bus` under `label` whenever the timer wins.
    #[must_use]
    pub fn with_bus(mut self, bus: BroadcastBus, label: impl Into<Arc<str>>) -> Self {
        self.bus = Some(bus);
        self.label = label.into();
        self
    }

    /// The configured deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `op` against the deadline with a fresh cancellation scope.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, FlightError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FlightError>>,
    {
        self.run_within(&CancellationToken::new(), op).await
    }

    /// Runs `op` against the deadline; cancelling `parent` ends the race with `Canceled`.
    pub async fn run_within<T, F, Fut>(
        &self,
        parent: &CancellationToken,
        op: F,
    ) -> Result<T, FlightError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FlightError>>,
    {
        let child = parent.child_token();
        let race = time::timeout(self.timeout, op(child.clone()));

        tokio::select! {
            biased;
            res = race => match res {
                Ok(outcome) => outcome,
                Err(_elapsed) => {
                    child.cancel();
                    let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                    tracing::debug!(label = %self.label, timeout_ms, "deadline hit");
                    self.publish_timeout();
                    Err(FlightError::Timeout { timeout: self.timeout })
                }
            },
            _ = parent.cancelled() => {
                child.cancel();
                Err(FlightError::Canceled)
            }
        }
    }

    /// Never waits: a full `Block` subscriber queue drops the event instead of stalling the race.
    fn publish_timeout(&self) {
        if let Some(bus) = &self.bus {
            bus.try_publish(
                Event::new(EventKind::TimeoutHit)
                    .with_key(Arc::clone(&self.label))
                    .with_timeout(self.timeout),
            );
        }
    }
}

/// Runs `op` under a deadline of `timeout`.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use flightline::{with_deadline, FlightError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let res = with_deadline(Duration::from_millis(10), |_ctx| async {
///     std::future::pending::<Result<(), FlightError>>().await
/// })
/// .await;
/// assert!(matches!(res, Err(FlightError::Timeout { .. })));
/// # }
/// ```
pub async fn with_deadline<T, F, Fut>(timeout: Duration, op: F) -> Result<T, FlightError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, FlightError>>,
{
    DeadlineRace::new(timeout).run(op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OverflowPolicy;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn fast_operation_wins() {
        let race = DeadlineRace::new(Duration::from_secs(2));
        let res = race
            .run(|_ctx| async {
                time::sleep(Duration::from_secs(1)).await;
                Ok::<_, FlightError>("done")
            })
            .await;
        assert_eq!(res, Ok("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_operation_times_out_at_deadline() {
        let start = Instant::now();
        let res: Result<(), _> = with_deadline(Duration::from_millis(500), |_ctx| {
            std::future::pending()
        })
        .await;

        assert_eq!(
            res,
            Err(FlightError::Timeout {
                timeout: Duration::from_millis(500)
            })
        );
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn early_failure_is_not_masked() {
        let res: Result<(), _> = with_deadline(Duration::from_secs(1), |_ctx| async {
            time::sleep(Duration::from_millis(10)).await;
            Err(FlightError::ServiceUnavailable)
        })
        .await;
        assert_eq!(res, Err(FlightError::ServiceUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn loser_observes_cancellation() {
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);

        let res: Result<(), _> = with_deadline(Duration::from_millis(100), move |ctx| {
            tokio::spawn(async move {
                ctx.cancelled().await;
                flag.store(true, Ordering::SeqCst);
            });
            std::future::pending()
        })
        .await;

        assert!(res.unwrap_err().is_timeout());
        tokio::task::yield_now().await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_ends_race() {
        let parent = CancellationToken::new();
        let trigger = parent.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let res: Result<(), _> = DeadlineRace::new(Duration::from_secs(10))
            .run_within(&parent, |_ctx| std::future::pending())
            .await;
        assert_eq!(res, Err(FlightError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_published() {
        let bus = BroadcastBus::unbounded();
        let mut sub = bus.subscribe();
        let race = DeadlineRace::new(Duration::from_millis(20)).with_bus(bus, "quote");

        let res: Result<(), _> = race.run(|_ctx| std::future::pending()).await;
        assert!(res.is_err());

        let ev = sub.try_recv().expect("timeout event");
        assert_eq!(ev.kind, EventKind::TimeoutHit);
        assert_eq!(ev.key.as_deref(), Some("quote"));
        assert_eq!(ev.timeout_ms, Some(20));
    }

    #[tokio::test(start_paused = true)]
    async fn full_block_subscriber_does_not_stall_the_race() {
        let bus = BroadcastBus::new(OverflowPolicy::Block, 1);
        let idle = bus.subscribe();
        bus.publish(Event::new(EventKind::Custom("backlog"))).await;

        let race = DeadlineRace::new(Duration::from_millis(100)).with_bus(bus, "quote");
        let start = Instant::now();
        let res: Result<(), _> = time::timeout(Duration::from_secs(60), race.run(|_ctx| std::future::pending()))
            .await
            .expect("race must not wait on the subscriber");

        assert_eq!(
            res,
            Err(FlightError::Timeout {
                timeout: Duration::from_millis(100)
            })
        );
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert_eq!(idle.dropped(), 1);
        assert_eq!(idle.pending(), 1);
    }
}
