//! # RetryPolicy: repeat a fallible operation with exponential backoff.
//!
//! ## Event flow
//! For each attempt, the policy publishes (when a bus is attached):
//! ```text
//! AttemptStarting → [operation] → Ok ──────────────► return value
//!                               → Err(retryable)
//!                                   ├─ attempt < max → AttemptFailed → BackoffScheduled → [sleep]
//!                                   └─ attempt = max → AttemptFailed → RetryExhausted
//!                               → Err(final)        → AttemptFailed → return error verbatim
//! ```
//!
//! ## Architecture
//! ```text
//! loop {
//!   ├─► parent cancelled?            → Err(Canceled)
//!   ├─► attempt += 1
//!   ├─► run op(child token)          (under DeadlineRace if attempt_timeout is set)
//!   ├─► Ok(v)                        → return Ok(v)
//!   ├─► !err.is_retryable()          → return Err(err)
//!   ├─► attempt == max_attempts      → return Err(RetryExhausted { attempts, last })
//!   └─► sleep(backoff.delay_after(attempt))   (cancellable)
//! }
//! ```
//!
//! ## Rules
//! - Attempt 1 runs immediately; after failed attempt `n` the policy waits
//!   `base_delay × 2^(n-1)` (no jitter unless configured).
//! - Attempts run **sequentially**, never in parallel.
//! - Only the final attempt's error is kept.
//! - The backoff sleep is a suspension point: cancelling the parent token aborts it, and so
//!   does an enclosing [`DeadlineRace`] dropping the whole retry future.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::deadline::DeadlineRace;
use crate::error::{ConfigError, FlightError};
use crate::events::{BroadcastBus, Event, EventKind};
use crate::policies::{BackoffPolicy, JitterPolicy};

/// Retry wrapper with exponential backoff.
///
/// # Example
/// ```
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
/// use flightline::{FlightError, RetryPolicy};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let calls = AtomicU32::new(0);
/// let policy = RetryPolicy::new(3, Duration::from_millis(1));
///
/// let value = policy
///     .run(|_ctx| {
///         let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
///         async move {
///             if n < 3 { Err(FlightError::ServiceUnavailable) } else { Ok(n) }
///         }
///     })
///     .await;
///
/// assert_eq!(value, Ok(3));
/// # }
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffPolicy,
    attempt_timeout: Option<Duration>,
    bus: Option<BroadcastBus>,
    label: Arc<str>,
}

impl RetryPolicy {
    /// Doubling backoff starting at `base_delay`, without jitter.
    ///
    /// `max_attempts` is clamped to a minimum of 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffPolicy::exponential(base_delay),
            attempt_timeout: None,
            bus: None,
            label: Arc::from("retry"),
        }
    }

    /// Builds a policy from `cfg.max_attempts`, `cfg.base_delay` and `cfg.attempt_timeout`.
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        if cfg.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        let mut policy = Self::new(cfg.max_attempts, cfg.base_delay);
        policy.attempt_timeout = cfg.attempt_deadline();
        Ok(policy)
    }

    /// Replaces the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enables jitter on every delay.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.backoff.jitter = jitter;
        self
    }

    /// Caps every delay at `max`.
    #[must_use]
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.backoff.max = max;
        self
    }

    /// Races every attempt against `timeout`; a lost race counts as a retryable failure.
    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Publishes lifecycle events to `bus`, tagged with `label`.
    #[must_use]
    pub fn with_bus(mut self, bus: BroadcastBus, label: impl Into<Arc<str>>) -> Self {
        self.bus = Some(bus);
        self.label = label.into();
        self
    }

    /// Total attempts permitted, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The backoff policy in use.
    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// The per-attempt deadline, if any.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    /// Runs `op` until it succeeds or the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, FlightError>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FlightError>>,
    {
        self.run_within(&CancellationToken::new(), op).await
    }

    /// Runs `op` with retries; cancelling `parent` stops at the next safe point.
    ///
    /// ### Cancellation semantics
    /// - `parent` is checked before every attempt and raced against each attempt and sleep
    /// - every attempt receives a fresh child token
    /// - cancellation returns [`FlightError::Canceled`]
    pub async fn run_within<T, F, Fut>(
        &self,
        parent: &CancellationToken,
        mut op: F,
    ) -> Result<T, FlightError>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FlightError>>,
    {
        let deadline = self.attempt_timeout.map(|t| self.deadline(t));
        let mut attempt: u32 = 0;

        loop {
            if parent.is_cancelled() {
                return Err(FlightError::Canceled);
            }

            attempt += 1;
            self.publish(Event::new(EventKind::AttemptStarting).with_attempt(attempt));

            let res = match &deadline {
                Some(race) => race.run_within(parent, |ctx| op(ctx)).await,
                None => {
                    let child = parent.child_token();
                    select! {
                        biased;
                        r = op(child.clone()) => r,
                        _ = parent.cancelled() => {
                            child.cancel();
                            Err(FlightError::Canceled)
                        }
                    }
                }
            };

            let err = match res {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            self.publish(
                Event::new(EventKind::AttemptFailed)
                    .with_attempt(attempt)
                    .with_reason(err.to_string()),
            );

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt >= self.max_attempts {
                tracing::debug!(label = %self.label, attempts = attempt, error = %err, "retry exhausted");
                self.publish(
                    Event::new(EventKind::RetryExhausted)
                        .with_attempt(attempt)
                        .with_reason(err.to_string()),
                );
                return Err(FlightError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.backoff.delay_after(attempt);
            tracing::debug!(
                label = %self.label,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "retrying after backoff"
            );
            self.publish(
                Event::new(EventKind::BackoffScheduled)
                    .with_attempt(attempt)
                    .with_delay(delay)
                    .with_reason(err.to_string()),
            );

            let sleep = time::sleep(delay);
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = parent.cancelled() => return Err(FlightError::Canceled),
            }
        }
    }

    fn deadline(&self, timeout: Duration) -> DeadlineRace {
        let race = DeadlineRace::new(timeout);
        match &self.bus {
            Some(bus) => race.with_bus(bus.clone(), Arc::clone(&self.label)),
            None => race,
        }
    }

    /// Lifecycle events never wait on subscribers; see [`BroadcastBus::try_publish`].
    fn publish(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.try_publish(ev.with_key(Arc::clone(&self.label)));
        }
    }
}

impl Default for RetryPolicy {
    /// Three attempts, 1s base delay, no jitter, no per-attempt deadline.
    fn default() -> Self {
        let cfg = Config::default();
        Self::new(cfg.max_attempts, cfg.base_delay)
    }
}

/// Runs `op` with `max_attempts` and doubling delays from `base_delay`.
pub async fn retry<T, F, Fut>(max_attempts: u32, base_delay: Duration, op: F) -> Result<T, FlightError>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, FlightError>>,
{
    RetryPolicy::new(max_attempts, base_delay).run(op).await
}
