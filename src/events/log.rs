//! # LogWriter: bus events to `tracing`
//!
//! A minimal consumer that drains one [`Subscription`] and writes every event as a
//! structured `tracing` record. Useful for demos and debugging; install a
//! `tracing-subscriber` to see the output.
//!
//! ## Example output
//! ```text
//! INFO flightline: attempt starting key="quote" attempt=1
//! WARN flightline: attempt failed key="quote" attempt=1 reason="service unavailable"
//! INFO flightline: backoff scheduled key="quote" delay_ms=1000 after_attempt=1
//! WARN flightline: deadline hit key="quote" timeout_ms=250
//! INFO flightline: event kind="price-tick" seq=42
//! ```

use tokio::task::JoinHandle;

use super::bus::{BroadcastBus, Subscription};
use super::event::{Event, EventKind};

/// Event writer backed by `tracing`.
#[derive(Default, Debug, Clone, Copy)]
pub struct LogWriter {
    skip_custom: bool,
}

impl LogWriter {
    /// Construct a new [`LogWriter`] that logs every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only log toolkit lifecycle events.
    #[must_use]
    pub fn lifecycle_only(mut self) -> Self {
        self.skip_custom = true;
        self
    }

    /// Subscribes to `bus` and logs until the subscription closes.
    pub fn spawn(self, bus: &BroadcastBus) -> JoinHandle<u64> {
        let sub = bus.subscribe();
        tokio::spawn(async move { self.run(sub).await })
    }

    /// Drains `sub`, returning how many events were written.
    pub async fn run(self, mut sub: Subscription) -> u64 {
        let mut written = 0;
        while let Some(ev) = sub.recv().await {
            if self.write(&ev) {
                written += 1;
            }
        }
        written
    }

    /// Writes one event; returns `false` if it was filtered out.
    pub fn write(&self, e: &Event) -> bool {
        let key = e.key.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::AttemptStarting => {
                tracing::info!(key, attempt = e.attempt, "attempt starting");
            }
            EventKind::AttemptFailed => {
                tracing::warn!(key, attempt = e.attempt, reason = e.reason.as_deref(), "attempt failed");
            }
            EventKind::BackoffScheduled => {
                tracing::info!(
                    key,
                    delay_ms = e.delay_ms,
                    after_attempt = e.attempt,
                    reason = e.reason.as_deref(),
                    "backoff scheduled"
                );
            }
            EventKind::RetryExhausted => {
                tracing::error!(key, attempts = e.attempt, reason = e.reason.as_deref(), "retry exhausted");
            }
            EventKind::TimeoutHit => {
                tracing::warn!(key, timeout_ms = e.timeout_ms, "deadline hit");
            }
            EventKind::Custom(kind) => {
                if self.skip_custom {
                    return false;
                }
                tracing::info!(kind, seq = e.seq, key = e.key.as_deref(), "event");
            }
        }
        true
    }
}
