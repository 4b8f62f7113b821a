//! # Events distributed by the broadcast bus.
//!
//! An [`Event`] is immutable once built: the bus wraps it in an `Arc` and shares the same
//! instance with every subscriber queue.
//!
//! The [`EventKind`] enum has two groups:
//! - **Application events**: [`EventKind::Custom`], published by callers with an opaque payload
//! - **Lifecycle events**: emitted by retry and deadline primitives when wired to a bus
//!
//! ## Identity
//! Each event gets a process-wide unique, monotonically increasing `seq` at construction.
//! Delivery order is the bus publish order, which all subscribers observe identically.
//!
//! ## Example
//! ```rust
//! use flightline::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::Custom("price-tick"))
//!     .with_key("BTC-USD")
//!     .with_payload(42_000u64);
//!
//! assert_eq!(ev.kind, EventKind::Custom("price-tick"));
//! assert_eq!(ev.key.as_deref(), Some("BTC-USD"));
//! assert_eq!(ev.payload_ref::<u64>(), Some(&42_000));
//! ```

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter used as event identity.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Opaque payload carried by an [`Event`]; never interpreted by the bus.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Classification of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Application-defined event; the label is chosen by the publisher.
    Custom(&'static str),

    // === Retry lifecycle ===
    /// An attempt is starting.
    ///
    /// Sets: `key` (operation label), `attempt`.
    AttemptStarting,

    /// An attempt failed.
    ///
    /// Sets: `key`, `attempt`, `reason`.
    AttemptFailed,

    /// Next attempt scheduled after a failure.
    ///
    /// Sets: `key`, `attempt` (the failed one), `delay_ms`, `reason`.
    BackoffScheduled,

    /// Attempt budget spent; the last error is surfaced.
    ///
    /// Sets: `key`, `attempt` (total attempts), `reason`.
    RetryExhausted,

    // === Deadline ===
    /// An operation lost the race against its deadline.
    ///
    /// Sets: `key`, `timeout_ms`.
    TimeoutHit,
}

impl EventKind {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::Custom(label) => *label,
            EventKind::AttemptStarting => "attempt_starting",
            EventKind::AttemptFailed => "attempt_failed",
            EventKind::BackoffScheduled => "backoff_scheduled",
            EventKind::RetryExhausted => "retry_exhausted",
            EventKind::TimeoutHit => "timeout_hit",
        }
    }
}

/// Event with opaque payload and optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing identifier.
    pub seq: u64,
    /// Wall-clock creation timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Opaque payload.
    pub payload: Option<Payload>,

    /// Key or operation label the event refers to.
    pub key: Option<Arc<str>>,
    /// Attempt number (starting from 1).
    pub attempt: Option<u32>,
    /// Backoff delay in milliseconds.
    pub delay_ms: Option<u64>,
    /// Deadline in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Human-readable reason (error message).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event of the given kind with the current timestamp and next sequence number.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            payload: None,
            key: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            reason: None,
        }
    }

    /// Shorthand for an application event carrying `payload`.
    #[must_use]
    pub fn custom<T: Any + Send + Sync>(label: &'static str, payload: T) -> Self {
        Event::new(EventKind::Custom(label)).with_payload(payload)
    }

    /// Attaches an opaque payload.
    #[inline]
    #[must_use]
    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    /// Attaches an already shared payload.
    #[inline]
    #[must_use]
    pub fn with_shared_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attaches a key or operation label.
    #[inline]
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Attaches an attempt number.
    #[inline]
    #[must_use]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    #[must_use]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Attaches a deadline (stored as milliseconds).
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Borrows the payload as `T`, if present and of that type.
    pub fn payload_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    /// True for events emitted by the toolkit itself rather than by callers.
    #[inline]
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self.kind, EventKind::Custom(_))
    }
}
