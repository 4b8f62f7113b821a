//! Events: data model and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** that distributes events
//! to any number of independent subscribers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification, opaque payload and metadata
//! - [`BroadcastBus`], [`Subscription`] publish/subscribe with per-subscriber queues
//! - [`OverflowPolicy`] backpressure of a full subscriber queue
//! - `LogWriter` (feature `logging`) writes events through `tracing`
//!
//! ## Quick reference
//! - **Publishers**: callers, plus `RetryPolicy` / `DeadlineRace` when given a bus.
//! - **Consumers**: anything holding a [`Subscription`].

mod bus;
mod event;
#[cfg(feature = "logging")]
mod log;
mod queue;

pub use bus::{BroadcastBus, Subscription, SubscriptionId};
pub use event::{Event, EventKind, Payload};
#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use queue::OverflowPolicy;
