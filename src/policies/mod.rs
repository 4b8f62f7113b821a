//! Backoff and jitter policies.
//!
//! This module groups the knobs that control **how long** a retry waits between attempts.
//!
//! ## Contents
//! - [`BackoffPolicy`] how delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  optional randomization of each delay
//!
//! ## Quick wiring
//! ```text
//! RetryPolicy { max_attempts, backoff: BackoffPolicy, attempt_timeout }
//!      └─► core::retry uses backoff.delay_after(attempt) between attempts
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=1s, factor=2.0, uncapped, jitter=None.
//! - `JitterPolicy::None`; jitter is never enabled implicitly.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
