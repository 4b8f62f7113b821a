//! Execution combinators: deadline, retry, batch.
//!
//! - `deadline`: races one operation against a timer and cancels the loser;
//! - `retry`: repeats a fallible operation with exponential backoff;
//! - `batch`: ordered fan-out of items to concurrent units.
//!
//! All three take operations as `FnOnce`/`FnMut`/`Fn(.., CancellationToken) -> Future`
//! so they compose: a retry may run each attempt under a deadline, a batch item may run
//! a retry.

mod batch;
mod deadline;
mod retry;

pub use batch::BatchCoordinator;
pub use deadline::{DeadlineRace, with_deadline};
pub use retry::{RetryPolicy, retry};
