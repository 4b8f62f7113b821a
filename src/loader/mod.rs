//! Loading values from slow sources.
//!
//! ## Contents
//! - [`Fetch`] the source trait, [`FetchFn`] its closure-backed implementation
//! - [`SingleFlight`] deduplication of concurrent loads per key
//! - [`CachedLoader`] read-through composition of cache, single-flight, retry and deadline

mod cached;
mod fetch;
mod single_flight;

pub use cached::CachedLoader;
pub use fetch::{Fetch, FetchFn};
pub use single_flight::SingleFlight;
