//! # Fetch abstraction and closure-backed implementation.
//!
//! [`Fetch`] is the seam to the slow external source behind a cache miss (an HTTP
//! API, a database, ...). [`FetchFn`] adapts a closure
//! `Fn(K, CancellationToken) -> Fut`, producing a fresh future per call.
//!
//! A fetch receives a [`CancellationToken`] and should stop promptly once it fires:
//! the token is cancelled when a deadline expires or the caller gives up.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::FlightError;

/// # Asynchronous, cancelable source of values.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use flightline::{Fetch, FlightError};
///
/// struct Quotes;
///
/// #[async_trait]
/// impl Fetch for Quotes {
///     type Key = String;
///     type Value = f64;
///
///     fn name(&self) -> &str { "quotes" }
///
///     async fn fetch(&self, key: String, ctx: CancellationToken) -> Result<f64, FlightError> {
///         if ctx.is_cancelled() {
///             return Err(FlightError::Canceled);
///         }
///         Ok(key.len() as f64)
///     }
/// }
/// ```
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    /// Lookup key.
    type Key: Send + 'static;
    /// Fetched value.
    type Value: Send + 'static;

    /// Returns a stable, human-readable source name.
    fn name(&self) -> &str;

    /// Fetches the value for `key`.
    async fn fetch(&self, key: Self::Key, ctx: CancellationToken) -> Result<Self::Value, FlightError>;
}

/// Closure-backed [`Fetch`].
pub struct FetchFn<K, V, F> {
    name: Cow<'static, str>,
    f: F,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V, F, Fut> FetchFn<K, V, F>
where
    F: Fn(K, CancellationToken) -> Fut,
    Fut: Future<Output = Result<V, FlightError>>,
{
    /// Wraps `f` under `name`.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _marker: PhantomData,
        }
    }

    /// Wraps `f` and returns it as a shared handle.
    ///
    /// ```
    /// use tokio_util::sync::CancellationToken;
    /// use flightline::{Fetch, FetchFn, FlightError};
    ///
    /// let src = FetchFn::arc("upper", |key: String, _ctx: CancellationToken| async move {
    ///     Ok::<_, FlightError>(key.to_uppercase())
    /// });
    /// assert_eq!(src.name(), "upper");
    /// ```
    #[must_use]
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<K, V, F> fmt::Debug for FetchFn<K, V, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchFn").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<K, V, F, Fut> Fetch for FetchFn<K, V, F>
where
    K: Send + 'static,
    V: Send + 'static,
    F: Fn(K, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, FlightError>> + Send + 'static,
{
    type Key = K;
    type Value = V;

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, key: K, ctx: CancellationToken) -> Result<V, FlightError> {
        (self.f)(key, ctx).await
    }
}

#[async_trait]
impl<S: Fetch> Fetch for Arc<S> {
    type Key = S::Key;
    type Value = S::Value;

    fn name(&self) -> &str {
        self.as_ref().name()
    }

    async fn fetch(&self, key: S::Key, ctx: CancellationToken) -> Result<S::Value, FlightError> {
        self.as_ref().fetch(key, ctx).await
    }
}
