//! Error types used by the flightline primitives.
//!
//! This module defines two enums:
//!
//! - [`FlightError`]: outcome of a failed operation run through the toolkit
//!   (deadline, retry, single-flight, batch, fetch).
//! - [`ConfigError`]: rejected configuration values.
//!
//! [`FlightError`] is `Clone` because one outcome is frequently fanned out to
//! many callers (every waiter of a single-flight load receives the same error).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by coordinated operations.
///
/// Callers are expected to treat [`FlightError::Timeout`], [`FlightError::RetryExhausted`]
/// and operation errors as distinct outcomes: a timeout may be retried by an outer policy,
/// an exhausted retry should not be retried again.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlightError {
    /// Operation did not complete before its deadline.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// Every permitted attempt failed; carries the last observed failure only.
    #[error("retry exhausted after {attempts} attempt(s): {last}")]
    RetryExhausted {
        /// Number of attempts performed.
        attempts: u32,
        /// Error of the final attempt.
        last: Box<FlightError>,
    },

    /// The caller-supplied operation failed.
    #[error("operation failed: {error}")]
    OperationFailed {
        /// The underlying error message.
        error: String,
    },

    /// The external service behind an operation is unavailable.
    #[error("service unavailable")]
    ServiceUnavailable,

    /// Non-recoverable failure (never retried).
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Operation was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Canceled,
}

impl FlightError {
    /// Shorthand for [`FlightError::OperationFailed`].
    ///
    /// # Example
    /// ```
    /// use flightline::FlightError;
    ///
    /// let err = FlightError::failed("connection reset");
    /// assert_eq!(err.to_string(), "operation failed: connection reset");
    /// ```
    pub fn failed(error: impl Into<String>) -> Self {
        FlightError::OperationFailed {
            error: error.into(),
        }
    }

    /// Shorthand for [`FlightError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        FlightError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use flightline::FlightError;
    /// use std::time::Duration;
    ///
    /// let err = FlightError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            FlightError::Timeout { .. } => "timeout",
            FlightError::RetryExhausted { .. } => "retry_exhausted",
            FlightError::OperationFailed { .. } => "operation_failed",
            FlightError::ServiceUnavailable => "service_unavailable",
            FlightError::Fatal { .. } => "fatal",
            FlightError::Canceled => "canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            FlightError::Timeout { timeout } => format!("timeout: {timeout:?}"),
            FlightError::RetryExhausted { attempts, last } => {
                format!("exhausted after {attempts} attempts; last: {}", last.as_message())
            }
            FlightError::OperationFailed { error } => format!("error: {error}"),
            FlightError::ServiceUnavailable => "service unavailable".to_string(),
            FlightError::Fatal { error } => format!("fatal: {error}"),
            FlightError::Canceled => "cancelled".to_string(),
        }
    }

    /// Indicates whether another attempt may succeed.
    ///
    /// Returns `true` for [`FlightError::Timeout`], [`FlightError::OperationFailed`]
    /// and [`FlightError::ServiceUnavailable`]. Exhausted retries, fatal errors and
    /// cancellation are final.
    ///
    /// # Example
    /// ```
    /// use flightline::FlightError;
    ///
    /// assert!(FlightError::ServiceUnavailable.is_retryable());
    /// assert!(!FlightError::fatal("bad key").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlightError::Timeout { .. }
                | FlightError::OperationFailed { .. }
                | FlightError::ServiceUnavailable
        )
    }

    /// True for [`FlightError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, FlightError::Timeout { .. })
    }

    /// Converts a caught panic payload into [`FlightError::OperationFailed`].
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        FlightError::failed(format!("panicked: {msg}"))
    }
}

/// # Rejected configuration values.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The cache must be able to hold at least one entry.
    #[error("cache max_entries must be at least 1")]
    ZeroCapacity,

    /// A retry policy needs at least one attempt.
    #[error("retry max_attempts must be at least 1")]
    ZeroAttempts,

    /// Bounded bus overflow policies need room for at least one event.
    #[error("bounded bus queue capacity must be at least 1")]
    ZeroQueueCapacity,
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::ZeroCapacity => "config_zero_capacity",
            ConfigError::ZeroAttempts => "config_zero_attempts",
            ConfigError::ZeroQueueCapacity => "config_zero_queue_capacity",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_keeps_only_last_error() {
        let err = FlightError::RetryExhausted {
            attempts: 3,
            last: Box::new(FlightError::ServiceUnavailable),
        };
        assert_eq!(err.as_label(), "retry_exhausted");
        assert_eq!(
            err.to_string(),
            "retry exhausted after 3 attempt(s): service unavailable"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeout_is_distinct_from_failure() {
        let timeout = FlightError::Timeout {
            timeout: Duration::from_millis(250),
        };
        let failed = FlightError::failed("boom");
        assert!(timeout.is_timeout());
        assert!(!failed.is_timeout());
        assert_ne!(timeout.as_label(), failed.as_label());
        assert!(timeout.is_retryable() && failed.is_retryable());
    }

    #[test]
    fn canceled_and_fatal_are_final() {
        assert!(!FlightError::Canceled.is_retryable());
        assert!(!FlightError::fatal("nope").is_retryable());
    }
}
