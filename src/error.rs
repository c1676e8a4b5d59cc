//! Error types for the fetch pipeline.
//!
//! Every layer (policies, client, aggregator, cache, handler) returns the same [`Error`], so a
//! failure crosses layer boundaries by value. `Error` is `Clone` because the cache-aside layer
//! hands one compute failure to every caller waiting on it.
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds surfaced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The request never produced an HTTP response (connect, DNS, reset, body read).
    #[error("network error: {0}")]
    Network(String),
    /// A single attempt exceeded the per-attempt timeout.
    #[error("attempt timed out after {elapsed:?} (limit: {timeout:?})")]
    Timeout { elapsed: Duration, timeout: Duration },
    /// The token bucket had no budget for this call.
    #[error("rate limit exceeded; next token in {wait:?}")]
    RateLimited { wait: Duration },
    /// Both the execution slots and the wait queue were full.
    #[error("bulkhead rejected request ({occupied} occupied, capacity {capacity})")]
    BulkheadRejected { occupied: usize, capacity: usize },
    /// The circuit breaker is open and failing fast.
    #[error("circuit breaker open ({failure_count} failures, open for {open_duration:?})")]
    CircuitOpen { failure_count: usize, open_duration: Duration },
    /// Every retry attempt failed with a transient failure.
    #[error("retries exhausted after {attempts} attempts; last failure: {last}")]
    TransientUpstream { attempts: usize, last: String },
    /// The upstream answered with a status outside 2xx.
    #[error("upstream responded with status {code}")]
    NonSuccessStatus { code: u16 },
    /// The payload could not be decoded into the expected shape.
    #[error("malformed response payload: {0}")]
    MalformedResponse(String),
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
    /// The incoming query was rejected before any work started.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Settings or policy parameters are invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Build a configuration error from anything printable.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// True for failures caused by the caller's input rather than by the pipeline.
    ///
    /// A presentation layer maps these to a client error and everything else to a server error.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen { .. })
    }

    pub fn is_bulkhead(&self) -> bool {
        matches!(self, Error::BulkheadRejected { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Error::TransientUpstream { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The HTTP status carried by a `NonSuccessStatus` failure.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::NonSuccessStatus { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_includes_durations() {
        let err =
            Error::Timeout { elapsed: Duration::from_millis(5100), timeout: Duration::from_secs(5) };
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("5.1"));
    }

    #[test]
    fn bulkhead_display_includes_capacity() {
        let err = Error::BulkheadRejected { occupied: 30, capacity: 30 };
        let msg = err.to_string();
        assert!(msg.contains("bulkhead"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn retry_exhausted_display_includes_last_failure() {
        let err = Error::TransientUpstream { attempts: 4, last: "status 503".into() };
        let msg = err.to_string();
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("status 503"));
    }

    #[test]
    fn only_validation_is_a_client_error() {
        assert!(Error::Validation("count".into()).is_client_error());
        assert!(!Error::NonSuccessStatus { code: 404 }.is_client_error());
        assert!(!Error::Cancelled.is_client_error());
        assert!(!Error::Network("reset".into()).is_client_error());
    }

    #[test]
    fn predicates_cover_policy_variants() {
        let timeout =
            Error::Timeout { elapsed: Duration::from_secs(1), timeout: Duration::from_secs(1) };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_circuit_open());

        let open =
            Error::CircuitOpen { failure_count: 5, open_duration: Duration::from_secs(1) };
        assert!(open.is_circuit_open());

        assert!(Error::BulkheadRejected { occupied: 1, capacity: 1 }.is_bulkhead());
        assert!(Error::RateLimited { wait: Duration::from_millis(200) }.is_rate_limited());
        assert!(Error::TransientUpstream { attempts: 2, last: String::new() }.is_retry_exhausted());
        assert!(Error::Cancelled.is_cancelled());
    }

    #[test]
    fn status_code_only_for_non_success() {
        assert_eq!(Error::NonSuccessStatus { code: 404 }.status_code(), Some(404));
        assert_eq!(Error::Cancelled.status_code(), None);
    }
}
