//! Error types for admission control
use std::fmt;
use std::time::Duration;

/// Rejected limiter configuration.
///
/// Raised at construction time only; the request path never sees these.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Bucket capacity must be finite and > 0.
    #[error("capacity must be finite and > 0 (got {0})")]
    InvalidCapacity(f64),
    /// Refill rate must be finite and >= 0.
    #[error("refill_rate must be finite and >= 0 (got {0})")]
    InvalidRefillRate(f64),
    /// Store deadline must be non-zero.
    #[error("deadline must be > 0 (got {0:?})")]
    InvalidDeadline(Duration),
    /// Idle expiry must be at least one second; stores expire keys with second granularity.
    #[error("idle_ttl must be at least 1s (got {0:?})")]
    InvalidIdleTtl(Duration),
    /// Key prefix must be non-empty and free of control characters.
    #[error("invalid key prefix {0:?}")]
    InvalidKeyPrefix(String),
}

/// Failures talking to the shared bucket store.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store could not be reached or the atomic operation failed.
    #[error("bucket store unavailable: {0}")]
    Unavailable(String),
    /// The store did not answer within the request deadline.
    #[error("bucket store did not answer within {0:?}")]
    Timeout(Duration),
    /// The store answered with something other than `[allowed, remaining]`.
    #[error("malformed bucket store reply: {0}")]
    MalformedReply(String),
}

impl StoreError {
    /// Check if this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Error returned by [`AdmissionService`](crate::rate_limit::AdmissionService).
#[derive(Debug, Clone)]
pub enum AdmissionError<E> {
    /// The caller's bucket is empty; surface as HTTP 429.
    Rejected {
        /// Configured bucket capacity, for the limit header.
        limit: f64,
    },
    /// The wrapped service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { limit } => write!(f, "too many requests (limit {})", limit),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Rejected { .. } => None,
        }
    }
}

impl<E> AdmissionError<E> {
    /// HTTP status equivalent for transports that want one.
    pub const TOO_MANY_REQUESTS: u16 = 429;

    /// Check if the request was refused by the limiter.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Status code a transport should answer with, if the limiter refused the request.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Rejected { .. } => Some(Self::TOO_MANY_REQUESTS),
            Self::Inner(_) => None,
        }
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Rejected { .. } => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Rejected { .. } => None,
        }
    }
}
