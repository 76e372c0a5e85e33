use std::time::Duration;
use thiserror::Error;

/// Crate-wide error type, categorized for the retry/circuit-breaker framework in
/// [`crate::resilience`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("network timeout after {timeout:?}: {message}")]
    NetworkTimeout { timeout: Duration, message: String },

    #[error("connection refused: {endpoint}")]
    ConnectionRefused { endpoint: String },

    #[error("dns resolution failed: {hostname}")]
    DnsFailure { hostname: String },

    #[error("rate limit exceeded: retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    #[error("invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("service temporarily unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    #[error("internal server error: {0}")]
    InternalServerError(String),

    #[error("service overloaded: {service}")]
    ServiceOverloaded { service: String },

    #[error("circuit breaker open for source: {service}")]
    CircuitBreakerOpen { service: String },

    #[error("circuit breaker half-open, limited calls allowed")]
    CircuitBreakerHalfOpen,

    #[error("resource exhausted: {resource} - {current}/{limit}")]
    ResourceExhausted {
        resource: String,
        current: u64,
        limit: u64,
    },

    #[error("operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("cache error: {operation} failed - {reason}")]
    Cache { operation: String, reason: String },

    #[error("parse error in {context}: {message}")]
    Parse { context: String, message: String },

    #[error("source error ({source_name}): {reason}")]
    Source { source_name: String, reason: String },

    #[error("pdf validation failed: {reason}")]
    PdfValidation { reason: String },

    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Retry-policy classification for an [`Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Should not be retried; caller made a mistake or data is malformed.
    Permanent,
    /// Safe to retry with exponential backoff.
    Transient,
    /// Retry, but honor the server's requested delay.
    RateLimited,
    /// A circuit breaker has tripped; stop calling the source for now.
    CircuitBreaker,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_)
            | Error::InvalidInput { .. }
            | Error::Parse { .. }
            | Error::Serde(_)
            | Error::PdfValidation { .. }
            | Error::Invariant(_) => ErrorCategory::Permanent,

            Error::RateLimitExceeded { .. } => ErrorCategory::RateLimited,

            Error::CircuitBreakerOpen { .. } | Error::CircuitBreakerHalfOpen => {
                ErrorCategory::CircuitBreaker
            }

            Error::Http(_)
            | Error::NetworkTimeout { .. }
            | Error::ConnectionRefused { .. }
            | Error::DnsFailure { .. }
            | Error::ServiceUnavailable { .. }
            | Error::InternalServerError(_)
            | Error::ServiceOverloaded { .. }
            | Error::ResourceExhausted { .. }
            | Error::Timeout { .. }
            | Error::Store(_)
            | Error::Cache { .. }
            | Error::Io(_) => ErrorCategory::Transient,

            Error::Source { .. } => ErrorCategory::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::RateLimited
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn should_trigger_circuit_breaker(&self) -> bool {
        matches!(
            self,
            Error::ServiceUnavailable { .. }
                | Error::InternalServerError(_)
                | Error::ServiceOverloaded { .. }
                | Error::NetworkTimeout { .. }
                | Error::ConnectionRefused { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
