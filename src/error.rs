//! Error types for the transport pipeline.
//!
//! Every middleware either passes these through untouched or makes an explicit
//! decision about them (retry, short-circuit). The variants are split so callers
//! can tell a cancelled call from a tripped breaker from an exhausted retry loop.

use http::{HeaderMap, StatusCode};

/// A boxed error produced by an arbitrary transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for requests sent through the pipeline.
///
/// # Examples
///
/// ```
/// use tether::Error;
///
/// let err = Error::RetriesExhausted {
///     attempts: 3,
///     last_error: Box::new(Error::transport("connection refused")),
/// };
///
/// assert_eq!(err.to_string(), "all 3 attempts failed: Transport error: connection refused");
/// assert!(!err.is_cancellation());
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level error reported by `reqwest` (connection refused, DNS, TLS).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A transient failure reported by any other transport implementation.
    #[error("Transport error: {0}")]
    Transport(BoxError),

    /// The request context was cancelled by the caller.
    #[error("context canceled")]
    Cancelled,

    /// The request context deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The circuit breaker refused the call without contacting the transport.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Every allowed attempt failed.
    ///
    /// # Fields
    ///
    /// * `attempts` - The number of attempts made
    /// * `last_error` - The error returned by the final attempt
    #[error("all {attempts} attempts failed: {last_error}")]
    RetriesExhausted {
        /// The number of attempts made
        attempts: usize,
        /// The error returned by the final attempt
        last_error: Box<Error>,
    },

    /// Reading a request or response body failed.
    #[error("Body error: {0}")]
    Body(String),

    /// The server returned a non-2xx HTTP status code.
    ///
    /// Only produced by the typed [`Client`](crate::Client) helpers; the raw
    /// pipeline returns non-2xx statuses as normal responses.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// Failed to deserialize the response body into the expected type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Wraps an arbitrary transient transport failure.
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Error::Transport(err.into())
    }

    /// Returns `true` for cancellation and deadline errors.
    ///
    /// These are terminal: they are never retried.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Returns `true` if the circuit breaker short-circuited the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen)
    }

    /// Returns `true` if this error is potentially retryable.
    ///
    /// Network and transport failures and 429/5xx HTTP errors are retryable.
    /// Cancellation, an open circuit and local errors are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use tether::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::SERVICE_UNAVAILABLE,
    ///     raw_response: "down".to_string(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(err.is_retryable());
    /// assert!(!Error::Cancelled.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::Transport(_) => true,
            Error::HttpError { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Error::Cancelled
            | Error::DeadlineExceeded
            | Error::CircuitOpen
            | Error::RetriesExhausted { .. }
            | Error::Body(_)
            | Error::DeserializationFailed { .. }
            | Error::SerializationFailed(_)
            | Error::ConfigurationError(_)
            | Error::InvalidUrl(_) => false,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// A short, stable label for the error kind, used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Network(_) => "network",
            Error::Transport(_) => "transport",
            Error::Cancelled => "cancelled",
            Error::DeadlineExceeded => "deadline_exceeded",
            Error::CircuitOpen => "circuit_open",
            Error::RetriesExhausted { .. } => "retries_exhausted",
            Error::Body(_) => "body",
            Error::HttpError { .. } => "http",
            Error::DeserializationFailed { .. } => "deserialization",
            Error::SerializationFailed(_) => "serialization",
            Error::ConfigurationError(_) => "configuration",
            Error::InvalidUrl(_) => "invalid_url",
        }
    }
}

/// A specialized `Result` type for pipeline calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_message() {
        assert_eq!(Error::CircuitOpen.to_string(), "circuit breaker is open");
        assert!(Error::CircuitOpen.is_circuit_open());
        assert!(!Error::transport("boom").is_circuit_open());
    }

    #[test]
    fn test_cancellation_kinds() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::DeadlineExceeded.is_cancellation());
        assert!(!Error::transport("boom").is_cancellation());
    }

    #[test]
    fn test_http_error_retryable() {
        let too_many = Error::HttpError {
            status: StatusCode::TOO_MANY_REQUESTS,
            raw_response: String::new(),
            headers: HeaderMap::new(),
        };
        let bad_request = Error::HttpError {
            status: StatusCode::BAD_REQUEST,
            raw_response: String::new(),
            headers: HeaderMap::new(),
        };
        assert!(too_many.is_retryable());
        assert!(!bad_request.is_retryable());
    }
}
