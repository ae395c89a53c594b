//! Client error types.
//!
//! Every failure surfaced by the client carries one [`ErrorKind`] tag. The
//! retry policy and the circuit breaker both decide through
//! [`Error::is_transient`], so they always agree on what a transient failure is.

use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy shared by every layer of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The server could not be reached.
    Connection,
    /// The server answered 5xx or 429.
    TransientServer,
    /// The server rejected the request (4xx other than 429).
    ClientRequest,
    /// A configured deadline elapsed on one attempt.
    Timeout,
    /// The circuit breaker rejected the call without touching the network.
    CircuitOpen,
    /// A payload could not be decoded.
    Decode,
    /// The caller cancelled the operation.
    Cancelled,
    /// The response stream broke or ended before completing.
    Stream,
    /// Invalid configuration or request construction.
    Config,
}

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not establish a connection to the server.
    #[error("{operation}: cannot connect to server (is it running?): {message}")]
    Connection {
        /// Operation that failed (e.g. `GET /session`).
        operation: String,
        /// Underlying transport error.
        message: String,
    },

    /// Server returned 5xx or 429.
    #[error("{operation}: server error ({status}): {message}")]
    Server {
        /// Operation that failed.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Error message from the server.
        message: String,
    },

    /// Server rejected the request with a 4xx status other than 429.
    #[error("{operation}: request rejected ({status}): {message}")]
    Request {
        /// Operation that failed.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Error message from the server.
        message: String,
    },

    /// An attempt exceeded its deadline.
    #[error("{operation}: timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Operation that failed.
        operation: String,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// The circuit breaker is open; no request was sent.
    #[error("{operation}: circuit open, retry in {}ms", .retry_in.as_millis())]
    CircuitOpen {
        /// Operation that was rejected.
        operation: String,
        /// Time until the breaker admits a probe.
        retry_in: Duration,
    },

    /// Response payload could not be decoded.
    #[error("{operation}: failed to decode response: {message}")]
    Decode {
        /// Operation that failed.
        operation: String,
        /// Decoder error.
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("{operation}: cancelled")]
    Cancelled {
        /// Operation that was cancelled.
        operation: String,
    },

    /// The response stream failed after data had started flowing.
    #[error("{operation}: stream error: {message}")]
    Stream {
        /// Operation that failed.
        operation: String,
        /// What went wrong.
        message: String,
    },

    /// All retry attempts failed.
    #[error("{source} (after {attempts} attempts)")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        source: Box<Error>,
    },

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The taxonomy tag of this error.
    ///
    /// [`Error::Exhausted`] reports the kind of its final attempt.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection { .. } => ErrorKind::Connection,
            Error::Server { .. } => ErrorKind::TransientServer,
            Error::Request { .. } => ErrorKind::ClientRequest,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::Decode { .. } => ErrorKind::Decode,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Stream { .. } => ErrorKind::Stream,
            Error::Exhausted { source, .. } => source.kind(),
            Error::InvalidUrl(_) | Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether this failure is expected to be temporary.
    ///
    /// This is the only predicate the retry policy and the circuit breaker
    /// consult.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection | ErrorKind::TransientServer | ErrorKind::Timeout
        )
    }

    /// HTTP status code, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Server { status, .. } | Error::Request { status, .. } => Some(*status),
            Error::Exhausted { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Number of attempts made before this error surfaced.
    pub fn attempts(&self) -> u32 {
        match self {
            Error::Exhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Check if this is a rate limit error.
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(status) if status >= 500)
    }

    /// Check if the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// Check if the circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        self.kind() == ErrorKind::CircuitOpen
    }

    /// Check if an attempt deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Map a reqwest error from one attempt onto the taxonomy.
    pub(crate) fn from_reqwest(operation: &str, err: reqwest::Error, deadline: Duration) -> Self {
        if err.is_timeout() {
            Error::Timeout {
                operation: operation.to_string(),
                after: deadline,
            }
        } else if err.is_builder() {
            Error::Config(format!("{operation}: {err}"))
        } else if err.is_decode() {
            Error::Decode {
                operation: operation.to_string(),
                message: err.to_string(),
            }
        } else {
            Error::Connection {
                operation: operation.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Build the error for a non-success HTTP status.
    pub(crate) fn from_status(operation: &str, status: u16, message: String) -> Self {
        if status == 429 || status >= 500 {
            Error::Server {
                operation: operation.to_string(),
                status,
                message,
            }
        } else {
            Error::Request {
                operation: operation.to_string(),
                status,
                message,
            }
        }
    }

    pub(crate) fn cancelled(operation: &str) -> Self {
        Error::Cancelled {
            operation: operation.to_string(),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error body shapes returned by the server.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum ErrorResponse {
    /// `{"name": "...", "data": {"message": "..."}}`
    Named { name: String, data: ErrorData },
    /// `{"message": "..."}`
    Plain { message: String },
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ErrorData {
    #[serde(default)]
    pub message: Option<String>,
}

/// Longest raw body echoed back in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Extract a human-readable message from an error response body.
pub(crate) fn error_message(status: u16, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse::Named { name, data }) => match data.message {
            Some(message) => format!("{name}: {message}"),
            None => name,
        },
        Ok(ErrorResponse::Plain { message }) => message,
        Err(_) if body.trim().is_empty() => format!("HTTP {status}"),
        Err(_) => {
            let mut end = body.len().min(MAX_ERROR_BODY);
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body[..end].trim().to_string()
        }
    }
}
