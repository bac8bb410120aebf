//! Client-side error taxonomy.

use thiserror::Error;

/// Failure of a single API call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The request never produced an HTTP response.
    #[error("Network error: {0}")]
    Network(String),

    /// The server (or local pre-check) rejected the input.
    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    /// Admission denied; wait `retry_after_secs` before retrying.
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// A response arrived but its body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<runlog_core::Error> for ClientError {
    fn from(err: runlog_core::Error) -> Self {
        match err {
            runlog_core::Error::InvalidInput(msg) => ClientError::Validation(msg),
            runlog_core::Error::NotFound(_) => ClientError::NotFound,
            runlog_core::Error::RateLimited { retry_after_secs } => {
                ClientError::RateLimited { retry_after_secs }
            }
            other => ClientError::Server {
                status: 500,
                message: other.to_string(),
            },
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
