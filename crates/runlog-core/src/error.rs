//! Error types for runlog.

use thiserror::Error;

/// Result type alias using runlog's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for runlog operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input (bad id, bad note, bad pagination)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Admission denied by the rate limiter
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Store is not configured for this process
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure was caused by the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::InvalidInput(_) | Error::RateLimited { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
