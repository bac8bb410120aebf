//! HTTP error mapping.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use runlog_core::ErrorResponse;

/// Client-facing text for store failures; the detail goes to the log only.
pub const STORE_FAILURE_MESSAGE: &str = "internal server error";

/// Error returned by handlers and middleware.
///
/// Every variant renders as `{ "ok": false, "error": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Client sent an invalid id, note, body, or query parameter.
    #[error("{0}")]
    BadRequest(String),

    /// Request body exceeded the configured size cap.
    #[error("request body too large")]
    PayloadTooLarge,

    /// The identified run does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Admission denied; the caller should wait before retrying.
    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },

    /// The store failed or is not configured.
    #[error(transparent)]
    Store(runlog_core::Error),
}

impl From<runlog_core::Error> for ApiError {
    fn from(err: runlog_core::Error) -> Self {
        match err {
            runlog_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            runlog_core::Error::NotFound(_) => ApiError::NotFound("not found".to_string()),
            runlog_core::Error::RateLimited { retry_after_secs } => {
                ApiError::RateLimited { retry_after_secs }
            }
            other => ApiError::Store(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::RateLimited { retry_after_secs } => ErrorResponse {
                ok: false,
                error: "rate limited".to_string(),
                retry_after: Some(*retry_after_secs),
            },
            ApiError::Store(err) => {
                error!(subsystem = "api", error = %err, "Store failure");
                match err {
                    runlog_core::Error::Unavailable(msg) => ErrorResponse::new(msg.clone()),
                    _ => ErrorResponse::new(STORE_FAILURE_MESSAGE),
                }
            }
            other => ErrorResponse::new(other.to_string()),
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs),
            );
        }
        response
    }
}
