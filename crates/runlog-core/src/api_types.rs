//! Wire types shared by the HTTP server and its clients.
//!
//! Success bodies carry `"ok": true`; every failure body is an
//! [`ErrorResponse`] with `"ok": false`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Run;

/// Request body for `POST /runs` and `PATCH /runs/:id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteBody {
    #[serde(default)]
    pub note: Option<String>,
}

impl NoteBody {
    pub fn new(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
        }
    }
}

/// Response for `GET /runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsResponse {
    pub ok: bool,
    pub runs: Vec<Run>,
}

/// Response carrying a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub ok: bool,
    pub run: Run,
}

/// Response for `GET /ping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub ok: bool,
    pub message: String,
    pub db_time: DateTime<Utc>,
}

/// Failure body for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
    /// Seconds to wait before retrying; present on 429 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
            retry_after: None,
        }
    }
}
