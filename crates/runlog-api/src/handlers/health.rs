//! Liveness and limiter status handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use runlog_core::PingResponse;

use crate::{ApiError, AppState};

/// Round-trip to the store and report its clock.
///
/// # Returns
/// - 200 OK with `{ ok, message: "pong", db_time }`
/// - 500 if no store is configured or the store query fails
pub async fn ping(State(state): State<AppState>) -> Result<Json<PingResponse>, ApiError> {
    let db_time = state.store()?.ping().await?;
    Ok(Json(PingResponse {
        ok: true,
        message: "pong".to_string(),
        db_time,
    }))
}

/// Current limiter settings.
#[derive(Debug, Serialize)]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub window_secs: u64,
    pub max: u32,
}

pub async fn rate_limit_status(State(state): State<AppState>) -> Json<RateLimitStatus> {
    let config = state.limiter.config();
    Json(RateLimitStatus {
        enabled: config.enabled,
        window_secs: config.window.as_secs(),
        max: config.max,
    })
}
