//! Run HTTP handlers.
//!
//! Identifiers, notes, and pagination parameters are validated before the
//! store is touched, so a malformed request never costs a query.

use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::QueryRejection, FromRequest, Path, Query, Request, State},
    http::{header, StatusCode},
    Form, Json,
};
use serde::Deserialize;
use tracing::{debug, info};

use runlog_core::{validate_note, ListRunsQuery, NoteBody, RunId, RunResponse, RunsResponse};

use crate::{ApiError, AppState};

/// Query parameters for `GET /runs`.
#[derive(Debug, Default, Deserialize)]
pub struct ListRunsParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    /// Case-insensitive substring filter on the note.
    pub q: Option<String>,
}

/// A `{note}` body sent either as JSON or as an urlencoded form.
///
/// An empty body decodes to a missing note so the handler reports
/// "note is required" rather than a decoding error.
#[derive(Debug)]
pub struct NotePayload(pub NoteBody);

#[async_trait]
impl<S> FromRequest<S> for NotePayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(body) = Form::<NoteBody>::from_request(req, state)
                .await
                .map_err(|e| body_rejection(e.status(), e.body_text()))?;
            return Ok(Self(body));
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| body_rejection(e.status(), e.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(NoteBody::default()));
        }
        serde_json::from_slice(&bytes)
            .map(Self)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))
    }
}

fn body_rejection(status: StatusCode, text: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadRequest(text)
    }
}

fn parse_id(raw: &str) -> Result<RunId, ApiError> {
    Ok(RunId::classify(raw)?)
}

fn require_note(body: NoteBody) -> Result<String, ApiError> {
    Ok(validate_note(body.note.as_deref().unwrap_or_default())?)
}

/// List runs newest first.
///
/// # Query Parameters
/// - `limit`: page size, 1..=100 (default 20)
/// - `offset`: rows to skip, >= 0 (default 0)
/// - `q`: substring filter, trimmed and capped at 200 characters
///
/// # Returns
/// - 200 OK with `{ ok, runs }`
/// - 400 for out-of-range or non-integer pagination
pub async fn list_runs(
    State(state): State<AppState>,
    params: Result<Query<ListRunsParams>, QueryRejection>,
) -> Result<Json<RunsResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let query = ListRunsQuery::plan(
        params.limit.as_deref(),
        params.offset.as_deref(),
        params.q.as_deref(),
    )?;

    let runs = state.store()?.list(&query).await?;
    debug!(
        subsystem = "api",
        op = "list_runs",
        limit = query.limit,
        offset = query.offset,
        filtered = query.filter.is_some(),
        result_count = runs.len(),
        "Listed runs"
    );
    Ok(Json(RunsResponse { ok: true, runs }))
}

/// Fetch one run by modern or legacy id.
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    let id = parse_id(&id)?;
    let run = state.store()?.fetch(&id).await?;
    Ok(Json(RunResponse { ok: true, run }))
}

/// Create a run.
///
/// # Returns
/// - 201 Created with `{ ok, run }`
/// - 400 if the note is missing, blank, or longer than 500 characters
pub async fn create_run(
    State(state): State<AppState>,
    NotePayload(body): NotePayload,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let note = require_note(body)?;
    let run = state.store()?.insert(&note).await?;
    info!(
        subsystem = "api",
        op = "create_run",
        run_id = %run.id,
        "Run created"
    );
    Ok((StatusCode::CREATED, Json(RunResponse { ok: true, run })))
}

/// Replace a run's note.
pub async fn update_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    NotePayload(body): NotePayload,
) -> Result<Json<RunResponse>, ApiError> {
    let id = parse_id(&id)?;
    let note = require_note(body)?;
    let run = state.store()?.update(&id, &note).await?;
    info!(
        subsystem = "api",
        op = "update_run",
        run_id = %run.id,
        id_kind = id.kind(),
        "Run updated"
    );
    Ok(Json(RunResponse { ok: true, run }))
}

/// Delete a run. Responds 204 with no body.
pub async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.store()?.delete(&id).await?;
    info!(
        subsystem = "api",
        op = "delete_run",
        run_id = %id,
        id_kind = id.kind(),
        "Run deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}
