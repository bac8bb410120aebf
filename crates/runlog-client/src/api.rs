//! Runs API transport.
//!
//! [`RunsApi`] is the seam the reconciliation engine dispatches through;
//! [`HttpRunsApi`] implements it over HTTP with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use runlog_core::{ErrorResponse, ListRunsQuery, NoteBody, Run, RunId, RunResponse, RunsResponse};

use crate::error::{ClientError, Result};

/// Default request timeout for [`HttpRunsApi::new`].
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Remote operations on runs.
#[async_trait]
pub trait RunsApi: Send + Sync {
    /// One page of runs, newest first.
    async fn list(&self, query: &ListRunsQuery) -> Result<Vec<Run>>;

    async fn create(&self, note: &str) -> Result<Run>;

    async fn update(&self, id: &RunId, note: &str) -> Result<Run>;

    async fn delete(&self, id: &RunId) -> Result<()>;
}

/// reqwest-backed [`RunsApi`].
#[derive(Debug, Clone)]
pub struct HttpRunsApi {
    client: Client,
    base_url: String,
}

impl HttpRunsApi {
    /// Client for the server at `base_url` (e.g. `http://localhost:4000`).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ClientError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use a preconfigured reqwest client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map a non-success response onto the error taxonomy.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let header_retry = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body: Option<ErrorResponse> = response.json().await.ok();
    let message = body
        .as_ref()
        .map(|b| b.error.clone())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    Err(match status {
        StatusCode::BAD_REQUEST => ClientError::Validation(message),
        StatusCode::NOT_FOUND => ClientError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited {
            retry_after_secs: header_retry
                .or_else(|| body.and_then(|b| b.retry_after))
                .unwrap_or(0),
        },
        _ => ClientError::Server {
            status: status.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl RunsApi for HttpRunsApi {
    async fn list(&self, query: &ListRunsQuery) -> Result<Vec<Run>> {
        let mut params = vec![
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
        ];
        if let Some(filter) = query.filter() {
            params.push(("q", filter.to_string()));
        }

        let response = self.client.get(self.url("/runs")).query(&params).send().await?;
        let body: RunsResponse = check(response).await?.json().await?;
        debug!(
            subsystem = "client",
            op = "list",
            offset = query.offset,
            result_count = body.runs.len(),
            "Fetched runs page"
        );
        Ok(body.runs)
    }

    async fn create(&self, note: &str) -> Result<Run> {
        let response = self
            .client
            .post(self.url("/runs"))
            .json(&NoteBody::new(note))
            .send()
            .await?;
        let body: RunResponse = check(response).await?.json().await?;
        Ok(body.run)
    }

    async fn update(&self, id: &RunId, note: &str) -> Result<Run> {
        let response = self
            .client
            .patch(self.url(&format!("/runs/{}", id)))
            .json(&NoteBody::new(note))
            .send()
            .await?;
        let body: RunResponse = check(response).await?.json().await?;
        Ok(body.run)
    }

    async fn delete(&self, id: &RunId) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/runs/{}", id)))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
