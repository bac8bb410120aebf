//! Core traits for runlog abstractions.
//!
//! These traits define the interfaces that concrete stores must satisfy,
//! enabling pluggable backends and testability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::identifier::RunId;
use crate::models::Run;
use crate::query::ListRunsQuery;

/// Repository for run CRUD operations.
///
/// Notes passed in are already validated. Lookups dispatch on the [`RunId`]
/// variant; a missing row is reported as `Error::NotFound`.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Insert a new run, returning it with its assigned id and timestamp.
    async fn insert(&self, note: &str) -> Result<Run>;

    /// List one window of runs, newest first.
    async fn list(&self, query: &ListRunsQuery) -> Result<Vec<Run>>;

    /// Fetch a single run.
    async fn fetch(&self, id: &RunId) -> Result<Run>;

    /// Replace a run's note, returning the updated run.
    async fn update(&self, id: &RunId, note: &str) -> Result<Run>;

    /// Delete a run.
    async fn delete(&self, id: &RunId) -> Result<()>;

    /// Liveness probe; returns the store's current time.
    async fn ping(&self) -> Result<DateTime<Utc>>;
}
