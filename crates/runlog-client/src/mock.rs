//! In-memory [`RunsApi`] for deterministic testing.
//!
//! Behaves like the server (newest-first listing, case-insensitive filter,
//! note validation, not-found reporting) and adds knobs for latency and
//! failure injection. Latency uses `tokio::time::sleep`, so tests running
//! with a paused clock observe a deterministic completion order.
//!
//! By default a list call reads the runs after its delay. With
//! [`MockRunsApi::list_at_request`] it reads them first and delivers the
//! result after the delay, like a server whose response is slow to arrive.
//!
//! ```rust,ignore
//! let api = Arc::new(MockRunsApi::new());
//! api.set_list_delay(Some("foo"), Duration::from_millis(200));
//! api.fail_next(MockOp::Create);
//! let engine = ReconciliationEngine::new(api.clone());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use runlog_core::models::note_matches_filter;
use runlog_core::query::normalize_filter;
use runlog_core::{validate_note, ListRunsQuery, Run, RunId};

use crate::api::RunsApi;
use crate::error::{ClientError, Result};

/// API operation, for latency and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    List,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Default)]
struct MockState {
    /// Newest last.
    runs: Vec<Run>,
    next_id: i64,
    last_created_at: Option<DateTime<Utc>>,
    list_delays: HashMap<Option<String>, Duration>,
    op_delays: HashMap<MockOp, Duration>,
    fail_next: HashSet<MockOp>,
    failing_ids: HashSet<RunId>,
    calls: Vec<MockOp>,
    list_at_request: bool,
}

/// In-memory run API.
#[derive(Debug, Default)]
pub struct MockRunsApi {
    state: Mutex<MockState>,
}

impl MockRunsApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a confirmed run directly, bypassing latency and failures.
    pub fn seed(&self, note: &str) -> Run {
        self.state().insert(note)
    }

    /// Current server-side runs, newest first.
    pub fn snapshot(&self) -> Vec<Run> {
        self.state().runs.iter().rev().cloned().collect()
    }

    /// Delay list calls for `filter` (normalized like the server does).
    pub fn set_list_delay(&self, filter: Option<&str>, delay: Duration) {
        self.state()
            .list_delays
            .insert(normalize_filter(filter), delay);
    }

    /// Delay every call of `op`; list delays set per filter take precedence.
    pub fn set_delay(&self, op: MockOp, delay: Duration) {
        self.state().op_delays.insert(op, delay);
    }

    /// Compute list results when the call starts rather than after its delay.
    pub fn list_at_request(&self, enabled: bool) {
        self.state().list_at_request = enabled;
    }

    /// Fail the next call of `op` with a server error.
    pub fn fail_next(&self, op: MockOp) {
        self.state().fail_next.insert(op);
    }

    /// Fail every update or delete addressed to `id`.
    pub fn fail_for(&self, id: RunId) {
        self.state().failing_ids.insert(id);
    }

    /// Number of calls made for `op`.
    pub fn call_count(&self, op: MockOp) -> usize {
        self.state().calls.iter().filter(|c| **c == op).count()
    }

    /// Record the call and decide latency and injected failure.
    fn begin(&self, op: MockOp, filter: Option<&str>, id: Option<&RunId>) -> (Duration, bool) {
        let mut state = self.state();
        state.calls.push(op);
        let delay = match op {
            MockOp::List => state
                .list_delays
                .get(&filter.map(str::to_string))
                .or_else(|| state.op_delays.get(&op))
                .copied(),
            _ => state.op_delays.get(&op).copied(),
        }
        .unwrap_or_default();
        let fail = state.fail_next.remove(&op) || id.is_some_and(|id| state.failing_ids.contains(id));
        (delay, fail)
    }

    async fn enter(&self, op: MockOp, filter: Option<&str>, id: Option<&RunId>) -> Result<()> {
        let (delay, fail) = self.begin(op, filter, id);
        finish(delay, fail).await
    }
}

async fn finish(delay: Duration, fail: bool) -> Result<()> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if fail {
        return Err(ClientError::Server {
            status: 500,
            message: "injected failure".to_string(),
        });
    }
    Ok(())
}

impl MockState {
    fn insert(&mut self, note: &str) -> Run {
        self.next_id += 1;
        let now = Utc::now();
        let created_at = match self.last_created_at {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(created_at);
        let run = Run {
            id: RunId::Legacy(self.next_id),
            created_at,
            note: note.to_string(),
        };
        self.runs.push(run.clone());
        run
    }

    fn page(&self, query: &ListRunsQuery) -> Vec<Run> {
        self.runs
            .iter()
            .rev()
            .filter(|r| note_matches_filter(&r.note, query.filter()))
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RunsApi for MockRunsApi {
    async fn list(&self, query: &ListRunsQuery) -> Result<Vec<Run>> {
        let (delay, fail) = self.begin(MockOp::List, query.filter(), None);
        let early = {
            let state = self.state();
            state.list_at_request.then(|| state.page(query))
        };
        finish(delay, fail).await?;
        Ok(match early {
            Some(runs) => runs,
            None => self.state().page(query),
        })
    }

    async fn create(&self, note: &str) -> Result<Run> {
        self.enter(MockOp::Create, None, None).await?;
        let note = validate_note(note)?;
        Ok(self.state().insert(&note))
    }

    async fn update(&self, id: &RunId, note: &str) -> Result<Run> {
        self.enter(MockOp::Update, None, Some(id)).await?;
        let note = validate_note(note)?;
        let mut state = self.state();
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == *id)
            .ok_or(ClientError::NotFound)?;
        run.note = note;
        Ok(run.clone())
    }

    async fn delete(&self, id: &RunId) -> Result<()> {
        self.enter(MockOp::Delete, None, Some(id)).await?;
        let mut state = self.state();
        let before = state.runs.len();
        state.runs.retain(|r| r.id != *id);
        if state.runs.len() == before {
            return Err(ClientError::NotFound);
        }
        Ok(())
    }
}
