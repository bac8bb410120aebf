//! Process-local run store.
//!
//! Mirrors [`PgRunRepository`](crate::PgRunRepository) semantics (ordering,
//! filtering, legacy-id addressing, not-found reporting) without a database.
//! Used by the HTTP tests, the client tests, and `RUNLOG_STORE=memory`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use runlog_core::models::note_matches_filter;
use runlog_core::{Error, ListRunsQuery, Result, Run, RunId, RunRepository};

#[derive(Debug, Clone)]
struct StoredRun {
    key: Uuid,
    legacy_id: Option<i64>,
    created_at: DateTime<Utc>,
    note: String,
}

impl StoredRun {
    fn id(&self) -> RunId {
        match self.legacy_id {
            Some(n) => RunId::Legacy(n),
            None => RunId::Modern(self.key),
        }
    }

    fn matches(&self, id: &RunId) -> bool {
        match *id {
            RunId::Modern(uuid) => self.key == uuid,
            RunId::Legacy(n) => self.legacy_id == Some(n),
        }
    }

    fn to_run(&self) -> Run {
        Run {
            id: self.id(),
            created_at: self.created_at,
            note: self.note.clone(),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    rows: Vec<StoredRun>,
    last_created_at: Option<DateTime<Utc>>,
    failing: bool,
}

impl MemoryState {
    /// Strictly increasing timestamps keep newest-first ordering stable.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(ts);
        ts
    }

    fn check_available(&self) -> Result<()> {
        if self.failing {
            return Err(Error::Internal("store unavailable".to_string()));
        }
        Ok(())
    }
}

/// In-memory implementation of RunRepository.
#[derive(Default)]
pub struct InMemoryRunRepository {
    state: RwLock<MemoryState>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row addressed by a legacy integer id.
    pub async fn seed_legacy(&self, legacy_id: i64, note: &str) -> Run {
        let mut state = self.state.write().await;
        let created_at = state.next_timestamp();
        let row = StoredRun {
            key: Uuid::new_v4(),
            legacy_id: Some(legacy_id),
            created_at,
            note: note.to_string(),
        };
        let run = row.to_run();
        state.rows.push(row);
        run
    }

    /// Make every subsequent call fail with a store error until reset.
    pub async fn set_failing(&self, failing: bool) {
        self.state.write().await.failing = failing;
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn not_found(id: &RunId) -> Error {
    Error::NotFound(format!("Run {} not found", id))
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn insert(&self, note: &str) -> Result<Run> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let created_at = state.next_timestamp();
        let row = StoredRun {
            key: Uuid::new_v4(),
            legacy_id: None,
            created_at,
            note: note.to_string(),
        };
        let run = row.to_run();
        state.rows.push(row);
        Ok(run)
    }

    async fn list(&self, query: &ListRunsQuery) -> Result<Vec<Run>> {
        let state = self.state.read().await;
        state.check_available()?;

        let mut matching: Vec<&StoredRun> = state
            .rows
            .iter()
            .filter(|r| note_matches_filter(&r.note, query.filter()))
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.key.cmp(&b.key))
        });

        Ok(matching
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .map(StoredRun::to_run)
            .collect())
    }

    async fn fetch(&self, id: &RunId) -> Result<Run> {
        let state = self.state.read().await;
        state.check_available()?;

        state
            .rows
            .iter()
            .find(|r| r.matches(id))
            .map(StoredRun::to_run)
            .ok_or_else(|| not_found(id))
    }

    async fn update(&self, id: &RunId, note: &str) -> Result<Run> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let row = state
            .rows
            .iter_mut()
            .find(|r| r.matches(id))
            .ok_or_else(|| not_found(id))?;
        row.note = note.to_string();
        Ok(row.to_run())
    }

    async fn delete(&self, id: &RunId) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let before = state.rows.len();
        state.rows.retain(|r| !r.matches(id));
        if state.rows.len() == before {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<DateTime<Utc>> {
        self.state.read().await.check_available()?;
        Ok(Utc::now())
    }
}
