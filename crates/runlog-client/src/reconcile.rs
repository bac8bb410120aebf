//! Optimistic mutation engine.
//!
//! Every add, edit, and delete follows the same cycle:
//!
//! 1. **Speculate**: the overlay entry is recorded synchronously and the
//!    visible list changes before any network call.
//! 2. **Dispatch**: the API call runs on a spawned task.
//! 3. **Confirm**: the overlay is dropped and the authoritative run merged
//!    into the base pages (a delete revalidates instead).
//! 4. **Roll back**: the overlay is dropped, one error notice is recorded,
//!    and the loaded pages are revalidated.
//!
//! Page fetches carry a [`FetchTicket`] and are discarded if the filter
//! changed before they arrived. A page computed before a concurrent
//! mutation committed gets that mutation's confirmation replayed on it.
//!
//! The cache lock is a `std::sync::Mutex` and is never held across an await.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use runlog_core::{validate_note, Run, RunId};

use crate::api::RunsApi;
use crate::cache::{CacheState, Entry, FetchTicket, MutationId, PendingMutation};
use crate::error::{ClientError, Result};

/// A change requested by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Add { note: String },
    Edit { id: RunId, note: String },
    Delete { id: RunId },
}

impl Mutation {
    fn failure_message(&self) -> &'static str {
        match self {
            Mutation::Add { .. } => "Failed to add",
            Mutation::Edit { .. } => "Failed to save edit",
            Mutation::Delete { .. } => "Failed to delete",
        }
    }

    fn op(&self) -> &'static str {
        match self {
            Mutation::Add { .. } => "add",
            Mutation::Edit { .. } => "edit",
            Mutation::Delete { .. } => "delete",
        }
    }
}

/// Confirmed result of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Added(Run),
    Edited(Run),
    Deleted(RunId),
    /// The edit would not change the note; nothing was dispatched.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

/// User-facing message about a mutation's fate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    fn success(message: &str) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.to_string(),
        }
    }

    fn error(message: &str) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.to_string(),
        }
    }
}

struct Inner {
    api: Arc<dyn RunsApi>,
    cache: Mutex<CacheState>,
    notices: Mutex<Vec<Notice>>,
    version: watch::Sender<u64>,
}

/// Owns every [`CacheState`] transition for one consuming session.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<Inner>,
}

impl ReconciliationEngine {
    pub fn new(api: Arc<dyn RunsApi>) -> Self {
        Self::with_cache(api, CacheState::default())
    }

    pub fn with_cache(api: Arc<dyn RunsApi>, cache: CacheState) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                api,
                cache: Mutex::new(cache),
                notices: Mutex::new(Vec::new()),
                version,
            }),
        }
    }

    fn cache(&self) -> MutexGuard<'_, CacheState> {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the cache and notify subscribers.
    fn update<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let result = f(&mut self.cache());
        self.inner.version.send_modify(|v| *v += 1);
        result
    }

    fn notify(&self, notice: Notice) {
        self.inner
            .notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
        self.inner.version.send_modify(|v| *v += 1);
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// The visible list, speculative entries included.
    pub fn runs(&self) -> Vec<Entry> {
        self.cache().entries()
    }

    pub fn has_more(&self) -> bool {
        self.cache().has_more()
    }

    pub fn filter(&self) -> Option<String> {
        self.cache().filter().map(str::to_string)
    }

    pub fn pending_count(&self) -> usize {
        self.cache().pending_count()
    }

    pub fn load_error(&self) -> Option<String> {
        self.cache().load_error().map(str::to_string)
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.inner
            .notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take all recorded notices.
    pub fn drain_notices(&self) -> Vec<Notice> {
        std::mem::take(
            &mut *self
                .inner
                .notices
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Receiver whose value changes whenever the visible state may have.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    // ------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------

    /// Fetch page `index` under the current filter.
    ///
    /// Returns `Ok(false)` when the result arrived after a filter change, or
    /// after a later fetch of the same page, and was discarded. On failure,
    /// already-loaded data is left untouched.
    pub async fn fetch_page(&self, index: usize) -> Result<bool> {
        let (ticket, query) = {
            let mut cache = self.cache();
            (cache.begin_fetch(index), cache.page_query(index))
        };
        let in_flight = InFlight {
            engine: self,
            ticket,
            finished: false,
        };

        let result = self.inner.api.list(&query).await;
        let ticket = in_flight.finish();
        match result {
            Ok(runs) => {
                let count = runs.len();
                let applied = self.update(|c| c.apply_page(ticket, runs));
                debug!(
                    subsystem = "client",
                    component = "reconcile",
                    op = "fetch_page",
                    page = index,
                    result_count = count,
                    applied,
                    "Page fetched"
                );
                Ok(applied)
            }
            Err(e) => {
                warn!(
                    subsystem = "client",
                    component = "reconcile",
                    op = "fetch_page",
                    page = index,
                    error = %e,
                    "Page fetch failed"
                );
                self.update(|c| c.record_load_error(ticket, "Failed to load".to_string()));
                Err(e)
            }
        }
    }

    /// Fetch the page after the last loaded one, if the last page was full.
    ///
    /// Returns `Ok(false)` without a request when there is nothing more.
    pub async fn load_more(&self) -> Result<bool> {
        let next = {
            let cache = self.cache();
            if !cache.has_more() {
                return Ok(false);
            }
            cache.next_page_index()
        };
        self.fetch_page(next).await
    }

    /// Re-fetch every loaded page (or the first page if none is loaded).
    ///
    /// All pages are attempted; the first error is returned.
    pub async fn revalidate(&self) -> Result<()> {
        let pages = self.cache().loaded_pages();
        let pages = if pages.is_empty() { vec![0] } else { pages };

        let mut first_error = None;
        for index in pages {
            if let Err(e) = self.fetch_page(index).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Change the search filter and load its first page.
    ///
    /// An unchanged filter (after trimming) keeps the loaded pages and
    /// fetches nothing.
    pub async fn set_filter(&self, raw: Option<&str>) -> Result<()> {
        if !self.update(|c| c.set_filter(raw)) {
            return Ok(());
        }
        self.fetch_page(0).await.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Speculate `mutation` now and dispatch it on a spawned task.
    ///
    /// Invalid notes are rejected before anything is speculated. The
    /// returned receiver yields the confirmed outcome or the error that
    /// caused the rollback. Must be called within a tokio runtime.
    pub fn submit(
        &self,
        mutation: Mutation,
    ) -> Result<oneshot::Receiver<Result<MutationOutcome>>> {
        let mutation = match mutation {
            Mutation::Add { note } => Mutation::Add {
                note: validate_note(&note)?,
            },
            Mutation::Edit { id, note } => Mutation::Edit {
                id,
                note: validate_note(&note)?,
            },
            delete => delete,
        };

        let (tx, rx) = oneshot::channel();

        if let Mutation::Edit { id, note } = &mutation {
            if self.cache().visible_note(id).as_deref() == Some(note.as_str()) {
                let _ = tx.send(Ok(MutationOutcome::Unchanged));
                return Ok(rx);
            }
        }

        let pending = match &mutation {
            Mutation::Add { note } => PendingMutation::Add {
                note: note.clone(),
                created_at: Utc::now(),
            },
            Mutation::Edit { id, note } => PendingMutation::Edit {
                id: *id,
                note: note.clone(),
            },
            Mutation::Delete { id } => PendingMutation::Delete { id: *id },
        };
        let mutation_id = self.update(|c| c.speculate(pending));

        let engine = self.clone();
        tokio::spawn(async move {
            let outcome = engine.dispatch(mutation_id, mutation).await;
            let _ = tx.send(outcome);
        });
        Ok(rx)
    }

    async fn dispatch(&self, mutation_id: MutationId, mutation: Mutation) -> Result<MutationOutcome> {
        let api = &self.inner.api;
        let result = match &mutation {
            Mutation::Add { note } => api.create(note).await.map(MutationOutcome::Added),
            Mutation::Edit { id, note } => api.update(id, note).await.map(MutationOutcome::Edited),
            Mutation::Delete { id } => api.delete(id).await.map(|_| MutationOutcome::Deleted(*id)),
        };

        match result {
            Ok(outcome) => {
                self.confirm(mutation_id, &outcome).await;
                Ok(outcome)
            }
            Err(e) => {
                self.roll_back(mutation_id, &mutation, &e).await;
                Err(e)
            }
        }
    }

    async fn confirm(&self, mutation_id: MutationId, outcome: &MutationOutcome) {
        match outcome {
            MutationOutcome::Added(run) => {
                self.update(|c| {
                    c.resolve(mutation_id);
                    c.merge_added(run.clone());
                });
                self.notify(Notice::success("Run added"));
            }
            MutationOutcome::Edited(run) => {
                self.update(|c| {
                    c.resolve(mutation_id);
                    c.merge_edited(run.clone());
                });
            }
            MutationOutcome::Deleted(id) => {
                self.update(|c| {
                    c.resolve(mutation_id);
                    c.remove_confirmed(*id);
                });
                // Later pages shift up by one; re-derive them from the server
                if let Err(e) = self.revalidate().await {
                    debug!(
                        subsystem = "client",
                        component = "reconcile",
                        error = %e,
                        "Revalidation after delete failed"
                    );
                }
            }
            MutationOutcome::Unchanged => {}
        }
    }

    async fn roll_back(&self, mutation_id: MutationId, mutation: &Mutation, error: &ClientError) {
        warn!(
            subsystem = "client",
            component = "reconcile",
            op = mutation.op(),
            mutation_id,
            error = %error,
            "Mutation failed, rolling back"
        );
        self.update(|c| c.resolve(mutation_id));
        self.notify(Notice::error(mutation.failure_message()));

        if let Err(e) = self.revalidate().await {
            debug!(
                subsystem = "client",
                component = "reconcile",
                error = %e,
                "Revalidation after rollback failed"
            );
        }
    }

    /// Add a run and wait for confirmation.
    pub async fn add(&self, note: &str) -> Result<Run> {
        match self.submit_and_wait(Mutation::Add { note: note.to_string() }).await? {
            MutationOutcome::Added(run) => Ok(run),
            other => Err(unexpected(other)),
        }
    }

    /// Edit a run's note and wait for confirmation.
    ///
    /// Returns `Ok(None)` when the note was already current.
    pub async fn edit(&self, id: RunId, note: &str) -> Result<Option<Run>> {
        match self
            .submit_and_wait(Mutation::Edit {
                id,
                note: note.to_string(),
            })
            .await?
        {
            MutationOutcome::Edited(run) => Ok(Some(run)),
            MutationOutcome::Unchanged => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    /// Delete a run and wait for confirmation.
    pub async fn delete(&self, id: RunId) -> Result<()> {
        self.submit_and_wait(Mutation::Delete { id }).await?;
        Ok(())
    }

    async fn submit_and_wait(&self, mutation: Mutation) -> Result<MutationOutcome> {
        self.submit(mutation)?
            .await
            .map_err(|_| ClientError::Network("mutation task ended without a result".to_string()))?
    }
}

/// Releases the ticket of a fetch dropped before its response arrived.
struct InFlight<'a> {
    engine: &'a ReconciliationEngine,
    ticket: FetchTicket,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(mut self) -> FetchTicket {
        self.finished = true;
        self.ticket
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.engine.cache().abandon_fetch(self.ticket);
        }
    }
}

fn unexpected(outcome: MutationOutcome) -> ClientError {
    ClientError::Decode(format!("unexpected mutation outcome: {:?}", outcome))
}
