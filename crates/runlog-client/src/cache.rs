//! Client-side run cache.
//!
//! The cache keeps two layers:
//!
//! - **base pages**: server-confirmed runs keyed by page index, each tagged
//!   with the filter generation it was fetched under;
//! - **overlay**: pending speculative mutations in submission order.
//!
//! The visible list is the base pages flattened, with every pending
//! mutation applied on top. Rolling back a mutation removes its overlay
//! entry and nothing else, so speculation on unrelated runs survives.
//!
//! Every page request holds a [`FetchTicket`] naming the filter generation
//! and confirmation epoch it was issued under. A page computed by the
//! server before a mutation committed can arrive after that mutation was
//! confirmed locally; confirmations newer than the ticket's epoch are
//! replayed onto it so the confirmed change is not lost. The replay log
//! only holds entries some in-flight fetch still needs.
//!
//! `CacheState` is plain data; [`ReconciliationEngine`](crate::ReconciliationEngine)
//! owns the transitions.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use runlog_core::defaults::PAGE_LIMIT;
use runlog_core::models::note_matches_filter;
use runlog_core::query::normalize_filter;
use runlog_core::{ListRunsQuery, Run, RunId};

/// Submission-ordered identifier of a speculative mutation.
pub type MutationId = u64;

/// Identity of a visible entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryId {
    /// A server-confirmed run.
    Run(RunId),
    /// A speculative add awaiting confirmation.
    Pending(MutationId),
}

/// One row of the visible list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub created_at: DateTime<Utc>,
    pub note: String,
}

impl Entry {
    pub fn is_pending(&self) -> bool {
        matches!(self.id, EntryId::Pending(_))
    }

    /// The confirmed run id, if any.
    pub fn run_id(&self) -> Option<RunId> {
        match self.id {
            EntryId::Run(id) => Some(id),
            EntryId::Pending(_) => None,
        }
    }
}

impl From<&Run> for Entry {
    fn from(run: &Run) -> Self {
        Self {
            id: EntryId::Run(run.id),
            created_at: run.created_at,
            note: run.note.clone(),
        }
    }
}

/// A speculative change not yet confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingMutation {
    Add {
        note: String,
        created_at: DateTime<Utc>,
    },
    Edit {
        id: RunId,
        note: String,
    },
    Delete {
        id: RunId,
    },
}

/// Server-confirmed change, kept while older fetches are in flight.
#[derive(Debug, Clone)]
enum Confirmed {
    Added(Run),
    Edited(Run),
    Removed(RunId),
}

/// One outstanding page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    epoch: u64,
    /// Issue order among all fetches.
    seq: u64,
    index: usize,
}

impl FetchTicket {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone)]
struct LoadedPage {
    runs: Vec<Run>,
    /// Length as returned by the server, before local merges.
    fetched_len: usize,
    /// Ticket sequence of the fetch that produced the page.
    seq: u64,
}

/// Base pages plus pending overlay for one consuming session.
#[derive(Debug)]
pub struct CacheState {
    limit: i64,
    filter: Option<String>,
    generation: u64,
    pages: BTreeMap<usize, LoadedPage>,
    pending: BTreeMap<MutationId, PendingMutation>,
    next_mutation: MutationId,
    load_error: Option<String>,
    /// Bumps on every confirmation merged into the base pages.
    epoch: u64,
    confirmed: Vec<(u64, Confirmed)>,
    /// Outstanding fetches per issuing epoch.
    in_flight: BTreeMap<u64, usize>,
    next_fetch: u64,
}

impl Default for CacheState {
    fn default() -> Self {
        Self::new(PAGE_LIMIT)
    }
}

impl CacheState {
    /// Empty cache paging `limit` runs at a time.
    pub fn new(limit: i64) -> Self {
        Self {
            limit,
            filter: None,
            generation: 0,
            pages: BTreeMap::new(),
            pending: BTreeMap::new(),
            next_mutation: 1,
            load_error: None,
            epoch: 0,
            confirmed: Vec::new(),
            in_flight: BTreeMap::new(),
            next_fetch: 1,
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Identity of the current filter; bumps on every filter change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Switch filters. Returns `false` when the normalized filter is unchanged.
    ///
    /// A change drops every loaded page; fetches issued under the previous
    /// generation are discarded on arrival.
    pub fn set_filter(&mut self, raw: Option<&str>) -> bool {
        let filter = normalize_filter(raw);
        if filter == self.filter {
            return false;
        }
        self.filter = filter;
        self.generation += 1;
        self.pages.clear();
        self.load_error = None;
        true
    }

    /// The list query for page `index` under the current filter.
    pub fn page_query(&self, index: usize) -> ListRunsQuery {
        ListRunsQuery::page(index, self.limit, self.filter.as_deref())
    }

    /// Register a request for page `index`.
    ///
    /// The ticket must be passed back to exactly one of
    /// [`apply_page`](Self::apply_page), [`record_load_error`](Self::record_load_error)
    /// or [`abandon_fetch`](Self::abandon_fetch).
    pub fn begin_fetch(&mut self, index: usize) -> FetchTicket {
        *self.in_flight.entry(self.epoch).or_default() += 1;
        let seq = self.next_fetch;
        self.next_fetch += 1;
        FetchTicket {
            generation: self.generation,
            epoch: self.epoch,
            seq,
            index,
        }
    }

    /// Store a fetched page. Returns `false` (and changes nothing) when the
    /// fetch was issued under an older generation, or before the fetch that
    /// produced the page already held at that index.
    ///
    /// A later-issued fetch of the same index replaces the earlier result.
    /// Confirmations merged after the ticket was issued are replayed on top.
    pub fn apply_page(&mut self, ticket: FetchTicket, runs: Vec<Run>) -> bool {
        let superseded = self
            .pages
            .get(&ticket.index)
            .is_some_and(|p| p.seq > ticket.seq);
        let applied = ticket.generation == self.generation && !superseded;
        if applied {
            let fetched_len = runs.len();
            self.pages.insert(
                ticket.index,
                LoadedPage {
                    runs,
                    fetched_len,
                    seq: ticket.seq,
                },
            );
            let later: Vec<Confirmed> = self
                .confirmed
                .iter()
                .filter(|(epoch, _)| *epoch > ticket.epoch)
                .map(|(_, change)| change.clone())
                .collect();
            for change in &later {
                self.apply_confirmed(change);
            }
            self.load_error = None;
        }
        self.end_fetch(&ticket);
        applied
    }

    /// Record a failed fetch for the current generation.
    pub fn record_load_error(&mut self, ticket: FetchTicket, message: String) -> bool {
        let current = ticket.generation == self.generation;
        if current {
            self.load_error = Some(message);
        }
        self.end_fetch(&ticket);
        current
    }

    /// Release a ticket whose request was cancelled.
    pub fn abandon_fetch(&mut self, ticket: FetchTicket) {
        self.end_fetch(&ticket);
    }

    fn end_fetch(&mut self, ticket: &FetchTicket) {
        if let Some(count) = self.in_flight.get_mut(&ticket.epoch) {
            *count -= 1;
            if *count == 0 {
                self.in_flight.remove(&ticket.epoch);
            }
        }
        match self.in_flight.keys().next() {
            Some(&oldest) => self.confirmed.retain(|(epoch, _)| *epoch > oldest),
            None => self.confirmed.clear(),
        }
    }

    /// Fetches not yet applied, failed, or abandoned.
    pub fn fetches_in_flight(&self) -> usize {
        self.in_flight.values().sum()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Indices of loaded pages, ascending.
    pub fn loaded_pages(&self) -> Vec<usize> {
        self.pages.keys().copied().collect()
    }

    /// Index the next `load_more` should fetch.
    pub fn next_page_index(&self) -> usize {
        self.pages.keys().next_back().map_or(0, |i| i + 1)
    }

    /// Whether the last loaded page was full.
    ///
    /// A full last page may be followed by an empty one; that extra fetch is
    /// accepted.
    pub fn has_more(&self) -> bool {
        self.pages
            .values()
            .next_back()
            .is_some_and(|p| runlog_core::has_more(p.fetched_len, self.limit))
    }

    /// Record a speculative mutation and return its id.
    pub fn speculate(&mut self, mutation: PendingMutation) -> MutationId {
        let id = self.next_mutation;
        self.next_mutation += 1;
        self.pending.insert(id, mutation);
        id
    }

    /// Drop one mutation's overlay, confirmed or rolled back.
    pub fn resolve(&mut self, id: MutationId) -> Option<PendingMutation> {
        self.pending.remove(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Merge a confirmed add: replaced in place if a page already holds
    /// it, otherwise prepended to the first page.
    pub fn merge_added(&mut self, run: Run) {
        self.record(Confirmed::Added(run));
    }

    /// Merge a confirmed edit into whichever loaded page holds the run.
    ///
    /// A run on no loaded page is left for the page fetch that reaches it.
    pub fn merge_edited(&mut self, run: Run) {
        self.record(Confirmed::Edited(run));
    }

    /// Remove a confirmed delete from the base pages.
    pub fn remove_confirmed(&mut self, id: RunId) {
        self.record(Confirmed::Removed(id));
    }

    fn record(&mut self, change: Confirmed) {
        self.apply_confirmed(&change);
        self.epoch += 1;
        if !self.in_flight.is_empty() {
            self.confirmed.push((self.epoch, change));
        }
    }

    fn apply_confirmed(&mut self, change: &Confirmed) {
        match change {
            Confirmed::Added(run) | Confirmed::Edited(run)
                if !note_matches_filter(&run.note, self.filter.as_deref()) =>
            {
                self.drop_run(&run.id);
            }
            Confirmed::Added(run) => {
                if !self.replace_run(run) {
                    self.pages
                        .entry(0)
                        .or_insert_with(|| LoadedPage {
                            runs: Vec::new(),
                            fetched_len: 0,
                            seq: 0,
                        })
                        .runs
                        .insert(0, run.clone());
                }
            }
            Confirmed::Edited(run) => {
                self.replace_run(run);
            }
            Confirmed::Removed(id) => self.drop_run(id),
        }
    }

    /// Replace every cached copy of `run`; `false` if none was cached.
    fn replace_run(&mut self, run: &Run) -> bool {
        let mut found = false;
        for page in self.pages.values_mut() {
            for slot in page.runs.iter_mut().filter(|r| r.id == run.id) {
                *slot = run.clone();
                found = true;
            }
        }
        found
    }

    fn drop_run(&mut self, id: &RunId) {
        for page in self.pages.values_mut() {
            page.runs.retain(|r| r.id != *id);
        }
    }

    /// The visible list: base pages with pending mutations applied in order.
    pub fn entries(&self) -> Vec<Entry> {
        let mut seen = HashSet::new();
        let mut entries: Vec<Entry> = self
            .pages
            .values()
            .flat_map(|p| p.runs.iter())
            .filter(|r| seen.insert(r.id))
            .map(Entry::from)
            .collect();

        for (&mutation_id, mutation) in &self.pending {
            match mutation {
                PendingMutation::Add { note, created_at } => {
                    if note_matches_filter(note, self.filter.as_deref()) {
                        entries.insert(
                            0,
                            Entry {
                                id: EntryId::Pending(mutation_id),
                                created_at: *created_at,
                                note: note.clone(),
                            },
                        );
                    }
                }
                PendingMutation::Edit { id, note } => {
                    if let Some(entry) = entries.iter_mut().find(|e| e.id == EntryId::Run(*id)) {
                        entry.note = note.clone();
                    }
                }
                PendingMutation::Delete { id } => {
                    entries.retain(|e| e.id != EntryId::Run(*id));
                }
            }
        }
        entries
    }

    /// The visible note of a confirmed run, if it is on screen.
    pub fn visible_note(&self, id: &RunId) -> Option<String> {
        self.entries()
            .into_iter()
            .find(|e| e.id == EntryId::Run(*id))
            .map(|e| e.note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn run(n: i64, note: &str) -> Run {
        Run {
            id: RunId::Legacy(n),
            created_at: Utc::now() - Duration::minutes(n),
            note: note.to_string(),
        }
    }

    fn notes(cache: &CacheState) -> Vec<String> {
        cache.entries().into_iter().map(|e| e.note).collect()
    }

    fn load(cache: &mut CacheState, index: usize, runs: Vec<Run>) -> bool {
        let ticket = cache.begin_fetch(index);
        cache.apply_page(ticket, runs)
    }

    #[test]
    fn test_overlay_applies_in_order() {
        let mut cache = CacheState::new(20);
        load(&mut cache, 0, vec![run(1, "a"), run(2, "b"), run(3, "c")]);

        cache.speculate(PendingMutation::Edit {
            id: RunId::Legacy(1),
            note: "a2".into(),
        });
        cache.speculate(PendingMutation::Delete { id: RunId::Legacy(2) });
        cache.speculate(PendingMutation::Add {
            note: "new".into(),
            created_at: Utc::now(),
        });

        assert_eq!(notes(&cache), vec!["new", "a2", "c"]);
        assert!(cache.entries()[0].is_pending());
    }

    #[test]
    fn test_rollback_touches_only_own_overlay() {
        let mut cache = CacheState::new(20);
        load(&mut cache, 0, vec![run(1, "a"), run(2, "b")]);

        let edit = cache.speculate(PendingMutation::Edit {
            id: RunId::Legacy(1),
            note: "x".into(),
        });
        cache.speculate(PendingMutation::Delete { id: RunId::Legacy(2) });

        cache.resolve(edit);
        assert_eq!(notes(&cache), vec!["a"]);
        assert_eq!(cache.pending_count(), 1);
    }

    #[test]
    fn test_stale_generation_discarded() {
        let mut cache = CacheState::new(20);
        let old = cache.begin_fetch(0);
        assert!(cache.set_filter(Some("foo")));
        assert!(!cache.apply_page(old, vec![run(1, "unfiltered")]));
        assert!(cache.entries().is_empty());

        assert!(load(&mut cache, 0, vec![run(2, "foo run")]));
        assert_eq!(notes(&cache), vec!["foo run"]);
        assert_eq!(cache.fetches_in_flight(), 0);
    }

    #[test]
    fn test_set_same_filter_is_noop() {
        let mut cache = CacheState::new(20);
        cache.set_filter(Some("foo"));
        let generation = cache.generation();
        load(&mut cache, 0, vec![run(1, "foo")]);

        assert!(!cache.set_filter(Some("  foo ")));
        assert_eq!(cache.generation(), generation);
        assert_eq!(cache.loaded_pages(), vec![0]);
    }

    #[test]
    fn test_same_index_later_response_wins() {
        let mut cache = CacheState::new(2);
        load(&mut cache, 0, vec![run(1, "first"), run(2, "second")]);
        load(&mut cache, 0, vec![run(1, "first v2"), run(2, "second")]);
        assert_eq!(notes(&cache), vec!["first v2", "second"]);
    }

    #[test]
    fn test_overlapping_pages_deduplicated() {
        let mut cache = CacheState::new(2);
        load(&mut cache, 0, vec![run(1, "a"), run(2, "b")]);
        // A run inserted server-side shifts "b" onto page 1
        load(&mut cache, 1, vec![run(2, "b"), run(3, "c")]);
        assert_eq!(notes(&cache), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_has_more_uses_fetched_length() {
        for limit in [1usize, 20, 100] {
            let mut cache = CacheState::new(limit as i64);
            assert!(!cache.has_more());

            let full: Vec<Run> = (0..limit as i64).map(|i| run(i, "r")).collect();
            load(&mut cache, 0, full);
            assert!(cache.has_more(), "limit {}", limit);

            // Local merges do not change what the server reported
            cache.merge_added(run(10_000, "local"));
            assert!(cache.has_more(), "limit {}", limit);

            let short: Vec<Run> = (0..limit as i64 - 1).map(|i| run(i + 500, "r")).collect();
            load(&mut cache, 1, short);
            assert!(!cache.has_more(), "limit {}", limit);
            assert_eq!(cache.next_page_index(), 2);
        }
    }

    #[test]
    fn test_merge_replaces_in_place() {
        let mut cache = CacheState::new(20);
        load(&mut cache, 0, vec![run(1, "a"), run(2, "b")]);
        cache.merge_edited(run(2, "b2"));
        cache.merge_added(run(9, "z"));
        assert_eq!(notes(&cache), vec!["z", "a", "b2"]);
    }

    #[test]
    fn test_edit_of_unloaded_run_not_inserted() {
        let mut cache = CacheState::new(2);
        load(&mut cache, 0, vec![run(1, "a"), run(2, "b")]);

        cache.merge_edited(run(7, "older run edited"));
        assert_eq!(notes(&cache), vec!["a", "b"]);

        // Its own page shows it in place once loaded
        load(&mut cache, 1, vec![run(7, "older run edited")]);
        assert_eq!(notes(&cache), vec!["a", "b", "older run edited"]);
    }

    #[test]
    fn test_merge_respects_filter() {
        let mut cache = CacheState::new(20);
        cache.set_filter(Some("tempo"));
        load(&mut cache, 0, vec![run(1, "tempo run")]);

        cache.merge_edited(run(1, "easy run"));
        cache.merge_added(run(2, "easy jog"));
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn test_stale_page_replays_later_confirmations() {
        let mut cache = CacheState::new(20);
        load(&mut cache, 0, vec![run(1, "a"), run(2, "b")]);

        // Server computes this page before the three mutations commit
        let ticket = cache.begin_fetch(0);
        let stale = vec![run(1, "a"), run(2, "b")];

        cache.merge_edited(run(1, "x"));
        cache.remove_confirmed(RunId::Legacy(2));
        cache.merge_added(run(0, "buy milk"));
        assert_eq!(notes(&cache), vec!["buy milk", "x"]);

        assert!(cache.apply_page(ticket, stale));
        assert_eq!(notes(&cache), vec!["buy milk", "x"]);
    }

    #[test]
    fn test_older_response_does_not_replace_newer() {
        let mut cache = CacheState::new(20);
        load(&mut cache, 0, vec![run(1, "a")]);

        let old = cache.begin_fetch(0);
        cache.merge_edited(run(1, "x"));
        // Issued after the edit; the server has since changed it again
        let fresh = cache.begin_fetch(0);

        assert!(cache.apply_page(fresh, vec![run(1, "y")]));
        assert_eq!(notes(&cache), vec!["y"]);
        assert!(!cache.apply_page(old, vec![run(1, "a")]));
        assert_eq!(notes(&cache), vec!["y"]);
        assert_eq!(cache.fetches_in_flight(), 0);
    }

    #[test]
    fn test_replay_log_released_with_last_fetch() {
        let mut cache = CacheState::new(20);
        cache.merge_added(run(1, "no fetch in flight"));
        assert!(cache.confirmed.is_empty());

        let first = cache.begin_fetch(0);
        cache.merge_edited(run(1, "x"));
        let second = cache.begin_fetch(1);
        cache.merge_edited(run(1, "y"));
        assert_eq!(cache.confirmed.len(), 2);
        assert_eq!(cache.fetches_in_flight(), 2);

        assert!(cache.record_load_error(first, "Failed to load".into()));
        assert_eq!(cache.confirmed.len(), 1);

        cache.abandon_fetch(second);
        assert!(cache.confirmed.is_empty());
        assert_eq!(cache.fetches_in_flight(), 0);
    }
}
