//! # runlog-client
//!
//! Consumer side of the runs API:
//!
//! - [`RunsApi`] / [`HttpRunsApi`]: typed transport over HTTP
//! - [`CacheState`]: server-confirmed pages plus a pending-mutation overlay
//! - [`ReconciliationEngine`]: optimistic add/edit/delete with rollback,
//!   filter-aware pagination, and revalidation
//! - [`mock::MockRunsApi`]: in-memory transport for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use runlog_client::{HttpRunsApi, ReconciliationEngine};
//!
//! let api = Arc::new(HttpRunsApi::new("http://localhost:4000")?);
//! let engine = ReconciliationEngine::new(api);
//! engine.fetch_page(0).await?;
//!
//! // Visible immediately; confirmed or rolled back in the background
//! let confirmation = engine.submit(Mutation::Add { note: "easy 5k".into() })?;
//! ```

pub mod api;
pub mod cache;
pub mod error;
pub mod mock;
pub mod reconcile;

pub use api::{HttpRunsApi, RunsApi};
pub use cache::{CacheState, Entry, EntryId, FetchTicket, MutationId, PendingMutation};
pub use error::{ClientError, Result};
pub use reconcile::{Mutation, MutationOutcome, Notice, NoticeKind, ReconciliationEngine};
