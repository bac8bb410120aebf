//! # runlog-core
//!
//! Core types, traits, and validation rules for runlog.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the storage, HTTP, and client crates depend on.

pub mod api_types;
pub mod defaults;
pub mod error;
pub mod identifier;
pub mod models;
pub mod query;
pub mod traits;

// Re-export commonly used types at crate root
pub use api_types::{ErrorResponse, NoteBody, PingResponse, RunResponse, RunsResponse};
pub use error::{Error, Result};
pub use identifier::RunId;
pub use models::{validate_note, Run};
pub use query::{has_more, ListRunsQuery};
pub use traits::RunRepository;
