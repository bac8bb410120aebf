//! Domain models for runlog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults::NOTE_MAX_CHARS;
use crate::error::{Error, Result};
use crate::identifier::RunId;

/// A persisted run record.
///
/// `id` and `created_at` are assigned by the store on insert and never change.
/// Listing order is `created_at` descending, then `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub created_at: DateTime<Utc>,
    pub note: String,
}

impl Run {
    /// Case-insensitive substring match against the note.
    pub fn matches_filter(&self, filter: Option<&str>) -> bool {
        note_matches_filter(&self.note, filter)
    }
}

/// Case-insensitive substring match used for `?q=` filtering.
///
/// `None` matches everything.
pub fn note_matches_filter(note: &str, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(f) => note.to_lowercase().contains(&f.to_lowercase()),
    }
}

/// Validate and normalize a note.
///
/// Returns the trimmed note, which must be non-empty and at most
/// [`NOTE_MAX_CHARS`] characters.
pub fn validate_note(raw: &str) -> Result<String> {
    let note = raw.trim();
    if note.is_empty() {
        return Err(Error::InvalidInput("note is required".to_string()));
    }
    if note.chars().count() > NOTE_MAX_CHARS {
        return Err(Error::InvalidInput(format!(
            "note too long (max {} characters)",
            NOTE_MAX_CHARS
        )));
    }
    Ok(note.to_string())
}
