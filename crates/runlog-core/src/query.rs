//! List query planning for `GET /runs`.
//!
//! Turns raw `limit`/`offset`/`q` parameters into a validated window over the
//! record set, and decides from a returned page whether another page may exist.

use serde::{Deserialize, Serialize};

use crate::defaults::{FILTER_MAX_CHARS, PAGE_LIMIT, PAGE_LIMIT_MAX, PAGE_LIMIT_MIN, PAGE_OFFSET};
use crate::error::{Error, Result};

/// A validated list window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRunsQuery {
    /// Page size, in `[1, 100]`.
    pub limit: i64,
    /// Rows to skip, `>= 0`.
    pub offset: i64,
    /// Case-insensitive substring filter on `note`; never empty.
    pub filter: Option<String>,
}

impl Default for ListRunsQuery {
    fn default() -> Self {
        Self {
            limit: PAGE_LIMIT,
            offset: PAGE_OFFSET,
            filter: None,
        }
    }
}

impl ListRunsQuery {
    /// Plan a query from raw request parameters.
    ///
    /// Absent (or blank) numeric parameters take their defaults. Present ones
    /// must be decimal integers within range, otherwise the error names the
    /// offending field.
    pub fn plan(limit: Option<&str>, offset: Option<&str>, filter: Option<&str>) -> Result<Self> {
        let limit = match parse_integer("limit", limit)? {
            None => PAGE_LIMIT,
            Some(n) if (PAGE_LIMIT_MIN..=PAGE_LIMIT_MAX).contains(&n) => n,
            Some(_) => {
                return Err(Error::InvalidInput(format!(
                    "limit must be between {} and {}",
                    PAGE_LIMIT_MIN, PAGE_LIMIT_MAX
                )))
            }
        };

        let offset = match parse_integer("offset", offset)? {
            None => PAGE_OFFSET,
            Some(n) if n >= 0 => n,
            Some(_) => return Err(Error::InvalidInput("offset must be >= 0".to_string())),
        };

        Ok(Self {
            limit,
            offset,
            filter: normalize_filter(filter),
        })
    }

    /// Query for page `index` of a `limit`-sized pagination.
    pub fn page(index: usize, limit: i64, filter: Option<&str>) -> Self {
        Self {
            limit,
            offset: index as i64 * limit,
            filter: normalize_filter(filter),
        }
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Whether a page of `len` rows returned for this query may have a successor.
    pub fn has_more(&self, len: usize) -> bool {
        has_more(len, self.limit)
    }
}

fn parse_integer(field: &str, raw: Option<&str>) -> Result<Option<i64>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<i64>()
        .map(Some)
        .map_err(|_| Error::InvalidInput(format!("{} must be an integer", field)))
}

/// Trim a raw filter, cap it at [`FILTER_MAX_CHARS`], and drop it if empty.
pub fn normalize_filter(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(FILTER_MAX_CHARS).collect())
}

/// Page-length heuristic: a full page may have a successor, a short one ends the data.
///
/// When the total is an exact multiple of `limit` this costs one extra empty fetch.
pub fn has_more(len: usize, limit: i64) -> bool {
    limit > 0 && len as i64 == limit
}
