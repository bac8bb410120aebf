//! Centralized default constants for runlog.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic numbers.

// =============================================================================
// RECORDS
// =============================================================================

/// Maximum note length in characters, measured after trimming.
pub const NOTE_MAX_CHARS: usize = 500;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for `GET /runs`.
pub const PAGE_LIMIT: i64 = 20;

/// Smallest accepted page size.
pub const PAGE_LIMIT_MIN: i64 = 1;

/// Largest accepted page size.
pub const PAGE_LIMIT_MAX: i64 = 100;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;

/// Search filters are capped to this many characters.
pub const FILTER_MAX_CHARS: usize = 200;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 4000;

/// Default rate limit: max mutating requests per window per client.
pub const RATE_LIMIT_MAX: u32 = 30;

/// Default rate limit: window length in seconds.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Longest accepted rate limit window (one day).
pub const RATE_LIMIT_MAX_WINDOW_SECS: u64 = 86_400;

/// Bucket count above which expired buckets are pruned during admission.
pub const RATE_LIMIT_PRUNE_THRESHOLD: usize = 4096;

/// Maximum request body size in bytes.
pub const MAX_BODY_SIZE_BYTES: usize = 16 * 1024;

/// Default CORS max-age in seconds (1 hour).
pub const CORS_MAX_AGE_SECS: u64 = 3600;
