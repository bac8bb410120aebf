//! Run identifier classification.
//!
//! A run is addressed by one of two formats, recovered purely from the text:
//!
//! - **modern**: canonical hyphenated UUID, version nibble 1-5, variant nibble 8/9/a/b
//! - **legacy**: a non-negative decimal integer from the earlier integer-keyed table
//!
//! Storage dispatches on the variant to pick the column it matches against,
//! so callers never sniff the string themselves.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{Error, Result};

static MODERN_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("modern id pattern is valid")
});

/// Identifier of a persisted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunId {
    /// Random 128-bit identifier (rendered as a hyphenated UUID).
    Modern(Uuid),
    /// Integer identifier kept for rows created before the UUID migration.
    Legacy(i64),
}

impl RunId {
    /// Classify a raw identifier, trimming surrounding whitespace first.
    ///
    /// Must run before any store lookup that uses the identifier.
    pub fn classify(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();

        if MODERN_ID_RE.is_match(trimmed) {
            let uuid = Uuid::parse_str(trimmed).map_err(|_| bad_id())?;
            return Ok(RunId::Modern(uuid));
        }

        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            // All-digit strings beyond i64 cannot exist in the store.
            let value = trimmed.parse::<i64>().map_err(|_| bad_id())?;
            return Ok(RunId::Legacy(value));
        }

        Err(bad_id())
    }

    /// Short name of the identifier format, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RunId::Modern(_) => "modern",
            RunId::Legacy(_) => "legacy",
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, RunId::Legacy(_))
    }
}

fn bad_id() -> Error {
    Error::InvalidInput("bad id".to_string())
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunId::Modern(uuid) => write!(f, "{}", uuid.hyphenated()),
            RunId::Legacy(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RunId::classify(s)
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        RunId::Modern(uuid)
    }
}

/// Modern ids serialize as strings, legacy ids as JSON numbers.
impl Serialize for RunId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            RunId::Modern(uuid) => serializer.collect_str(&uuid.hyphenated()),
            RunId::Legacy(n) => serializer.serialize_i64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for RunId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RunIdVisitor;

        impl<'de> Visitor<'de> for RunIdVisitor {
            type Value = RunId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a UUID string or a non-negative integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<RunId, E> {
                RunId::classify(v).map_err(|_| E::custom(format!("bad id: {:?}", v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<RunId, E> {
                i64::try_from(v)
                    .map(RunId::Legacy)
                    .map_err(|_| E::custom("legacy id out of range"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<RunId, E> {
                if v < 0 {
                    return Err(E::custom("legacy id must be non-negative"));
                }
                Ok(RunId::Legacy(v))
            }
        }

        deserializer.deserialize_any(RunIdVisitor)
    }
}
