//! HTTP handlers for runlog-api.

pub mod health;
pub mod runs;
