//! Server configuration from environment variables.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `HOST` | `0.0.0.0` | bind address |
//! | `PORT` | `4000` | bind port |
//! | `DATABASE_URL` | unset | PostgreSQL URL; run routes answer 500 without it |
//! | `DATABASE_REQUIRE_TLS` | `false` | force TLS on the database connection |
//! | `RUNLOG_STORE` | `postgres` | `memory` selects the in-process store |
//! | `ALLOWED_ORIGINS` | unset | comma-separated CORS whitelist; unset means any origin |
//! | `RATE_LIMIT_ENABLED` | `true` | toggle the mutating-request limiter |
//! | `RATE_LIMIT_WINDOW_SECS` | `60` | fixed window length, at most one day |
//! | `RATE_LIMIT_MAX` | `30` | mutating requests per window per client |
//! | `TRUST_PROXY` | `false` | key clients by first `X-Forwarded-For` hop |
//! | `LOG_FORMAT` | `text` | `json` or `text` |
//! | `LOG_FILE` | unset | daily-rotated log file instead of stdout |
//! | `LOG_ANSI` | auto | force ANSI colors on/off |

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use runlog_core::defaults::{
    RATE_LIMIT_MAX, RATE_LIMIT_MAX_WINDOW_SECS, RATE_LIMIT_WINDOW_SECS, SERVER_PORT,
};
use runlog_core::{Error, Result};

use crate::rate_limit::RateLimitConfig;

/// Which [`RunRepository`](runlog_core::RunRepository) backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

/// Logging output settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub json: bool,
    pub file: Option<String>,
    pub ansi: Option<bool>,
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub database_require_tls: bool,
    pub store: StoreKind,
    pub allowed_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub trust_proxy: bool,
    pub log: LogConfig,
}

impl ApiConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which returns a variable's value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store = match get("RUNLOG_STORE").as_deref() {
            None | Some("postgres") => StoreKind::Postgres,
            Some("memory") => StoreKind::Memory,
            Some(other) => {
                return Err(Error::Config(format!(
                    "RUNLOG_STORE must be 'postgres' or 'memory', got '{}'",
                    other
                )))
            }
        };

        let rate_limit = RateLimitConfig {
            enabled: get("RATE_LIMIT_ENABLED").map_or(true, |v| parse_bool(&v)),
            window: Duration::from_secs(parse_or(
                "RATE_LIMIT_WINDOW_SECS",
                get("RATE_LIMIT_WINDOW_SECS"),
                RATE_LIMIT_WINDOW_SECS,
            )),
            max: parse_or("RATE_LIMIT_MAX", get("RATE_LIMIT_MAX"), RATE_LIMIT_MAX),
        };
        if rate_limit.window.is_zero() {
            return Err(Error::Config("RATE_LIMIT_WINDOW_SECS must be > 0".into()));
        }
        if rate_limit.window > Duration::from_secs(RATE_LIMIT_MAX_WINDOW_SECS) {
            return Err(Error::Config(format!(
                "RATE_LIMIT_WINDOW_SECS must be <= {}",
                RATE_LIMIT_MAX_WINDOW_SECS
            )));
        }
        if rate_limit.max == 0 {
            return Err(Error::Config("RATE_LIMIT_MAX must be > 0".into()));
        }

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or("PORT", get("PORT"), SERVER_PORT),
            database_url: get("DATABASE_URL"),
            database_require_tls: get("DATABASE_REQUIRE_TLS").is_some_and(|v| parse_bool(&v)),
            store,
            allowed_origins: get("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            rate_limit,
            trust_proxy: get("TRUST_PROXY").is_some_and(|v| parse_bool(&v)),
            log: LogConfig {
                json: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
                file: get("LOG_FILE"),
                ansi: get("LOG_ANSI").map(|v| parse_bool(&v)),
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Parse `value`, falling back to `default` (with a warning) when it is malformed.
fn parse_or<T>(key: &str, value: Option<String>, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match value {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "Ignoring unparseable setting");
            default
        }),
    }
}
