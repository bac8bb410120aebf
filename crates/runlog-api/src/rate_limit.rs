//! Per-client fixed-window rate limiting for mutating requests.
//!
//! Each client key owns one bucket `{count, window_reset_at}`. The first
//! mutating request opens a window of `window` length; up to `max` requests
//! are admitted inside it, later ones are rejected with the seconds left
//! until the window resets. Reads and health checks never reach the limiter.
//!
//! All buckets sit behind one mutex, so the read-check-increment of a single
//! admission is atomic with respect to concurrent requests from the same key.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use runlog_core::defaults::{
    RATE_LIMIT_MAX, RATE_LIMIT_MAX_WINDOW_SECS, RATE_LIMIT_PRUNE_THRESHOLD, RATE_LIMIT_WINDOW_SECS,
};

use crate::error::ApiError;
use crate::AppState;

/// Limiter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window: Duration,
    pub max: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            max: RATE_LIMIT_MAX,
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected { retry_after_secs: u64 },
}

#[derive(Debug, Clone, Copy)]
struct RateBucket {
    count: u32,
    window_reset_at: Instant,
}

#[derive(Debug, Default)]
struct BucketMap {
    buckets: HashMap<String, RateBucket>,
    /// Size the map must reach before the next prune scan.
    next_prune_at: usize,
    prunes: u64,
}

impl BucketMap {
    /// Prune once the map reaches the threshold, then again only after it
    /// has doubled from what the previous scan left behind.
    fn maybe_prune(&mut self, now: Instant) {
        let due = self.next_prune_at.max(RATE_LIMIT_PRUNE_THRESHOLD);
        if self.buckets.len() < due {
            return;
        }
        prune_expired(&mut self.buckets, now);
        self.prunes += 1;
        self.next_prune_at = self.buckets.len().saturating_mul(2);
    }
}

/// Keyed fixed-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<BucketMap>,
}

impl RateLimiter {
    /// Windows longer than [`RATE_LIMIT_MAX_WINDOW_SECS`] are clamped.
    pub fn new(mut config: RateLimitConfig) -> Self {
        config.window = config
            .window
            .min(Duration::from_secs(RATE_LIMIT_MAX_WINDOW_SECS));
        Self {
            config,
            buckets: Mutex::new(BucketMap::default()),
        }
    }

    /// A limiter that admits everything.
    pub fn disabled() -> Self {
        Self::new(RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or reject one mutating request from `key` at `now`.
    pub fn admit(&self, key: &str, now: Instant) -> Admission {
        if !self.config.enabled {
            return Admission::Admitted;
        }

        let mut guard = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.buckets.contains_key(key) {
            guard.maybe_prune(now);
        }
        let buckets = &mut guard.buckets;

        let fresh = RateBucket {
            count: 1,
            window_reset_at: now + self.config.window,
        };

        match buckets.get_mut(key) {
            None => {
                buckets.insert(key.to_string(), fresh);
                Admission::Admitted
            }
            Some(bucket) if now >= bucket.window_reset_at => {
                *bucket = fresh;
                Admission::Admitted
            }
            Some(bucket) if bucket.count < self.config.max => {
                bucket.count += 1;
                Admission::Admitted
            }
            Some(bucket) => Admission::Rejected {
                retry_after_secs: retry_after_secs(bucket.window_reset_at, now),
            },
        }
    }

    /// Admit against the current time.
    pub fn check(&self, key: &str) -> Admission {
        self.admit(key, Instant::now())
    }

    /// Number of tracked client keys.
    pub fn bucket_count(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .buckets
            .len()
    }
}

/// Whole seconds until `reset_at`, rounded up and never below one.
fn retry_after_secs(reset_at: Instant, now: Instant) -> u64 {
    let remaining = reset_at.saturating_duration_since(now);
    let secs = remaining.as_nanos().div_ceil(1_000_000_000);
    u64::try_from(secs).unwrap_or(u64::MAX).max(1)
}

/// Expired buckets behave as absent, so dropping them changes no decision.
fn prune_expired(buckets: &mut HashMap<String, RateBucket>, now: Instant) {
    let before = buckets.len();
    buckets.retain(|_, b| now < b.window_reset_at);
    debug!(
        subsystem = "api",
        component = "rate_limit",
        op = "prune",
        removed = before - buckets.len(),
        remaining = buckets.len(),
        "Pruned expired rate buckets"
    );
}

/// Create, update, and delete verbs are subject to admission.
pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Identify the caller: first `X-Forwarded-For` hop when the proxy is
/// trusted, else the peer address.
pub fn client_key(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Admission middleware; non-mutating requests pass straight through.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !is_mutating(request.method()) {
        return next.run(request).await;
    }

    let key = client_key(&request, state.trust_proxy);
    match state.limiter.check(&key) {
        Admission::Admitted => next.run(request).await,
        Admission::Rejected { retry_after_secs } => {
            warn!(
                subsystem = "api",
                component = "rate_limit",
                client_key = %key,
                method = %request.method(),
                path = request.uri().path(),
                retry_after_secs,
                "Rate limit exceeded"
            );
            ApiError::RateLimited { retry_after_secs }.into_response()
        }
    }
}
