//! # runlog-api
//!
//! HTTP surface for the run log: list, create, edit, and delete runs, with
//! per-client fixed-window limiting on the mutating routes.
//!
//! The router is built here so integration tests can drive it with
//! `tower::ServiceExt::oneshot`; `main.rs` only wires configuration,
//! logging, and the store.

pub mod config;
pub mod error;
pub mod handlers;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::warn;
use uuid::Uuid;

use runlog_core::defaults::{CORS_MAX_AGE_SECS, MAX_BODY_SIZE_BYTES};
use runlog_core::RunRepository;

pub use config::{ApiConfig, LogConfig, StoreKind};
pub use error::ApiError;
pub use rate_limit::{Admission, RateLimitConfig, RateLimiter};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// `None` when no store is configured; run routes then answer 500.
    pub runs: Option<Arc<dyn RunRepository>>,
    pub limiter: Arc<RateLimiter>,
    pub trust_proxy: bool,
}

impl AppState {
    pub fn new(runs: Option<Arc<dyn RunRepository>>, limiter: RateLimiter) -> Self {
        Self {
            runs,
            limiter: Arc::new(limiter),
            trust_proxy: false,
        }
    }

    pub fn with_trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    /// The configured store, or the "DB not configured" error.
    pub fn store(&self) -> Result<&dyn RunRepository, ApiError> {
        self.runs.as_deref().ok_or_else(|| {
            ApiError::Store(runlog_core::Error::Unavailable(
                "DB not configured".to_string(),
            ))
        })
    }
}

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Turn configured origin strings into header values, dropping invalid ones.
pub fn parse_allowed_origins(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter_map(|s| match s.trim().parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Invalid CORS origin '{}': {}", s, e);
                None
            }
        })
        .collect()
}

fn cors_layer(allowed_origins: Vec<HeaderValue>) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
        Method::HEAD,
    ];
    let headers = [header::CONTENT_TYPE, header::ACCEPT];
    let max_age = Duration::from_secs(CORS_MAX_AGE_SECS);

    if allowed_origins.is_empty() {
        // Credentials cannot be combined with a wildcard origin
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(max_age)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed_origins))
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(true)
            .max_age(max_age)
    }
}

/// Build the application router.
///
/// An empty `allowed_origins` accepts any origin.
pub fn router(state: AppState, allowed_origins: Vec<HeaderValue>) -> Router {
    use handlers::{health, runs};

    Router::new()
        .route("/ping", get(health::ping))
        .route("/rate-limit/status", get(health::rate_limit_status))
        .route("/runs", get(runs::list_runs).post(runs::create_run))
        .route(
            "/runs/:id",
            get(runs::get_run)
                .patch(runs::update_run)
                .delete(runs::delete_run),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(cors_layer(allowed_origins))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE_BYTES))
        .with_state(state)
}
