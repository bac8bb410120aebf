//! HTTP behavior tests for the runs API.
//!
//! Drive the full router (middleware included) with `oneshot` against the
//! in-memory store; no database or socket is required.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use runlog_api::{router, AppState, RateLimitConfig, RateLimiter};
use runlog_core::RunRepository;
use runlog_db::InMemoryRunRepository;

struct TestApp {
    router: Router,
    store: Arc<InMemoryRunRepository>,
}

impl TestApp {
    fn new() -> Self {
        Self::with_limiter(RateLimiter::disabled())
    }

    fn with_limiter(limiter: RateLimiter) -> Self {
        let store = Arc::new(InMemoryRunRepository::new());
        let runs: Arc<dyn RunRepository> = store.clone();
        let state = AppState::new(Some(runs), limiter);
        Self {
            router: router(state, Vec::new()),
            store,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let (status, _, body) = self.send(request).await;
        (status, body)
    }

    async fn json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, HeaderMap, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::delete(uri).body(Body::empty()).unwrap();
        let (status, _, body) = self.send(request).await;
        (status, body)
    }
}

fn limiter(max: u32) -> RateLimiter {
    RateLimiter::new(RateLimitConfig {
        enabled: true,
        window: Duration::from_secs(60),
        max,
    })
}

#[tokio::test]
async fn test_create_then_fetch_round_trip() {
    let app = TestApp::new();

    let (status, _, body) = app.json("POST", "/runs", json!({"note": "  tempo 8k  "})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ok"], true);
    assert_eq!(body["run"]["note"], "tempo 8k");
    let id = body["run"]["id"].as_str().unwrap().to_string();

    let (status, body) = app.get(&format!("/runs/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run"]["id"], id.as_str());
    assert_eq!(body["run"]["note"], "tempo 8k");
}

#[tokio::test]
async fn test_list_newest_first_with_filter() {
    let app = TestApp::new();
    for note in ["easy jog", "Hill repeats", "long run"] {
        app.json("POST", "/runs", json!({ "note": note })).await;
    }

    let (status, body) = app.get("/runs").await;
    assert_eq!(status, StatusCode::OK);
    let notes: Vec<&str> = body["runs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["note"].as_str().unwrap())
        .collect();
    assert_eq!(notes, vec!["long run", "Hill repeats", "easy jog"]);

    let (_, body) = app.get("/runs?q=HILL&limit=5").await;
    assert_eq!(body["runs"].as_array().unwrap().len(), 1);

    let (_, body) = app.get("/runs?limit=1&offset=2").await;
    assert_eq!(body["runs"][0]["note"], "easy jog");
}

#[tokio::test]
async fn test_list_rejects_bad_pagination() {
    let app = TestApp::new();
    for uri in [
        "/runs?limit=0",
        "/runs?limit=101",
        "/runs?limit=abc",
        "/runs?offset=-1",
        "/runs?offset=1.5",
    ] {
        let (status, body) = app.get(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["ok"], false);
    }
}

#[tokio::test]
async fn test_note_validation() {
    let app = TestApp::new();

    let (status, _, body) = app.json("POST", "/runs", json!({"note": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "note is required");

    let (status, _, _) = app.json("POST", "/runs", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = app
        .json("POST", "/runs", json!({"note": "x".repeat(501)}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "note too long (max 500 characters)");

    let (status, _, _) = app
        .json("POST", "/runs", json!({"note": "é".repeat(500)}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_bad_id_is_rejected_before_store() {
    let app = TestApp::new();
    app.store.set_failing(true).await;

    for id in ["abc", "-1", "00000000-0000-0000-0000-00000000000", "123e4567-e89b-62d3-a456-426614174000"] {
        let (status, body) = app.get(&format!("/runs/{}", id)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", id);
        assert_eq!(body["error"], "bad id");

        let (status, _, _) = app
            .json("PATCH", &format!("/runs/{}", id), json!({"note": "x"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app.delete(&format!("/runs/{}", id)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_missing_runs_are_not_found() {
    let app = TestApp::new();
    let id = uuid::Uuid::new_v4();

    let (status, body) = app.get(&format!("/runs/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"ok": false, "error": "not found"}));

    let (status, _, _) = app
        .json("PATCH", &format!("/runs/{}", id), json!({"note": "x"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.delete("/runs/42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_and_delete_legacy_run() {
    let app = TestApp::new();
    app.store.seed_legacy(7, "track session").await;

    let (status, _, body) = app
        .json("PATCH", "/runs/7", json!({"note": "track 6x800"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run"]["id"], 7);
    assert_eq!(body["run"]["note"], "track 6x800");

    let (status, body) = app.delete("/runs/7").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
    assert!(app.store.is_empty().await);
}

#[tokio::test]
async fn test_form_encoded_body() {
    let app = TestApp::new();
    let request = Request::post("/runs")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("note=recovery+jog"))
        .unwrap();
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["run"]["note"], "recovery jog");
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = TestApp::new();
    let request = Request::post("/runs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"note\":"))
        .unwrap();
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let app = TestApp::new();
    let note = "x".repeat(32 * 1024);
    let (status, _, body) = app.json("POST", "/runs", json!({ "note": note })).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn test_rate_limit_rejects_after_max() {
    let app = TestApp::with_limiter(limiter(3));

    for i in 0..3 {
        let (status, _, _) = app
            .json("POST", "/runs", json!({ "note": format!("run {}", i) }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, headers, body) = app.json("POST", "/runs", json!({"note": "one more"})).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(body["retry_after"], retry_after);
    assert_eq!(app.store.len().await, 3);

    // Deletes share the same budget
    let (status, _) = app.delete("/runs/1").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_reads_bypass_rate_limit() {
    let app = TestApp::with_limiter(limiter(1));
    app.json("POST", "/runs", json!({"note": "only one"})).await;
    let (status, _, _) = app.json("POST", "/runs", json!({"note": "blocked"})).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    for _ in 0..10 {
        let (status, _) = app.get("/runs").await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = app.get("/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "pong");
}

#[tokio::test]
async fn test_rate_limit_status() {
    let app = TestApp::with_limiter(limiter(5));
    let (status, body) = app.get("/rate-limit/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"enabled": true, "window_secs": 60, "max": 5}));
}

#[tokio::test]
async fn test_store_failure_is_server_error() {
    let app = TestApp::new();
    app.store.set_failing(true).await;

    let (status, body) = app.get("/runs").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"ok": false, "error": "internal server error"}));

    let (status, _, _) = app.json("POST", "/runs", json!({"note": "lost"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_unconfigured_store() {
    let app = router(AppState::new(None, RateLimiter::disabled()), Vec::new());
    let response = app
        .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({"ok": false, "error": "DB not configured"}));
}

#[tokio::test]
async fn test_request_id_header_present() {
    let app = TestApp::new();
    let request = Request::get("/runs").body(Body::empty()).unwrap();
    let (_, headers, _) = app.send(request).await;
    assert!(headers.contains_key("x-request-id"));
}
