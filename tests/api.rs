//! End-to-end tests of the HTTP surface against an in-memory store and a
//! scripted gateway.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use gatetally::analytics::AnalyticsCache;
use gatetally::config::Config;
use gatetally::db::Database;
use gatetally::gateway::{Gateway, GatewayError, GatewayModel, GatewayRequest, GatewayResponse};
use gatetally::usage::{SqliteUsageStore, UsageRecorder};
use gatetally::{AppState, build_app};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Answers every prompt with its reverse, or fails every call. `cost` is
/// what the gateway reports for a successful call.
struct ScriptedGateway {
    fail: bool,
    cost: Option<f64>,
    calls: AtomicUsize,
}

impl Gateway for ScriptedGateway {
    fn chat(
        &self,
        request: &GatewayRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayResponse, GatewayError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.prompt.clone();
        let model = request.model.clone();
        let fail = self.fail;
        let cost = self.cost;
        Box::pin(async move {
            if fail {
                return Err(GatewayError::Api {
                    status: 503,
                    message: "upstream unavailable".to_string(),
                });
            }
            Ok(GatewayResponse {
                text: Some(prompt.chars().rev().collect()),
                model,
                prompt_tokens: 12,
                completion_tokens: 8,
                cost,
            })
        })
    }

    fn list_models(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GatewayModel>, GatewayError>> + Send + '_>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    gateway: Arc<ScriptedGateway>,
}

fn test_app(fail: bool) -> TestApp {
    test_app_with_cost(fail, Some(0.0015))
}

fn test_app_with_cost(fail: bool, cost: Option<f64>) -> TestApp {
    let mut config = Config::default();
    config.gateway.discover_models = false;
    config.logging.log_content = true;

    let db = Database::open_in_memory().unwrap();
    let store = Arc::new(SqliteUsageStore::new(db));
    let cache = Arc::new(AnalyticsCache::new(Duration::from_secs(300)));
    let recorder = UsageRecorder::new(store, cache.clone());
    let gateway = Arc::new(ScriptedGateway {
        fail,
        cost,
        calls: AtomicUsize::new(0),
    });

    let state = AppState::new(config, recorder, gateway.clone(), cache);
    TestApp {
        router: build_app(state.clone()),
        state,
        gateway,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn get_json(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: &TestApp, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn usage(model: &str, provider: &str, user: &str, latency_ms: i64, timestamp: &str) -> Value {
    json!({
        "model": model,
        "provider": provider,
        "user": user,
        "prompt_tokens": 100,
        "completion_tokens": 50,
        "cost": 0.01,
        "latency_ms": latency_ms,
        "timestamp": timestamp,
    })
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_chat_success_records_usage() {
    let app = test_app(false);

    let (status, reply) = post_json(
        &app,
        "/api/chat",
        json!({ "model": "gpt-4", "prompt": "hello", "user": "alice" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["response"], "olleh");
    assert_eq!(reply["provider"], "openai");
    assert_eq!(reply["prompt_tokens"], 12);
    assert_eq!(reply["completion_tokens"], 8);
    assert_eq!(reply["cost"], 0.0015);
    assert_eq!(app.gateway.calls.load(Ordering::SeqCst), 1);

    let id = reply["id"].as_str().unwrap();
    let (status, record) = get_json(&app, &format!("/api/usage/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["model"], "gpt-4");
    assert_eq!(record["user"], "alice");
    assert_eq!(record["status"], "success");
    assert_eq!(record["prompt"], "hello");
    assert_eq!(record["response"], "olleh");
}

#[tokio::test]
async fn test_chat_prices_tokens_when_gateway_reports_no_cost() {
    let app = test_app_with_cost(false, None);

    let (status, reply) = post_json(
        &app,
        "/api/chat",
        json!({ "model": "gpt-4", "prompt": "hello" }),
    )
    .await;

    // 20 tokens at the default flat rate of $0.002 per 1k.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["cost"], 0.00004);

    let id = reply["id"].as_str().unwrap();
    let (status, record) = get_json(&app, &format!("/api/usage/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["cost"], 0.00004);
}

#[tokio::test]
async fn test_chat_failure_returns_502_and_records_error() {
    let app = test_app(true);

    let (status, reply) = post_json(
        &app,
        "/api/chat",
        json!({ "model": "claude-3-opus-20240229", "prompt": "hello" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["provider"], "anthropic");
    assert!(reply["response"].as_str().unwrap().starts_with("Error: "));
    assert_eq!(reply["cost"], 0.0);

    let (_, list) = get_json(&app, "/api/usage?status=error").await;
    assert_eq!(list["total"], 1);
    let record = &list["data"][0];
    assert_eq!(record["prompt_tokens"], 0);
    assert!(
        record["error_message"]
            .as_str()
            .unwrap()
            .contains("upstream unavailable")
    );
}

#[tokio::test]
async fn test_chat_rejects_empty_prompt_without_calling_gateway() {
    let app = test_app(false);

    let (status, body) = post_json(&app, "/api/chat", json!({ "prompt": "   " })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].is_string());
    assert_eq!(app.gateway.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_chat_defaults_model() {
    let app = test_app(false);

    let (status, reply) = post_json(&app, "/api/chat", json!({ "prompt": "hi" })).await;

    assert_eq!(status, StatusCode::OK);
    let first = app.state.catalog.configured()[0].id.clone();
    assert_eq!(reply["model"], first);
}

// ---------------------------------------------------------------------------
// Usage records
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ingest_usage() {
    let app = test_app(false);

    let (status, record) = post_json(
        &app,
        "/api/usage",
        usage("gpt-4", "openai", "bob", 250, "2025-06-01T10:00:00Z"),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(record["status"], "success");
    assert_eq!(record["latency_ms"], 250);
    assert!(record["id"].is_string());
}

#[tokio::test]
async fn test_ingest_rejects_invalid_metadata() {
    let app = test_app(false);

    let mut draft = usage("gpt-4", "openai", "bob", 250, "2025-06-01T10:00:00Z");
    draft["prompt_tokens"] = json!(-5);
    let (status, _) = post_json(&app, "/api/usage", draft).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(&app, "/api/usage", json!({ "provider": "openai" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, list) = get_json(&app, "/api/usage").await;
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn test_get_usage_not_found_and_bad_id() {
    let app = test_app(false);

    let (status, _) = get_json(&app, "/api/usage/00000000-0000-0000-0000-000000000000").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, "/api/usage/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_usage_pages_newest_first() {
    let app = test_app(false);
    for hour in 0..5 {
        let ts = format!("2025-06-01T0{hour}:00:00Z");
        let (status, _) = post_json(&app, "/api/usage", usage("gpt-4", "openai", "a", 100, &ts)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, page) = get_json(&app, "/api/usage?page=1&per_page=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 5);
    assert_eq!(page["data"].as_array().unwrap().len(), 2);
    assert!(page["data"][0]["timestamp"].as_str().unwrap().starts_with("2025-06-01T04"));

    let (_, last) = get_json(&app, "/api/usage?page=3&per_page=2").await;
    assert_eq!(last["data"].as_array().unwrap().len(), 1);
    assert!(last["data"][0]["timestamp"].as_str().unwrap().starts_with("2025-06-01T00"));

    let (_, bounded) = get_json(&app, "/api/usage?from=2025-06-01T01:00:00Z&to=2025-06-01T03:00:00Z").await;
    assert_eq!(bounded["total"], 2);

    let (status, _) = get_json(&app, "/api/usage?from=2025-06-02&to=2025-06-01").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_export_csv() {
    let app = test_app(false);
    post_json(&app, "/api/usage", usage("gpt-4", "openai", "carol", 100, "2025-06-01T10:00:00Z")).await;

    let request = Request::builder()
        .uri("/api/usage/export.csv")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv")
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let csv = String::from_utf8(body.to_vec()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("timestamp,user,model,provider,status"));
    assert!(lines[1].starts_with("2025-06-01T10:00:00.000000Z,carol,gpt-4,openai,success,100,50"));
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

async fn seed_analytics(app: &TestApp) {
    let rows = [
        usage("gpt-x", "openai", "alice", 100, "2025-06-01T10:05:00Z"),
        usage("gpt-x", "openai", "alice", 200, "2025-06-01T10:20:00Z"),
        usage("gpt-x", "openai", "bob", 300, "2025-06-01T11:40:00Z"),
        usage("claude-y", "anthropic", "bob", 400, "2025-06-02T09:00:00Z"),
    ];
    for row in rows {
        let (status, _) = post_json(app, "/api/usage", row).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, _) = post_json(
        app,
        "/api/usage",
        json!({
            "model": "gpt-x",
            "provider": "openai",
            "error": "timeout",
            "timestamp": "2025-06-01T10:30:00Z",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_analytics_summary() {
    let app = test_app(false);
    seed_analytics(&app).await;

    let (status, summary) = get_json(&app, "/api/analytics/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_requests"], 5);
    assert_eq!(summary["success_count"], 4);
    assert_eq!(summary["error_count"], 1);
    assert_eq!(summary["total_tokens"], 600);
    assert_eq!(summary["avg_latency_ms"], 250.0);
    // the failed call has no user and is not counted
    assert_eq!(summary["unique_users"], 2);
}

#[tokio::test]
async fn test_analytics_buckets_by_model_and_day() {
    let app = test_app(false);
    seed_analytics(&app).await;

    let (status, body) = get_json(
        &app,
        "/api/analytics/buckets?group_by=model&granularity=day&provider=openai",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["group_by"], "model");
    assert_eq!(body["granularity"], "day");

    let buckets = body["buckets"].as_array().unwrap();
    assert_eq!(buckets.len(), 1);
    let b = &buckets[0];
    assert_eq!(b["model"], "gpt-x");
    assert!(b["provider"].is_null());
    assert_eq!(b["request_count"], 4);
    assert_eq!(b["error_count"], 1);
    assert_eq!(b["latency"]["samples"], 3);
    assert_eq!(b["latency"]["p50_ms"], 200);
    assert_eq!(b["latency"]["max_ms"], 300);
    assert!(b["window_start"].as_str().unwrap().starts_with("2025-06-01T00:00:00"));
}

#[tokio::test]
async fn test_analytics_buckets_hourly() {
    let app = test_app(false);
    seed_analytics(&app).await;

    let (_, body) = get_json(
        &app,
        "/api/analytics/buckets?group_by=none&granularity=hour&to=2025-06-02",
    )
    .await;
    let counts: Vec<u64> = body["buckets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["request_count"].as_u64().unwrap())
        .collect();
    assert_eq!(counts, vec![3, 1]);
}

#[tokio::test]
async fn test_analytics_rejects_unknown_grouping() {
    let app = test_app(false);

    let (status, _) = get_json(&app, "/api/analytics/buckets?group_by=planet").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(&app, "/api/analytics/summary?status=maybe").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analytics_users() {
    let app = test_app(false);
    seed_analytics(&app).await;

    let (status, body) = get_json(&app, "/api/analytics/users?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let users = body["users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0]["user"], "alice");
    assert_eq!(users[0]["requests"], 2);
    assert_eq!(users[1]["user"], "bob");
}

#[tokio::test]
async fn test_writes_invalidate_cached_analytics() {
    let app = test_app(false);

    let (_, before) = get_json(&app, "/api/analytics/summary").await;
    assert_eq!(before["total_requests"], 0);
    assert!(!app.state.analytics_cache.is_empty());

    post_json(&app, "/api/chat", json!({ "model": "gpt-4", "prompt": "hi" })).await;

    let (_, after) = get_json(&app, "/api/analytics/summary").await;
    assert_eq!(after["total_requests"], 1);
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health() {
    let app = test_app(false);
    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_models_lists_configured() {
    let app = test_app(false);
    let (status, body) = get_json(&app, "/api/models").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "list");
    let gpt4 = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["id"] == "gpt-4")
        .unwrap();
    assert_eq!(gpt4["provider"], "openai");
}

#[tokio::test]
async fn test_dashboard_renders() {
    let app = test_app(false);
    seed_analytics(&app).await;

    let request = Request::builder()
        .uri("/ui/dashboard")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("Usage Analytics"));
    assert!(html.contains("gpt-x"));
    assert!(html.contains("claude-y"));

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
}
