#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use metron_server::app::build_http_app;
use metron_server::state::AppState;
use metron_storage::memory::MemoryStore;
use metron_storage::AggregateStore;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

pub struct TestContext {
    pub app: axum::Router,
    pub store: Arc<dyn AggregateStore>,
}

pub fn build_test_context() -> TestContext {
    build_context_with(Arc::new(MemoryStore::new()), "memory")
}

pub fn build_context_with(store: Arc<dyn AggregateStore>, backend: &'static str) -> TestContext {
    let app = build_http_app(AppState::new(store.clone(), backend));
    TestContext { app, store }
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };
    (status, json, trace_id)
}

pub async fn request_json(app: &axum::Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value, Option<String>) {
    request_raw(app, method, uri, body.to_string()).await
}

pub async fn request_raw(app: &axum::Router, method: &str, uri: &str, body: impl Into<String>) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.into()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}
