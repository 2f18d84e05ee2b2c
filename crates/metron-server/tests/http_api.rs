mod common;

use axum::http::StatusCode;
use common::{build_context_with, build_test_context, request_json, request_no_body, request_raw};
use metron_storage::file::{FileStore, FileStoreConfig};
use metron_storage::AggregateStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn batch_ingest_folds_repeats_and_accumulates_counters() {
    let ctx = build_test_context();
    let batch = json!([
        {"id": "Alloc", "type": "gauge", "value": 1.5},
        {"id": "Alloc", "type": "gauge", "value": 2.5},
        {"id": "PollCount", "type": "counter", "delta": 3},
        {"id": "PollCount", "type": "counter", "delta": 4}
    ]);

    let (status, body, trace_id) = request_json(&ctx.app, "POST", "/updates/", batch.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["err_code"], 0);
    assert_eq!(body["data"], json!({"received": 4, "applied": 2}));
    assert_eq!(trace_id.as_deref(), body["trace_id"].as_str());

    request_json(&ctx.app, "POST", "/updates/", batch).await;
    assert_eq!(ctx.store.get_counter("PollCount").await.unwrap(), 14);
    assert_eq!(ctx.store.get_gauge("Alloc").await.unwrap(), 2.5);

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"gauges": {"Alloc": 2.5}, "counters": {"PollCount": 14}}));
}

#[tokio::test]
async fn invalid_batch_is_rejected_without_partial_writes() {
    let ctx = build_test_context();

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/updates/",
        json!([
            {"id": "PollCount", "type": "counter", "delta": 1},
            {"id": "Alloc", "type": "gauge", "delta": 1}
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["err_code"], 1001);
    assert!(ctx.store.get_metrics().await.unwrap().is_empty());

    let (status, body, _) = request_json(&ctx.app, "POST", "/updates/", json!([{"id": "", "type": "counter", "delta": 1}])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["err_msg"], "metric name is empty");

    let (status, _, _) = request_raw(&ctx.app, "POST", "/updates/", "[{\"id\":").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = request_json(&ctx.app, "POST", "/updates/", json!([{"id": "x", "type": "histogram", "value": 1}])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let ctx = build_test_context();
    let (status, body, _) = request_json(&ctx.app, "POST", "/updates/", json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["err_code"], 1104);
    assert_eq!(body["err_msg"], "no metrics found");
}

#[tokio::test]
async fn single_update_returns_current_value() {
    let ctx = build_test_context();
    request_json(&ctx.app, "POST", "/update/", json!({"id": "hits", "type": "counter", "delta": 2})).await;
    let (status, body, _) = request_json(&ctx.app, "POST", "/update/", json!({"id": "hits", "type": "counter", "delta": 5})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"id": "hits", "type": "counter", "delta": 7}));
}

#[tokio::test]
async fn path_update_parses_value_by_kind() {
    let ctx = build_test_context();

    let (status, body, _) = request_no_body(&ctx.app, "POST", "/update/gauge/Alloc/12.75").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"id": "Alloc", "type": "gauge", "value": 12.75}));

    request_no_body(&ctx.app, "POST", "/update/counter/hits/4").await;
    let (status, body, _) = request_no_body(&ctx.app, "POST", "/update/counter/hits/6").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["delta"], 10);

    for uri in [
        "/update/counter/hits/2.5",
        "/update/gauge/Alloc/abc",
        "/update/gauge/Alloc/NaN",
        "/update/histogram/Alloc/1",
    ] {
        let (status, body, _) = request_no_body(&ctx.app, "POST", uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["err_code"], 1001, "{uri}");
    }
    assert_eq!(ctx.store.get_counter("hits").await.unwrap(), 10);
    assert_eq!(ctx.store.get_gauge("Alloc").await.unwrap(), 12.75);
}

#[tokio::test]
async fn value_lookups() {
    let ctx = build_test_context();
    ctx.store.set_gauge("Alloc", 0.25).await.unwrap();

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/value/gauge/Alloc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"], 0.25);

    let (status, body, _) = request_json(&ctx.app, "POST", "/value/", json!({"id": "Alloc", "type": "gauge"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"id": "Alloc", "type": "gauge", "value": 0.25}));

    let (status, body, _) = request_no_body(&ctx.app, "GET", "/value/counter/Alloc").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["err_code"], 1004);

    let (status, _, _) = request_no_body(&ctx.app, "GET", "/value/histogram/Alloc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ping_reports_backend() {
    let ctx = build_test_context();
    let (status, body, trace_id) = request_no_body(&ctx.app, "GET", "/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["backend"], "memory");
    assert_eq!(trace_id.map(|t| t.len()), Some(16));
}

#[tokio::test]
async fn file_backend_writes_through() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.json");
    let store = Arc::new(FileStore::json(
        &path,
        FileStoreConfig {
            store_interval: Duration::ZERO,
            restore: false,
        },
        CancellationToken::new(),
    ));
    store.init(CancellationToken::new()).await.unwrap();
    let ctx = build_context_with(store.clone(), "file");

    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/updates/",
        json!([{"id": "requests", "type": "counter", "delta": 10}]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let persisted: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(persisted["counters"]["requests"], 10);
    store.close().await.unwrap();
}
