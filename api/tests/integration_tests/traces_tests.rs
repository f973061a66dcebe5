//! Integration tests for span ingestion and trace queries.
//!
//! Tests cover:
//! - Ingesting spans and retrieving complete traces
//! - Orphaned spans flagged and attached
//! - Events carrying span identifiers joining a trace
//! - Querying traces by service and errors
//! - Error handling for non-existent traces

use axum::http::StatusCode;
use serde_json::json;

use super::common::{get, post_json, test_app};

fn span(
    trace_id: &str,
    span_id: &str,
    parent: Option<&str>,
    service: &str,
    start: &str,
    end: &str,
) -> serde_json::Value {
    let mut span = json!({
        "trace_id": trace_id,
        "span_id": span_id,
        "operation_name": format!("{service}.handle"),
        "service": service,
        "start_time": start,
        "end_time": end
    });
    if let Some(parent) = parent {
        span["parent_span_id"] = json!(parent);
    }
    span
}

#[tokio::test]
async fn test_ingest_and_get_trace_by_id() {
    let (app, _state) = test_app();

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/traces",
        json!([
            span("trace-abc", "root", None, "web", "2026-03-02T08:00:00Z", "2026-03-02T08:00:00.150Z"),
            span("trace-abc", "db", Some("root"), "planning", "2026-03-02T08:00:00.020Z", "2026-03-02T08:00:00.100Z")
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["accepted"], 2);
    assert_eq!(body["orphaned"], 0);

    let (status, trace) = get(app, "/api/v1/traces/trace-abc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trace["span_count"], 2);
    assert_eq!(trace["root_span_id"], "root");
    assert_eq!(trace["duration_ms"], 150);
    assert_eq!(trace["orphaned_span_ids"].as_array().unwrap().len(), 0);
    assert_eq!(trace["has_error"], false);
}

#[tokio::test]
async fn test_span_with_unknown_parent_is_orphaned() {
    let (app, _state) = test_app();

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/traces",
        span("trace-orphan", "child", Some("missing"), "cnc", "2026-03-02T08:00:00Z", "2026-03-02T08:00:01Z"),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["orphaned"], 1);

    let (_, trace) = get(app, "/api/v1/traces/trace-orphan").await;
    assert_eq!(trace["orphaned_span_ids"][0], "child");
    assert_eq!(trace["quiescent"], false);
}

#[tokio::test]
async fn test_event_with_span_ids_joins_trace() {
    let (app, _state) = test_app();

    let (status, _) = post_json(
        app.clone(),
        "/api/v1/traces",
        span("trace-ev", "root", None, "web", "2026-03-02T08:00:00Z", "2026-03-02T08:00:01Z"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, receipt) = post_json(
        app.clone(),
        "/api/v1/events",
        json!({
            "name": "material.reserved",
            "category": "business",
            "timestamp": "2026-03-02T08:00:00Z",
            "trace_id": "trace-ev",
            "span_id": "reserve",
            "parent_span_id": "root"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(receipt.get("orphan").is_none());

    let (_, trace) = get(app.clone(), "/api/v1/traces/trace-ev").await;
    assert_eq!(trace["span_count"], 2);

    let (_, events) = get(app, "/api/v1/events?trace_id=trace-ev").await;
    assert_eq!(events["total_count"], 1);
}

#[tokio::test]
async fn test_query_traces_by_service_and_errors() {
    let (app, _state) = test_app();

    let mut failing = span("trace-2", "root", None, "billing", "2026-03-02T09:00:00Z", "2026-03-02T09:00:02Z");
    failing["is_error"] = json!(true);

    let (status, _) = post_json(
        app.clone(),
        "/api/v1/traces",
        json!([
            span("trace-1", "root", None, "planning", "2026-03-02T08:00:00Z", "2026-03-02T08:00:01Z"),
            failing
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = get(app.clone(), "/api/v1/traces?service=planning").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);
    assert_eq!(body["traces"][0]["trace_id"], "trace-1");

    let (_, body) = get(app, "/api/v1/traces?errors_only=true").await;
    assert_eq!(body["total_count"], 1);
    assert_eq!(body["traces"][0]["trace_id"], "trace-2");
}

#[tokio::test]
async fn test_empty_span_batch_rejected() {
    let (app, _state) = test_app();

    let (status, body) = post_json(app, "/api/v1/traces", json!([])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "empty_batch");
}

#[tokio::test]
async fn test_get_unknown_trace_returns_404() {
    let (app, _state) = test_app();

    let (status, body) = get(app, "/api/v1/traces/does-not-exist").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
