//! Integration tests for the emit and events endpoints.
//!
//! Tests cover:
//! - Single and batch emission through `/api/v1/emit`
//! - Tenant and environment taken from producer headers
//! - Error events grouped into error records
//! - Orphaned events stored and flagged
//! - Events without a timestamp rejected per item
//! - Event queries and lookups

use axum::http::StatusCode;
use serde_json::json;

use super::common::{get, post_json, post_json_as, test_app};

fn error_event(message: &str) -> serde_json::Value {
    json!({
        "name": "invoice.export_failed",
        "category": "error",
        "timestamp": "2026-03-02T08:00:00Z",
        "severity": "error",
        "details": {
            "kind": "error",
            "error_type": "ExportError",
            "message": message,
            "stack": [
                {"function": "export", "module": "billing::datev"},
                {"function": "write_batch", "module": "billing::datev"}
            ]
        }
    })
}

#[tokio::test]
async fn test_emit_single_event_uses_header_tenant() {
    let (app, _state) = test_app();

    let (status, receipt) = post_json_as(
        app.clone(),
        "/api/v1/emit",
        &[("x-tenant-id", "zimmerei-nord"), ("x-user-id", "u-7")],
        json!({
            "emission": {
                "type": "event",
                "data": {"name": "project.closed", "category": "business", "timestamp": "2026-03-02T08:00:00Z"}
            }
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["type"], "event");
    let id = receipt["id"].as_str().unwrap().to_string();

    let (status, stored) = get(app, &format!("/api/v1/events/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["event"]["tenant_id"], "zimmerei-nord");
    assert_eq!(stored["event"]["name"], "project.closed");
}

#[tokio::test]
async fn test_emit_batch_reports_each_item() {
    let (app, _state) = test_app();

    let (status, body) = post_json(
        app,
        "/api/v1/emit",
        json!([
            {"emission": {"type": "metric", "data": {"metric_name": "exports", "value": 1.0}}},
            {"emission": {"type": "metric", "data": {"metric_name": "exports", "type": "counter", "value": -1.0}}},
            {"emission": {"type": "event", "data": {"name": "", "category": "system", "timestamp": "2026-03-02T08:00:00Z"}}},
            {
                "context": {"tenant_id": "abbund-sued", "environment": "staging"},
                "emission": {
                    "type": "event",
                    "data": {"name": "cnc.job_started", "category": "system", "timestamp": "2026-03-02T08:00:00Z"}
                }
            }
        ]),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 2);
    assert_eq!(body["rejected"], 2);
    assert_eq!(body["errors"][0]["index"], 1);
    assert_eq!(body["errors"][1]["index"], 2);
    assert_eq!(body["errors"][1]["error"], "validation_error");
}

#[tokio::test]
async fn test_invalid_event_is_rejected_with_422() {
    let (app, _state) = test_app();

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/events",
        json!({"name": "   ", "category": "user", "timestamp": "2026-03-02T08:00:00Z"}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");

    let (_, events) = get(app, "/api/v1/events").await;
    assert_eq!(events["total_count"], 0);
}

#[tokio::test]
async fn test_event_without_timestamp_is_rejected() {
    let (app, _state) = test_app();
    let untimed = json!({"name": "beam.cut", "category": "system"});

    let (status, body) = post_json(app.clone(), "/api/v1/events", untimed.clone()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
    assert!(body["message"].as_str().unwrap().contains("timestamp"));

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/emit",
        json!([
            {"emission": {"type": "event", "data": untimed}},
            {"emission": {"type": "event", "data": {"name": "beam.cut", "category": "system", "timestamp": "2026-03-02T08:00:00Z"}}}
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 1);
    assert_eq!(body["errors"][0]["index"], 0);
    assert_eq!(body["errors"][0]["error"], "validation_error");

    let (_, events) = get(app, "/api/v1/events").await;
    assert_eq!(events["total_count"], 1);
}

#[tokio::test]
async fn test_error_events_are_grouped() {
    let (app, _state) = test_app();
    let headers = [("x-environment", "production")];

    let (status, first) = post_json_as(
        app.clone(),
        "/api/v1/events",
        &headers,
        error_event("Export of invoice 4711 failed after 3 retries"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, second) = post_json_as(
        app.clone(),
        "/api/v1/events",
        &headers,
        error_event("Export of invoice 4712 failed after 5 retries"),
    )
    .await;

    let hash = first["error_hash"].as_str().unwrap();
    assert_eq!(second["error_hash"], hash);

    let (status, record) = get(
        app.clone(),
        &format!("/api/v1/errors/{hash}?environment=production"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["occurrence_count"], 2);

    let (_, staging) = get(app, &format!("/api/v1/errors/{hash}?environment=staging")).await;
    assert_eq!(staging["error"], "not_found");
}

#[tokio::test]
async fn test_orphaned_event_is_stored_and_flagged() {
    let (app, _state) = test_app();

    let (status, receipt) = post_json(
        app.clone(),
        "/api/v1/events",
        json!({
            "name": "stock.reserved",
            "category": "business",
            "timestamp": "2026-03-02T08:00:00Z",
            "parent_event_id": "7d1d8d6c-2f7e-4c55-9a55-0c1d7b0e2b11"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["orphan"]["reason"], "missing_parent_event");

    let (_, events) = get(app, "/api/v1/events?orphaned=true").await;
    assert_eq!(events["total_count"], 1);
    assert_eq!(events["events"][0]["event"]["name"], "stock.reserved");
}

#[tokio::test]
async fn test_query_events_by_tenant_and_category() {
    let (app, _state) = test_app();

    for (tenant, name, category) in [
        ("nord", "order.created", "business"),
        ("nord", "login.failed", "security"),
        ("sued", "order.created", "business"),
    ] {
        let (status, _) = post_json_as(
            app.clone(),
            "/api/v1/events",
            &[("x-tenant-id", tenant)],
            json!({"name": name, "category": category, "timestamp": "2026-03-02T08:00:00Z"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = get(app.clone(), "/api/v1/events?tenant_id=nord&category=business").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);

    let (_, body) = get(app, "/api/v1/events?name=order.created&limit=1").await;
    assert_eq!(body["total_count"], 2);
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_get_unknown_event_returns_404() {
    let (app, _state) = test_app();

    let (status, body) = get(app, "/api/v1/events/7d1d8d6c-2f7e-4c55-9a55-0c1d7b0e2b11").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
