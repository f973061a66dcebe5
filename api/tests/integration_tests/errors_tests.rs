//! Integration tests for error record queries and resolution.

use axum::http::StatusCode;
use serde_json::json;

use super::common::{get, post_json, post_json_as, test_app};

async fn report_error(app: axum::Router, environment: &str, error_type: &str) -> String {
    let (status, receipt) = post_json_as(
        app,
        "/api/v1/events",
        &[("x-environment", environment)],
        json!({
            "name": "cnc.transfer_failed",
            "category": "error",
            "timestamp": "2026-03-02T08:00:00Z",
            "severity": "error",
            "details": {
                "kind": "error",
                "error_type": error_type,
                "message": "Transfer to machine 3 timed out",
                "stack": [{"function": "send_program", "module": "cnc::hundegger"}]
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    receipt["error_hash"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_list_errors_by_environment() {
    let (app, _state) = test_app();
    report_error(app.clone(), "production", "TimeoutError").await;
    report_error(app.clone(), "production", "IoError").await;
    report_error(app.clone(), "staging", "TimeoutError").await;

    let (status, body) = get(app.clone(), "/api/v1/errors?environment=production").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 2);

    let (_, body) = get(app, "/api/v1/errors").await;
    assert_eq!(body["total_count"], 3);
}

#[tokio::test]
async fn test_resolve_and_reopen() {
    let (app, _state) = test_app();
    let hash = report_error(app.clone(), "production", "TimeoutError").await;

    let (status, record) = post_json(
        app.clone(),
        &format!("/api/v1/errors/{hash}/resolve?environment=production"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["is_resolved"], true);

    let (_, body) = get(app.clone(), "/api/v1/errors?resolved=false").await;
    assert_eq!(body["total_count"], 0);

    report_error(app.clone(), "production", "TimeoutError").await;

    let (_, record) = get(app, &format!("/api/v1/errors/{hash}")).await;
    assert_eq!(record["is_resolved"], false);
    assert_eq!(record["reopen_count"], 1);
    assert_eq!(record["occurrence_count"], 2);
}

#[tokio::test]
async fn test_resolve_unknown_error_returns_404() {
    let (app, _state) = test_app();

    let (status, body) = post_json(app, "/api/v1/errors/abc/resolve", json!({})).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
