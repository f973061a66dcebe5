//! Integration tests for liveness and reported health checks.

use axum::http::StatusCode;
use serde_json::json;

use super::common::{get, post_json, test_app};

#[tokio::test]
async fn test_liveness() {
    let (app, _state) = test_app();

    let (status, body) = get(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "timbertrace-api");
}

#[tokio::test]
async fn test_latest_result_per_check() {
    let (app, _state) = test_app();

    for (check, status, ts) in [
        ("database", "healthy", "2026-03-02T08:00:00Z"),
        ("database", "degraded", "2026-03-02T08:01:00Z"),
        ("pdf_renderer", "healthy", "2026-03-02T08:00:30Z"),
    ] {
        let (code, _) = post_json(
            app.clone(),
            "/api/v1/health-checks",
            json!({
                "check_name": check,
                "status": status,
                "latency": {"p50_ms": 4.0, "p95_ms": 12.0, "p99_ms": 30.0},
                "timestamp": ts
            }),
        )
        .await;
        assert_eq!(code, StatusCode::CREATED);
    }

    let (status, body) = get(app.clone(), "/api/v1/health-checks").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 2);
    assert_eq!(body["results"][0]["check_name"], "database");
    assert_eq!(body["results"][0]["status"], "degraded");

    let (status, body) = get(
        app,
        "/api/v1/health-checks/database?start=2026-03-02T08:00:30Z",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);
}

#[tokio::test]
async fn test_out_of_order_result_rejected() {
    let (app, _state) = test_app();

    let (status, _) = post_json(
        app.clone(),
        "/api/v1/health-checks",
        json!({"check_name": "database", "status": "healthy", "timestamp": "2026-03-02T08:05:00Z"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = post_json(
        app,
        "/api/v1/health-checks",
        json!({"check_name": "database", "status": "unhealthy", "timestamp": "2026-03-02T08:04:00Z"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_history_of_unknown_check_returns_404() {
    let (app, _state) = test_app();

    let (status, _) = get(app, "/api/v1/health-checks/nope").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
