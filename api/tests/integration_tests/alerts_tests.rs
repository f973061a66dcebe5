//! Integration tests for the alert feed and operator lifecycle.

use axum::http::StatusCode;
use chrono::Utc;
use serde_json::json;
use shared::config::{AlertingConfig, TelemetryConfig};
use shared::models::{AlertCondition, AlertDefinition, HealthStatus};

use super::common::{get, post_json, post_json_as, test_app, test_app_with_config};

fn database_alert_config() -> TelemetryConfig {
    let definition = AlertDefinition::new(
        "erp-database-down",
        AlertCondition::HealthStatus {
            check_name: "database".to_string(),
            min_status: HealthStatus::Unhealthy,
        },
    );
    TelemetryConfig {
        alerting: AlertingConfig::default().with_definition(definition),
        ..TelemetryConfig::default()
    }
}

#[tokio::test]
async fn test_alert_lifecycle_through_api() {
    let (app, state) = test_app_with_config(database_alert_config());

    let (status, _) = post_json(
        app.clone(),
        "/api/v1/health-checks",
        json!({"check_name": "database", "status": "unhealthy"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let report = state.telemetry().tick_alerts(Utc::now());
    assert_eq!(report.triggered, vec!["erp-database-down".to_string()]);

    let (status, feed) = get(app.clone(), "/api/v1/alerts/active").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feed["total_count"], 1);
    assert_eq!(feed["alerts"][0]["state"], "triggered");

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/alerts/erp-database-down/acknowledge",
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing_operator");

    let (status, alert) = post_json_as(
        app.clone(),
        "/api/v1/alerts/erp-database-down/acknowledge",
        &[("x-user-id", "ops-anna")],
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alert["state"], "acknowledged");
    assert_eq!(alert["acknowledged_by"], "ops-anna");

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/alerts/erp-database-down/acknowledge",
        json!({"acknowledged_by": "ops-ben"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, alert) = post_json(
        app.clone(),
        "/api/v1/alerts/erp-database-down/resolve",
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alert["state"], "resolved");

    let (_, feed) = get(app, "/api/v1/alerts/active").await;
    assert_eq!(feed["total_count"], 0);
}

#[tokio::test]
async fn test_healthy_check_does_not_trigger() {
    let (app, state) = test_app_with_config(database_alert_config());

    let (status, _) = post_json(
        app.clone(),
        "/api/v1/health-checks",
        json!({"check_name": "database", "status": "degraded"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let report = state.telemetry().tick_alerts(Utc::now());
    assert!(report.triggered.is_empty());

    let (_, alerts) = get(app, "/api/v1/alerts").await;
    assert_eq!(alerts["total_count"], 1);
    assert_eq!(alerts["alerts"][0]["state"], "inactive");
}

#[tokio::test]
async fn test_unknown_alert_returns_404() {
    let (app, _state) = test_app();

    let (status, body) = get(app.clone(), "/api/v1/alerts/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = post_json(app, "/api/v1/alerts/nope/resolve", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
