//! Integration tests for metric ingestion, rollups and aggregate queries.

use axum::http::StatusCode;
use serde_json::json;

use super::common::{get, post_json, test_app};

async fn ingest_export_timings(app: axum::Router) {
    let (status, body) = post_json(
        app,
        "/api/v1/metrics",
        json!([
            {"metric_name": "invoice_export_ms", "type": "timer", "value": 100.0,
             "labels": {"format": "pdf"}, "timestamp": "2026-03-02T08:00:05Z"},
            {"metric_name": "invoice_export_ms", "type": "timer", "value": 300.0,
             "labels": {"format": "pdf"}, "timestamp": "2026-03-02T08:00:40Z"},
            {"metric_name": "invoice_export_ms", "type": "timer", "value": 50.0,
             "labels": {"format": "csv"}, "timestamp": "2026-03-02T08:00:41Z"},
            {"metric_name": "invoice_export_ms", "type": "timer", "value": 999.0,
             "labels": {"format": "pdf"}, "timestamp": "2026-03-02T08:01:00Z"}
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["accepted"], 4);
}

#[tokio::test]
async fn test_ingest_and_query_samples() {
    let (app, _state) = test_app();
    ingest_export_timings(app.clone()).await;

    let (status, body) = get(
        app.clone(),
        "/api/v1/metrics?name=invoice_export_ms&labels=format:csv",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);
    assert_eq!(body["samples"][0]["value"], 50.0);

    let (_, body) = get(app, "/api/v1/metrics?name=invoice_export_ms&limit=2").await;
    assert_eq!(body["total_count"], 4);
    assert_eq!(body["samples"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_sample_in_batch_stores_nothing() {
    let (app, _state) = test_app();

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/metrics",
        json!([
            {"metric_name": "beams_cut", "type": "counter", "value": 4.0},
            {"metric_name": "beams_cut", "type": "counter", "value": -1.0}
        ]),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");

    let (_, body) = get(app, "/api/v1/metrics?name=beams_cut").await;
    assert_eq!(body["total_count"], 0);
}

#[tokio::test]
async fn test_rollup_per_label_set() {
    let (app, _state) = test_app();
    ingest_export_timings(app.clone()).await;

    let (status, report) = post_json(
        app.clone(),
        "/api/v1/metrics/rollup",
        json!({"window": "1m", "period_start": "2026-03-02T08:00:00Z"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["reports"][0]["metrics"], 1);
    assert_eq!(report["reports"][0]["aggregates_written"], 2);

    let (status, body) = get(
        app,
        "/api/v1/metrics/aggregates?metric_name=invoice_export_ms&window=one_minute&labels=format:pdf",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);

    let aggregate = &body["aggregates"][0];
    assert_eq!(aggregate["count"], 2);
    assert_eq!(aggregate["min"], 100.0);
    assert_eq!(aggregate["max"], 300.0);
    assert_eq!(aggregate["avg"], 200.0);
}

#[tokio::test]
async fn test_rollup_rerun_is_idempotent() {
    let (app, _state) = test_app();
    ingest_export_timings(app.clone()).await;

    let request = json!({"window": "one_minute", "period_start": "2026-03-02T08:00:00Z"});
    let (_, first) = post_json(app.clone(), "/api/v1/metrics/rollup", request.clone()).await;
    let (_, second) = post_json(app.clone(), "/api/v1/metrics/rollup", request).await;
    assert_eq!(
        first["reports"][0]["aggregates_written"],
        second["reports"][0]["aggregates_written"]
    );

    let (_, body) = get(app, "/api/v1/metrics/aggregates?metric_name=invoice_export_ms").await;
    assert_eq!(body["total_count"], 2);
}

#[tokio::test]
async fn test_misaligned_rollup_rejected() {
    let (app, _state) = test_app();

    let (status, body) = post_json(
        app,
        "/api/v1/metrics/rollup",
        json!({"window": "1h", "period_start": "2026-03-02T08:30:00Z"}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_malformed_label_filter_rejected() {
    let (app, _state) = test_app();

    let (status, body) = get(app, "/api/v1/metrics/aggregates?labels=format").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_labels");
}
