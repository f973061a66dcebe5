//! Integration tests for the audit chain endpoints.

use axum::http::{Method, StatusCode};
use serde_json::json;
use shared::config::{AuditConfig, ChainScope, TelemetryConfig};

use super::common::{get, post_json, post_json_as, request, test_app, test_app_with_config};

fn price_change(id: &str, from: f64, to: f64) -> serde_json::Value {
    json!({
        "action": "update",
        "resource_type": "quote",
        "resource_id": id,
        "old_values": {"price_per_m3": from},
        "new_values": {"price_per_m3": to}
    })
}

#[tokio::test]
async fn test_append_links_entries() {
    let (app, _state) = test_app();
    let headers = [("x-tenant-id", "zimmerei-nord"), ("x-user-id", "u-12")];

    let (status, first) =
        post_json_as(app.clone(), "/api/v1/audit", &headers, price_change("q-1", 410.0, 395.0)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["type"], "audit");
    assert_eq!(first["sequence"], 0);

    let (_, second) =
        post_json_as(app.clone(), "/api/v1/audit", &headers, price_change("q-1", 395.0, 380.0)).await;
    assert_eq!(second["sequence"], 1);

    let (status, chain) = get(app, "/api/v1/audit/chains/_global").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chain["total_count"], 2);
    assert_eq!(chain["entries"][1]["prev_checksum"], first["checksum"]);
    assert_eq!(chain["entries"][0]["actor"]["user_id"], "u-12");
    assert_eq!(chain["entries"][0]["changed_fields"], json!(["price_per_m3"]));
}

#[tokio::test]
async fn test_verify_intact_chain() {
    let (app, _state) = test_app();

    for to in [400.0, 390.0, 385.0] {
        let (status, _) = post_json(app.clone(), "/api/v1/audit", price_change("q-2", 410.0, to)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, report) =
        post_json(app.clone(), "/api/v1/audit/chains/_global/verify", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["checked"], 3);
    assert!(report["first_invalid"].is_null());

    let (status, report) = post_json(
        app.clone(),
        "/api/v1/audit/chains/_global/verify?start=1&end=3",
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["checked"], 2);

    let (_, integrity) = get(app, "/api/v1/audit/integrity").await;
    assert_eq!(integrity["raised"], false);
}

#[tokio::test]
async fn test_correction_references_original() {
    let (app, _state) = test_app();

    let (_, original) = post_json(app.clone(), "/api/v1/audit", price_change("q-3", 410.0, 41.0)).await;

    let (status, correction) = post_json(
        app.clone(),
        "/api/v1/audit/corrections",
        json!({
            "original_sequence": original["sequence"],
            "entry": price_change("q-3", 41.0, 410.0)
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(correction["sequence"], 1);

    let (status, history) = get(app, "/api/v1/audit?resource_type=quote&resource_id=q-3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total_count"], 2);
    assert_eq!(history["entries"][1]["action"], "correction");
    assert_eq!(history["entries"][1]["corrects"], 0);
}

#[tokio::test]
async fn test_correction_of_unknown_entry_rejected() {
    let (app, _state) = test_app();

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/audit/corrections",
        json!({"original_sequence": 7, "entry": price_change("q-4", 1.0, 2.0)}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");

    let (_, chains) = get(app, "/api/v1/audit/chains").await;
    assert_eq!(chains.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_per_tenant_chains_are_independent() {
    let config = TelemetryConfig {
        audit: AuditConfig {
            chain_scope: ChainScope::PerTenant,
            verify_interval_secs: None,
        },
        ..TelemetryConfig::default()
    };
    let (app, _state) = test_app_with_config(config);

    for tenant in ["nord", "sued", "nord"] {
        let (status, _) = post_json_as(
            app.clone(),
            "/api/v1/audit",
            &[("x-tenant-id", tenant)],
            price_change("q-5", 1.0, 2.0),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, chains) = get(app, "/api/v1/audit/chains").await;
    assert_eq!(
        chains,
        json!([
            {"chain": "nord", "length": 2},
            {"chain": "sued", "length": 1}
        ])
    );
}

#[tokio::test]
async fn test_clear_integrity_flag() {
    let (app, _state) = test_app();

    let (status, body) = request(app, Method::DELETE, "/api/v1/audit/integrity", &[], None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["raised"], false);
    assert!(body["last_failure"].is_null());
}

#[tokio::test]
async fn test_entry_without_resource_rejected() {
    let (app, _state) = test_app();

    let (status, body) = post_json(
        app,
        "/api/v1/audit",
        json!({"action": "delete", "resource_type": "invoice", "resource_id": ""}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
}
