//! Integration tests for session tracking.

use axum::http::StatusCode;
use serde_json::json;

use super::common::{get, post_json, post_json_as, test_app};

async fn start_session(app: axum::Router, user: &str) -> String {
    let (status, session) = post_json_as(
        app,
        "/api/v1/sessions",
        &[("x-user-id", user), ("x-tenant-id", "zimmerei-nord")],
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    session["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_session_lifecycle() {
    let (app, _state) = test_app();
    let token = start_session(app.clone(), "u-1").await;

    for activity in [
        json!({"type": "page_view", "page": "projects/overview"}),
        json!({"type": "page_view", "page": "projects/42"}),
        json!({"type": "action", "name": "export_cutting_list"}),
    ] {
        let (status, _) = post_json(
            app.clone(),
            &format!("/api/v1/sessions/{token}/activity"),
            activity,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, session) = get(app.clone(), &format!("/api/v1/sessions/{token}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["page_views"], 2);
    assert_eq!(session["actions_count"], 1);
    assert_eq!(session["is_active"], true);
    assert_eq!(session["tenant_id"], "zimmerei-nord");

    let (status, ended) = post_json(
        app.clone(),
        &format!("/api/v1/sessions/{token}/end"),
        json!({"reason": "logout"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["is_active"], false);
    assert_eq!(ended["end_reason"], "logout");

    let (status, body) = post_json(
        app.clone(),
        &format!("/api/v1/sessions/{token}/end"),
        json!({"reason": "forced"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _) = post_json(
        app,
        &format!("/api/v1/sessions/{token}/activity"),
        json!({"type": "action", "name": "late"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_session_requires_user() {
    let (app, _state) = test_app();

    let (status, body) = post_json(app, "/api/v1/sessions", json!({})).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_timeout_reason_reserved_for_sweep() {
    let (app, _state) = test_app();
    let token = start_session(app.clone(), "u-2").await;

    let (status, body) = post_json(
        app,
        &format!("/api/v1/sessions/{token}/end"),
        json!({"reason": "timeout"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_reason");
}

#[tokio::test]
async fn test_list_sessions_by_user_and_state() {
    let (app, _state) = test_app();
    let first = start_session(app.clone(), "u-3").await;
    start_session(app.clone(), "u-3").await;
    start_session(app.clone(), "u-4").await;

    let (status, _) = post_json(
        app.clone(),
        &format!("/api/v1/sessions/{first}/end"),
        json!({"reason": "logout"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(app.clone(), "/api/v1/sessions?user_id=u-3").await;
    assert_eq!(body["total_count"], 2);
    assert_eq!(body["active_count"], 2);

    let (_, body) = get(app, "/api/v1/sessions?user_id=u-3&active=true").await;
    assert_eq!(body["total_count"], 1);
}

#[tokio::test]
async fn test_sweep_keeps_fresh_sessions() {
    let (app, _state) = test_app();
    start_session(app.clone(), "u-5").await;

    let (status, body) = post_json(app, "/api/v1/sessions/sweep", json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["closed"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_unknown_session_returns_404() {
    let (app, _state) = test_app();

    let (status, body) = get(app, "/api/v1/sessions/unknown-token").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
