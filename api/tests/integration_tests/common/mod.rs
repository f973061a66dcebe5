//! Common test utilities and helpers for integration tests.
//!
//! This module provides shared functionality used across all integration tests,
//! including test app setup and HTTP request helpers.

use api::{create_router, AppState};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use shared::config::TelemetryConfig;
use shared::telemetry::Stores;

/// Creates a test router with fresh in-memory stores.
///
/// # Returns
///
/// A tuple containing the configured router and the app state.
pub fn test_app() -> (Router, AppState) {
    let state = AppState::with_in_memory_store().unwrap();
    let router = create_router(state.clone());
    (router, state)
}

/// Creates a test router on the given pipeline configuration.
pub fn test_app_with_config(config: TelemetryConfig) -> (Router, AppState) {
    let (state, _notifications) = AppState::from_config(config, Stores::in_memory()).unwrap();
    let router = create_router(state.clone());
    (router, state)
}

/// Sends a request with optional JSON body and `x-*` headers.
///
/// # Returns
///
/// A tuple containing the response status code and parsed JSON response body.
pub async fn request(
    app: Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = tower::ServiceExt::oneshot(app, builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    (status, json)
}

/// Helper to make a POST request with JSON body.
pub async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    request(app, Method::POST, uri, &[], Some(body)).await
}

/// Helper to make a POST request with JSON body and producer headers.
pub async fn post_json_as(
    app: Router,
    uri: &str,
    headers: &[(&str, &str)],
    body: Value,
) -> (StatusCode, Value) {
    request(app, Method::POST, uri, headers, Some(body)).await
}

/// Helper to make a GET request.
pub async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    request(app, Method::GET, uri, &[], None).await
}
