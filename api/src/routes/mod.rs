//! API route definitions.
//!
//! This module organizes all HTTP routes for the Timbertrace API server.
//! Producer endpoints take their [`TelemetryContext`] from request headers;
//! dashboard endpoints are read-only.

mod alerts;
mod audit;
mod emit;
mod errors;
mod events;
mod health;
mod health_checks;
mod metrics;
mod sessions;
mod traces;

pub use alerts::alerts_routes;
pub use audit::audit_routes;
pub use emit::emit_routes;
pub use errors::errors_routes;
pub use events::events_routes;
pub use health::health_routes;
pub use health_checks::health_checks_routes;
pub use metrics::metrics_routes;
pub use sessions::sessions_routes;
pub use traces::traces_routes;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::context::{TelemetryContext, DEFAULT_ENVIRONMENT};
use shared::{ErrorKind, TelemetryError};
use std::convert::Infallible;

/// Header carrying the tenant id.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the user id.
pub const USER_HEADER: &str = "x-user-id";
/// Header carrying the session token.
pub const SESSION_HEADER: &str = "x-session-token";
/// Header carrying the deployment environment.
pub const ENVIRONMENT_HEADER: &str = "x-environment";

/// Maximum page size of list endpoints.
pub const MAX_PAGE_SIZE: usize = 500;

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

/// Error half of every handler result.
pub type ApiFailure = (StatusCode, Json<ApiError>);

pub(crate) fn api_error(
    status: StatusCode,
    error: &str,
    message: impl Into<String>,
) -> ApiFailure {
    (
        status,
        Json(ApiError {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

/// Maps a pipeline error to its HTTP status.
pub(crate) fn telemetry_failure(err: &TelemetryError) -> ApiFailure {
    let (status, code) = match err.kind() {
        ErrorKind::Validation => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        ErrorKind::Conflict => (StatusCode::CONFLICT, "conflict"),
        ErrorKind::Integrity => (StatusCode::CONFLICT, "chain_integrity"),
        ErrorKind::Storage => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
    };
    api_error(status, code, err.to_string())
}

/// Converts any pipeline error into an [`ApiFailure`].
pub(crate) fn failure<E: Into<TelemetryError>>(err: E) -> ApiFailure {
    telemetry_failure(&err.into())
}

/// Decodes a JSON payload, rejecting malformed telemetry as a validation error.
pub(crate) fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ApiFailure> {
    serde_json::from_value(value)
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.to_string()))
}

pub(crate) fn page_size(limit: Option<usize>) -> usize {
    limit.unwrap_or(100).min(MAX_PAGE_SIZE)
}

/// Producer context read from the `x-*` request headers.
#[derive(Debug, Clone)]
pub struct RequestContext(pub TelemetryContext);

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

impl RequestContext {
    /// Reads the context from headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self(TelemetryContext {
            tenant_id: header(headers, TENANT_HEADER),
            user_id: header(headers, USER_HEADER),
            session_token: header(headers, SESSION_HEADER),
            environment: header(headers, ENVIRONMENT_HEADER)
                .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
        })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
