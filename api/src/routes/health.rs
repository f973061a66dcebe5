//! Liveness endpoint.
//!
//! Reports that the server is up, for load balancers and monitoring systems.
//! Health checks reported by ERP components live under `/api/v1/health-checks`.

use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status (always "healthy" if reachable).
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Service version.
    pub version: &'static str,
    /// When the server started.
    pub started_at: DateTime<Utc>,
    /// Alerts currently triggered or acknowledged.
    pub open_alerts: usize,
    /// Whether an audit chain failed verification.
    pub audit_integrity_failed: bool,
}

/// Creates the liveness routes.
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let telemetry = state.telemetry();
    Json(HealthResponse {
        status: "healthy",
        service: "timbertrace-api",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at(),
        open_alerts: telemetry.alerts().feed().len(),
        audit_integrity_failed: telemetry.audit().integrity().is_raised(),
    })
}
