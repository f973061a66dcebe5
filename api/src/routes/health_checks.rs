//! Health checks reported by ERP components.

use super::{api_error, failure, ApiFailure};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::models::HealthCheckResult;

/// Time range of a check's history.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Response listing health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecksResponse {
    pub results: Vec<HealthCheckResult>,
    pub total_count: usize,
}

impl From<Vec<HealthCheckResult>> for HealthChecksResponse {
    fn from(results: Vec<HealthCheckResult>) -> Self {
        Self {
            total_count: results.len(),
            results,
        }
    }
}

/// Creates the health check routes.
pub fn health_checks_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/health-checks",
            post(record_health_check).get(latest_health_checks),
        )
        .route("/api/v1/health-checks/{check}", get(health_check_history))
        .with_state(state)
}

async fn record_health_check(
    State(state): State<AppState>,
    Json(result): Json<HealthCheckResult>,
) -> Result<(StatusCode, Json<HealthCheckResult>), ApiFailure> {
    state
        .telemetry()
        .health()
        .record_health_check(result.clone())
        .map_err(failure)?;
    Ok((StatusCode::CREATED, Json(result)))
}

async fn latest_health_checks(State(state): State<AppState>) -> Json<HealthChecksResponse> {
    Json(state.telemetry().health().latest_all().into())
}

async fn health_check_history(
    State(state): State<AppState>,
    Path(check): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HealthChecksResponse>, ApiFailure> {
    let health = state.telemetry().health();
    if health.latest(&check).is_none() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("No results for health check: {check}"),
        ));
    }
    Ok(Json(health.history(&check, params.start, params.end).into()))
}
