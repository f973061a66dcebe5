//! Alert feed and operator endpoints.

use super::{api_error, failure, ApiFailure, RequestContext};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::models::Alert;

/// Acknowledgement request. When `acknowledged_by` is absent the
/// `x-user-id` header names the operator.
#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub acknowledged_by: Option<String>,
}

/// Response listing alerts.
#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub total_count: usize,
}

impl From<Vec<Alert>> for AlertsResponse {
    fn from(alerts: Vec<Alert>) -> Self {
        Self {
            total_count: alerts.len(),
            alerts,
        }
    }
}

/// Creates the alert routes.
pub fn alerts_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/alerts", get(list_alerts))
        .route("/api/v1/alerts/active", get(alert_feed))
        .route("/api/v1/alerts/{name}", get(get_alert))
        .route("/api/v1/alerts/{name}/acknowledge", post(acknowledge_alert))
        .route("/api/v1/alerts/{name}/resolve", post(resolve_alert))
        .with_state(state)
}

async fn list_alerts(State(state): State<AppState>) -> Json<AlertsResponse> {
    Json(state.telemetry().alerts().alerts().into())
}

async fn alert_feed(State(state): State<AppState>) -> Json<AlertsResponse> {
    Json(state.telemetry().alerts().feed().into())
}

async fn get_alert(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Alert>, ApiFailure> {
    state
        .telemetry()
        .alerts()
        .get(&name)
        .map(Json)
        .map_err(failure)
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    Path(name): Path<String>,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<Json<Alert>, ApiFailure> {
    let operator = request
        .acknowledged_by
        .filter(|by| !by.trim().is_empty())
        .or(ctx.user_id)
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "missing_operator",
                "acknowledged_by or the x-user-id header is required",
            )
        })?;

    state
        .telemetry()
        .alerts()
        .acknowledge(&name, &operator, Utc::now())
        .map(Json)
        .map_err(failure)
}

async fn resolve_alert(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Alert>, ApiFailure> {
    state
        .telemetry()
        .alerts()
        .resolve(&name, Utc::now())
        .map(Json)
        .map_err(failure)
}
