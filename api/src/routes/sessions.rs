//! User session endpoints.

use super::{api_error, failure, ApiFailure, RequestContext};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::models::{Activity, EndReason, Session};
use shared::sessions::SessionError;

/// Query parameters for sessions.
#[derive(Debug, Deserialize)]
pub struct SessionQueryParams {
    pub user_id: Option<String>,
    pub active: Option<bool>,
}

/// End-of-session request.
#[derive(Debug, Deserialize)]
pub struct EndSessionRequest {
    pub reason: EndReason,
}

/// Response listing sessions.
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
    pub total_count: usize,
    pub active_count: usize,
}

/// Result of an idle sweep.
#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub closed: Vec<Session>,
}

/// Creates the session routes.
pub fn sessions_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/sessions", post(start_session).get(list_sessions))
        .route("/api/v1/sessions/sweep", post(sweep_sessions))
        .route("/api/v1/sessions/{token}", get(get_session))
        .route("/api/v1/sessions/{token}/activity", post(track_activity))
        .route("/api/v1/sessions/{token}/end", post(end_session))
        .with_state(state)
}

async fn start_session(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
) -> Result<(StatusCode, Json<Session>), ApiFailure> {
    let session = state
        .telemetry()
        .sessions()
        .start_session(&ctx, Utc::now())
        .map_err(failure)?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<SessionQueryParams>,
) -> Json<SessionsResponse> {
    let tracker = state.telemetry().sessions();
    let sessions = tracker.list(params.user_id.as_deref(), params.active);
    Json(SessionsResponse {
        total_count: sessions.len(),
        active_count: tracker.active_count(),
        sessions,
    })
}

async fn get_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Session>, ApiFailure> {
    state
        .telemetry()
        .sessions()
        .get(&token)
        .map(Json)
        .ok_or_else(|| failure(SessionError::NotFound(token)))
}

async fn track_activity(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(activity): Json<Activity>,
) -> Result<Json<Session>, ApiFailure> {
    state
        .telemetry()
        .sessions()
        .touch(&token, &activity, Utc::now())
        .map(Json)
        .map_err(failure)
}

async fn end_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<EndSessionRequest>,
) -> Result<Json<Session>, ApiFailure> {
    if request.reason == EndReason::Timeout {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "invalid_reason",
            "Sessions end with timeout only through the idle sweep",
        ));
    }
    state
        .telemetry()
        .sessions()
        .end_session(&token, request.reason, Utc::now())
        .map(Json)
        .map_err(failure)
}

async fn sweep_sessions(State(state): State<AppState>) -> Json<SweepResponse> {
    Json(SweepResponse {
        closed: state.telemetry().sweep_sessions(Utc::now()),
    })
}
