//! Error record dashboard endpoints.
//!
//! Error records are created by emitting error events; these endpoints only
//! read and resolve them. The environment comes from the `environment`
//! query parameter, falling back to the `x-environment` header.

use super::{failure, page_size, ApiFailure, RequestContext};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::grouping::ErrorQuery;
use shared::models::ErrorRecord;

/// Query parameters for error records.
#[derive(Debug, Deserialize)]
pub struct ErrorQueryParams {
    pub environment: Option<String>,
    pub resolved: Option<bool>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Selects the environment of a single record.
#[derive(Debug, Deserialize)]
pub struct EnvironmentParam {
    pub environment: Option<String>,
}

/// Response for error record queries.
#[derive(Debug, Serialize)]
pub struct ErrorQueryResponse {
    pub errors: Vec<ErrorRecord>,
    pub total_count: usize,
}

/// Creates the error record routes.
pub fn errors_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/errors", get(query_errors))
        .route("/api/v1/errors/{hash}", get(get_error))
        .route("/api/v1/errors/{hash}/resolve", post(resolve_error))
        .with_state(state)
}

async fn query_errors(
    State(state): State<AppState>,
    Query(params): Query<ErrorQueryParams>,
) -> Json<ErrorQueryResponse> {
    let mut query = ErrorQuery::new().with_limit(page_size(params.limit));

    if let Some(environment) = params.environment {
        query = query.with_environment(environment);
    }
    if let Some(resolved) = params.resolved {
        query = query.with_resolved(resolved);
    }
    if let Some(start) = params.start {
        query = query.with_start_time(start);
    }
    if let Some(end) = params.end {
        query = query.with_end_time(end);
    }
    if let Some(offset) = params.offset {
        query = query.with_offset(offset);
    }

    let result = state.telemetry().grouper().query(&query);
    Json(ErrorQueryResponse {
        errors: result.records,
        total_count: result.total_count,
    })
}

async fn get_error(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    Path(hash): Path<String>,
    Query(params): Query<EnvironmentParam>,
) -> Result<Json<ErrorRecord>, ApiFailure> {
    let environment = params.environment.unwrap_or(ctx.environment);
    state
        .telemetry()
        .grouper()
        .get(&hash, &environment)
        .map(Json)
        .map_err(failure)
}

async fn resolve_error(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    Path(hash): Path<String>,
    Query(params): Query<EnvironmentParam>,
) -> Result<Json<ErrorRecord>, ApiFailure> {
    let environment = params.environment.unwrap_or(ctx.environment);
    state
        .telemetry()
        .grouper()
        .resolve(&hash, &environment, Utc::now())
        .map(Json)
        .map_err(failure)
}
