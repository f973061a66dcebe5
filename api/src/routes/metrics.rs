//! Metric ingestion, sample and aggregate query endpoints.

use super::{api_error, failure, page_size, ApiFailure, RequestContext};
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::aggregation::{AggregationError, RollupReport};
use shared::config::RollupWindow;
use shared::models::{MetricAggregate, MetricSample, MetricType};
use shared::storage::{AggregateQuery, MetricQuery};
use shared::telemetry::Emission;

/// Request for metric ingestion.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MetricIngestRequest {
    Single(MetricSample),
    Batch(Vec<MetricSample>),
}

/// Response for metric ingestion.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetricIngestResponse {
    pub accepted: usize,
    pub message: String,
}

/// Query parameters for raw samples.
#[derive(Debug, Deserialize)]
pub struct MetricQueryParams {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub metric_type: Option<MetricType>,
    /// Label filter, `key:value` pairs separated by commas.
    pub labels: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Response for sample queries.
#[derive(Debug, Serialize)]
pub struct MetricQueryResponse {
    pub samples: Vec<MetricSample>,
    pub total_count: usize,
}

/// Query parameters for aggregates.
#[derive(Debug, Deserialize)]
pub struct AggregateQueryParams {
    pub metric_name: Option<String>,
    pub window: Option<RollupWindow>,
    pub labels: Option<String>,
    #[serde(default)]
    pub anomalies_only: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Response for aggregate queries.
#[derive(Debug, Serialize)]
pub struct AggregateQueryResponse {
    pub aggregates: Vec<MetricAggregate>,
    pub total_count: usize,
}

/// Manual rollup request. Without `period_start` every completed period
/// of the window that is still pending is rolled up.
#[derive(Debug, Deserialize)]
pub struct RollupRequest {
    pub window: RollupWindow,
    pub period_start: Option<DateTime<Utc>>,
}

/// Reports of a manual rollup, one per rolled-up period.
#[derive(Debug, Serialize)]
pub struct RollupResponse {
    pub reports: Vec<RollupReport>,
}

/// Creates the metrics routes.
pub fn metrics_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/metrics", post(ingest_metrics).get(query_metrics))
        .route("/api/v1/metrics/aggregates", get(query_aggregates))
        .route("/api/v1/metrics/rollup", post(run_rollup))
        .with_state(state)
}

fn parse_labels(raw: Option<&str>) -> Result<Vec<(String, String)>, ApiFailure> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        "invalid_labels",
                        format!("Expected key:value, got '{pair}'"),
                    )
                })
        })
        .collect()
}

async fn ingest_metrics(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    Json(request): Json<MetricIngestRequest>,
) -> Result<(StatusCode, Json<MetricIngestResponse>), ApiFailure> {
    let samples = match request {
        MetricIngestRequest::Single(s) => vec![s],
        MetricIngestRequest::Batch(s) => s,
    };

    if samples.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "empty_batch",
            "At least one metric sample is required",
        ));
    }

    // Validate the whole batch first so a bad sample stores nothing.
    for sample in &samples {
        sample
            .validate_sample()
            .map_err(|e| failure(AggregationError::from(e)))?;
    }

    let count = samples.len();
    for sample in samples {
        state
            .telemetry()
            .emit(&ctx, Emission::Metric(sample))
            .map_err(failure)?;
    }

    Ok((
        StatusCode::CREATED,
        Json(MetricIngestResponse {
            accepted: count,
            message: format!("Ingested {count} metric sample(s)"),
        }),
    ))
}

async fn query_metrics(
    State(state): State<AppState>,
    Query(params): Query<MetricQueryParams>,
) -> Result<Json<MetricQueryResponse>, ApiFailure> {
    let mut query = MetricQuery::new().with_limit(page_size(params.limit));

    if let Some(name) = params.name {
        query = query.with_name(name);
    }
    if let Some(metric_type) = params.metric_type {
        query = query.with_type(metric_type);
    }
    for (key, value) in parse_labels(params.labels.as_deref())? {
        query = query.with_label(key, value);
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

    let result = state
        .telemetry()
        .aggregator()
        .store()
        .query_samples(query)
        .map_err(|e| failure(AggregationError::from(e)))?;

    Ok(Json(MetricQueryResponse {
        samples: result.samples,
        total_count: result.total_count,
    }))
}

async fn query_aggregates(
    State(state): State<AppState>,
    Query(params): Query<AggregateQueryParams>,
) -> Result<Json<AggregateQueryResponse>, ApiFailure> {
    let mut query = AggregateQuery::new().with_limit(page_size(params.limit));

    if let Some(name) = params.metric_name {
        query = query.with_name(name);
    }
    if let Some(window) = params.window {
        query = query.with_window(window);
    }
    for (key, value) in parse_labels(params.labels.as_deref())? {
        query = query.with_label(key, value);
    }
    if params.anomalies_only {
        query = query.anomalies_only();
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

    let result = state
        .telemetry()
        .aggregator()
        .store()
        .query_aggregates(query)
        .map_err(|e| failure(AggregationError::from(e)))?;

    Ok(Json(AggregateQueryResponse {
        aggregates: result.aggregates,
        total_count: result.total_count,
    }))
}

async fn run_rollup(
    State(state): State<AppState>,
    Json(request): Json<RollupRequest>,
) -> Result<Json<RollupResponse>, ApiFailure> {
    let aggregator = state.telemetry().aggregator();
    let reports = match request.period_start {
        Some(start) => aggregator.rollup(request.window, start).map(|r| vec![r]),
        None => aggregator.rollup_completed(request.window, Utc::now()),
    }
    .map_err(failure)?;
    Ok(Json(RollupResponse { reports }))
}
