//! Span ingestion and trace query endpoints.

use super::{api_error, failure, page_size, ApiFailure, RequestContext};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shared::ingest::IngestError;
use shared::models::{Span, Trace};
use shared::storage::{TraceQuery, TraceStoreError};
use shared::telemetry::{EmitReceipt, Emission};

/// Idle time after which a trace without orphans counts as complete.
const QUIESCENCE_SECS: i64 = 60;

/// Request for span ingestion.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SpanIngestRequest {
    Single(Span),
    Batch(Vec<Span>),
}

/// Response for span ingestion.
#[derive(Debug, Serialize, Deserialize)]
pub struct SpanIngestResponse {
    pub accepted: usize,
    pub orphaned: usize,
    pub message: String,
}

/// Query parameters for traces.
#[derive(Debug, Deserialize)]
pub struct TraceQueryParams {
    pub service: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub min_duration_ms: Option<i64>,
    pub max_duration_ms: Option<i64>,
    #[serde(default)]
    pub errors_only: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Response for trace queries.
#[derive(Debug, Serialize)]
pub struct TraceQueryResponse {
    pub traces: Vec<TraceResponse>,
    pub total_count: usize,
}

/// A trace in the response.
#[derive(Debug, Serialize)]
pub struct TraceResponse {
    pub trace_id: String,
    pub span_count: usize,
    pub services: Vec<String>,
    pub duration_ms: Option<i64>,
    pub root_span_id: Option<String>,
    pub orphaned_span_ids: Vec<String>,
    pub has_error: bool,
    pub quiescent: bool,
    pub spans: Vec<Span>,
}

impl TraceResponse {
    fn new(trace: Trace, now: DateTime<Utc>) -> Self {
        Self {
            trace_id: trace.trace_id.clone(),
            span_count: trace.span_count(),
            services: trace.services().into_iter().map(String::from).collect(),
            duration_ms: trace.duration().map(|d| d.num_milliseconds()),
            root_span_id: trace.root_span().map(|s| s.span_id.clone()),
            orphaned_span_ids: trace.orphans().iter().map(|s| s.span_id.clone()).collect(),
            has_error: trace.has_error(),
            quiescent: trace.is_quiescent(Duration::seconds(QUIESCENCE_SECS), now),
            spans: trace.spans,
        }
    }
}

/// Creates the traces routes.
pub fn traces_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/traces", post(ingest_spans).get(query_traces))
        .route("/api/v1/traces/{trace_id}", get(get_trace))
        .with_state(state)
}

async fn ingest_spans(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    Json(request): Json<SpanIngestRequest>,
) -> Result<(StatusCode, Json<SpanIngestResponse>), ApiFailure> {
    let spans = match request {
        SpanIngestRequest::Single(s) => vec![s],
        SpanIngestRequest::Batch(s) => s,
    };

    if spans.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "empty_batch",
            "At least one span is required",
        ));
    }

    let count = spans.len();
    let mut orphaned = 0;
    for span in spans {
        let receipt = state
            .telemetry()
            .emit(&ctx, Emission::Span(span))
            .map_err(failure)?;
        if matches!(receipt, EmitReceipt::Span { orphaned: true, .. }) {
            orphaned += 1;
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(SpanIngestResponse {
            accepted: count,
            orphaned,
            message: format!("Ingested {count} span(s)"),
        }),
    ))
}

async fn query_traces(
    State(state): State<AppState>,
    Query(params): Query<TraceQueryParams>,
) -> Result<Json<TraceQueryResponse>, ApiFailure> {
    let mut query = TraceQuery::new().with_limit(page_size(params.limit));

    if let Some(service) = params.service {
        query = query.with_service(service);
    }
    if let Some(start) = params.start {
        query = query.with_start_time(start);
    }
    if let Some(end) = params.end {
        query = query.with_end_time(end);
    }
    if let Some(min) = params.min_duration_ms {
        query = query.with_min_duration_ms(min);
    }
    if let Some(max) = params.max_duration_ms {
        query = query.with_max_duration_ms(max);
    }
    if params.errors_only {
        query = query.errors_only();
    }
    if let Some(offset) = params.offset {
        query = query.with_offset(offset);
    }

    let result = state
        .telemetry()
        .ingestor()
        .traces()
        .query(query)
        .map_err(|e| failure(IngestError::from(e)))?;

    let now = Utc::now();
    Ok(Json(TraceQueryResponse {
        traces: result
            .traces
            .into_iter()
            .map(|t| TraceResponse::new(t, now))
            .collect(),
        total_count: result.total_count,
    }))
}

async fn get_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<Json<TraceResponse>, ApiFailure> {
    match state.telemetry().ingestor().traces().get_trace(&trace_id) {
        Ok(trace) => Ok(Json(TraceResponse::new(trace, Utc::now()))),
        Err(TraceStoreError::NotFound(_)) => Err(api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Trace not found: {trace_id}"),
        )),
        Err(e) => Err(failure(IngestError::from(e))),
    }
}
