//! Event ingestion and query endpoints.

use super::{failure, from_json, page_size, ApiFailure, RequestContext};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::models::{Event, EventCategory, EventId, StoredEvent};
use shared::storage::EventQuery;
use shared::telemetry::{EmitReceipt, Emission};
use shared::TelemetryError;

/// Query parameters for events.
#[derive(Debug, Default, Deserialize)]
pub struct EventQueryParams {
    pub tenant_id: Option<String>,
    pub name: Option<String>,
    pub category: Option<EventCategory>,
    pub trace_id: Option<String>,
    #[serde(default)]
    pub orphaned: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl From<EventQueryParams> for EventQuery {
    fn from(params: EventQueryParams) -> Self {
        let mut query = EventQuery::new().with_limit(page_size(params.limit));
        if let Some(tenant) = params.tenant_id {
            query = query.with_tenant(tenant);
        }
        if let Some(name) = params.name {
            query = query.with_name(name);
        }
        if let Some(category) = params.category {
            query = query.with_category(category);
        }
        if let Some(trace_id) = params.trace_id {
            query = query.with_trace_id(trace_id);
        }
        if params.orphaned {
            query = query.orphaned();
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
        query
    }
}

/// Response for event queries.
#[derive(Debug, Serialize)]
pub struct EventQueryResponse {
    pub events: Vec<StoredEvent>,
    pub total_count: usize,
}

/// Creates the events routes.
pub fn events_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/events", post(ingest_event).get(query_events))
        .route("/api/v1/events/{id}", get(get_event))
        .with_state(state)
}

async fn ingest_event(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<EmitReceipt>), ApiFailure> {
    let event: Event = from_json(payload)?;
    let receipt = state
        .telemetry()
        .emit(&ctx, Emission::Event(event))
        .map_err(failure)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn query_events(
    State(state): State<AppState>,
    Query(params): Query<EventQueryParams>,
) -> Result<Json<EventQueryResponse>, ApiFailure> {
    let result = state
        .telemetry()
        .ingestor()
        .events()
        .query(params.into())
        .map_err(|e| failure(shared::ingest::IngestError::from(e)))?;

    Ok(Json(EventQueryResponse {
        events: result.events,
        total_count: result.total_count,
    }))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<EventId>,
) -> Result<Json<StoredEvent>, ApiFailure> {
    state
        .telemetry()
        .ingestor()
        .events()
        .get(&id)
        .map(Json)
        .map_err(|e| match e {
            shared::storage::EventStoreError::NotFound(id) => super::api_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("Event not found: {id}"),
            ),
            other => failure(TelemetryError::from(shared::ingest::IngestError::from(other))),
        })
}
