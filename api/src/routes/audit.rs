//! Audit chain endpoints.
//!
//! Entries are append-only: there is no update or delete route. A mistake is
//! fixed by posting a correction that references the original sequence.

use super::{failure, ApiFailure, RequestContext};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shared::audit::{AuditError, VerificationReport};
use shared::models::{AuditEntry, NewAuditEntry};
use shared::telemetry::{EmitReceipt, Emission};

/// Correction request.
#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    /// Sequence of the entry being corrected.
    pub original_sequence: u64,
    /// The correcting entry.
    pub entry: NewAuditEntry,
}

/// Selects a resource's history.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub resource_type: String,
    pub resource_id: String,
}

/// Half-open sequence range; `end` defaults to the chain head.
#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    #[serde(default)]
    pub start: u64,
    pub end: Option<u64>,
}

/// Response listing audit entries.
#[derive(Debug, Serialize)]
pub struct AuditEntriesResponse {
    pub entries: Vec<AuditEntry>,
    pub total_count: usize,
}

/// A chain and its length.
#[derive(Debug, Serialize)]
pub struct ChainSummary {
    pub chain: String,
    pub length: u64,
}

/// Integrity flag state.
#[derive(Debug, Serialize)]
pub struct IntegrityResponse {
    pub raised: bool,
    pub last_failure: Option<VerificationReport>,
}

/// Creates the audit routes.
pub fn audit_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/audit", post(append_entry).get(resource_history))
        .route("/api/v1/audit/corrections", post(append_correction))
        .route("/api/v1/audit/chains", get(list_chains))
        .route("/api/v1/audit/chains/{chain}", get(chain_entries))
        .route("/api/v1/audit/chains/{chain}/verify", post(verify_chain))
        .route(
            "/api/v1/audit/integrity",
            get(integrity_status).delete(clear_integrity),
        )
        .with_state(state)
}

async fn append_entry(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    Json(entry): Json<NewAuditEntry>,
) -> Result<(StatusCode, Json<EmitReceipt>), ApiFailure> {
    let receipt = state
        .telemetry()
        .emit(&ctx, Emission::Audit(entry))
        .map_err(failure)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn append_correction(
    State(state): State<AppState>,
    RequestContext(ctx): RequestContext,
    Json(request): Json<CorrectionRequest>,
) -> Result<(StatusCode, Json<EmitReceipt>), ApiFailure> {
    let entry = request.entry.correcting(request.original_sequence);
    let receipt = state
        .telemetry()
        .emit(&ctx, Emission::Audit(entry))
        .map_err(failure)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn resource_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<AuditEntriesResponse>, ApiFailure> {
    let entries = state
        .telemetry()
        .audit()
        .history(&params.resource_type, &params.resource_id)
        .map_err(failure)?;
    Ok(Json(AuditEntriesResponse {
        total_count: entries.len(),
        entries,
    }))
}

async fn list_chains(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChainSummary>>, ApiFailure> {
    let store = state.telemetry().audit().store();
    let chains = store.chains().map_err(|e| failure(AuditError::from(e)))?;

    let mut summaries = Vec::with_capacity(chains.len());
    for chain in chains {
        let length = store.len(&chain).map_err(|e| failure(AuditError::from(e)))?;
        summaries.push(ChainSummary { chain, length });
    }
    Ok(Json(summaries))
}

async fn chain_entries(
    State(state): State<AppState>,
    Path(chain): Path<String>,
    Query(range): Query<RangeParams>,
) -> Result<Json<AuditEntriesResponse>, ApiFailure> {
    let entries = state
        .telemetry()
        .audit()
        .store()
        .range(&chain, range.start, range.end)
        .map_err(|e| failure(AuditError::from(e)))?;
    Ok(Json(AuditEntriesResponse {
        total_count: entries.len(),
        entries,
    }))
}

async fn verify_chain(
    State(state): State<AppState>,
    Path(chain): Path<String>,
    Query(range): Query<RangeParams>,
) -> Result<Json<VerificationReport>, ApiFailure> {
    state
        .telemetry()
        .verify_audit_chain(&chain, range.start, range.end)
        .map(Json)
        .map_err(failure)
}

async fn integrity_status(State(state): State<AppState>) -> Json<IntegrityResponse> {
    let flag = state.telemetry().audit().integrity();
    Json(IntegrityResponse {
        raised: flag.is_raised(),
        last_failure: flag.last_failure(),
    })
}

async fn clear_integrity(State(state): State<AppState>) -> Json<IntegrityResponse> {
    let cleared = state.telemetry().audit().integrity().clear();
    Json(IntegrityResponse {
        raised: false,
        last_failure: cleared,
    })
}
