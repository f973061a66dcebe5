//! Generic producer endpoint.
//!
//! `POST /api/v1/emit` accepts any [`Emission`] wrapped with an optional
//! producer context, either as a single item or as a batch. The context in
//! the body wins over the `x-*` headers.

use super::{failure, from_json, telemetry_failure, ApiFailure, RequestContext};
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use shared::context::TelemetryContext;
use shared::telemetry::{EmitReceipt, Emission};

/// One emission with its context.
#[derive(Debug, Deserialize)]
pub struct EmitItem {
    /// Producer context; the request headers are used when absent.
    #[serde(default)]
    pub context: Option<TelemetryContext>,
    /// The telemetry, decoded per item so one malformed emission does not
    /// reject the whole batch.
    pub emission: serde_json::Value,
}

/// Request body of the emit endpoint.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EmitRequest {
    /// A single emission.
    Single(EmitItem),
    /// Several emissions, processed independently.
    Batch(Vec<EmitItem>),
}

/// A rejected batch item.
#[derive(Debug, Serialize)]
pub struct BatchItemError {
    /// Position in the batch.
    pub index: usize,
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

/// Response for a batch.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    /// Accepted items.
    pub accepted: usize,
    /// Rejected items.
    pub rejected: usize,
    /// Receipts of the accepted items, in batch order.
    pub receipts: Vec<EmitReceipt>,
    /// Errors of the rejected items.
    pub errors: Vec<BatchItemError>,
}

/// Creates the emit routes.
pub fn emit_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/emit", post(emit))
        .with_state(state)
}

async fn emit(
    State(state): State<AppState>,
    RequestContext(header_ctx): RequestContext,
    Json(request): Json<EmitRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiFailure> {
    let telemetry = state.telemetry();

    match request {
        EmitRequest::Single(item) => {
            let ctx = item.context.unwrap_or(header_ctx);
            let emission: Emission = from_json(item.emission)?;
            let receipt = telemetry.emit(&ctx, emission).map_err(failure)?;
            Ok((StatusCode::CREATED, Json(to_value(&receipt)?)))
        }
        EmitRequest::Batch(items) => {
            let mut response = BatchResponse {
                accepted: 0,
                rejected: 0,
                receipts: Vec::with_capacity(items.len()),
                errors: Vec::new(),
            };
            for (index, item) in items.into_iter().enumerate() {
                let ctx = item.context.unwrap_or_else(|| header_ctx.clone());
                let result = from_json::<Emission>(item.emission).and_then(|emission| {
                    telemetry
                        .emit(&ctx, emission)
                        .map_err(|e| telemetry_failure(&e))
                });
                match result {
                    Ok(receipt) => {
                        response.accepted += 1;
                        response.receipts.push(receipt);
                    }
                    Err((_, Json(body))) => {
                        response.rejected += 1;
                        response.errors.push(BatchItemError {
                            index,
                            error: body.error,
                            message: body.message,
                        });
                    }
                }
            }
            Ok((StatusCode::OK, Json(to_value(&response)?)))
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, ApiFailure> {
    serde_json::to_value(value).map_err(|e| {
        super::api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "serialization_error",
            e.to_string(),
        )
    })
}
