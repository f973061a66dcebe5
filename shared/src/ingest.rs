//! Event ingestion and trace correlation.
//!
//! [`EventIngestor`] validates events, assigns identifiers, resolves causal
//! parents and registers the span an event represents. Unknown parents never
//! cause an event to be dropped: the event is stored with an orphan flag.

use crate::context::TelemetryContext;
use crate::models::{
    Event, EventDetails, EventId, EventValidationError, OrphanReason, Span, SpanValidationError,
    StoredEvent,
};
use crate::storage::{EventStore, EventStoreError, TraceStore, TraceStoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// A causal parent that could not be resolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// `parent_event_id` references no stored event.
    #[error("Parent event {0} is unknown")]
    UnknownParentEvent(EventId),

    /// `parent_span_id` is not registered in the trace.
    #[error("Parent span {parent_span_id} is unknown in trace {trace_id}")]
    UnknownParentSpan {
        /// Trace of the span.
        trace_id: String,
        /// The unknown parent span.
        parent_span_id: String,
    },
}

impl From<&OrphanReason> for CorrelationError {
    fn from(reason: &OrphanReason) -> Self {
        match reason {
            OrphanReason::MissingParentEvent { parent_event_id } => {
                Self::UnknownParentEvent(*parent_event_id)
            }
            OrphanReason::MissingParentSpan {
                trace_id,
                parent_span_id,
            } => Self::UnknownParentSpan {
                trace_id: trace_id.clone(),
                parent_span_id: parent_span_id.clone(),
            },
        }
    }
}

/// Errors that reject an event or span. Nothing is stored when one occurs.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The event is malformed.
    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] EventValidationError),

    /// The span is malformed.
    #[error("Invalid span: {0}")]
    InvalidSpan(#[from] SpanValidationError),

    /// An event with the same id is already stored.
    #[error("Event already exists: {0}")]
    DuplicateEvent(EventId),

    /// A span with the same id is already registered in the trace.
    #[error("Span {span_id} already exists in trace {trace_id}")]
    DuplicateSpan {
        /// Trace of the span.
        trace_id: String,
        /// Duplicated span id.
        span_id: String,
    },

    /// The event store failed.
    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    /// The trace store failed.
    #[error("Trace store error: {0}")]
    TraceStore(TraceStoreError),
}

impl From<EventStoreError> for IngestError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::DuplicateId(id) => Self::DuplicateEvent(id),
            other => Self::EventStore(other),
        }
    }
}

impl From<TraceStoreError> for IngestError {
    fn from(err: TraceStoreError) -> Self {
        match err {
            TraceStoreError::DuplicateSpan { trace_id, span_id } => {
                Self::DuplicateSpan { trace_id, span_id }
            }
            other => Self::TraceStore(other),
        }
    }
}

impl IngestError {
    /// Returns true if the input itself was rejected (as opposed to a
    /// storage failure).
    #[must_use]
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::EventStore(_) | Self::TraceStore(_))
    }
}

/// Result of ingesting an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Identifier of the stored event.
    pub id: EventId,
    /// Set when a causal parent was unknown.
    pub orphan: Option<OrphanReason>,
}

/// Validates, correlates and stores events and spans.
#[derive(Clone)]
pub struct EventIngestor {
    events: Arc<dyn EventStore>,
    traces: Arc<dyn TraceStore>,
}

impl EventIngestor {
    /// Creates an ingestor writing to the given stores.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, traces: Arc<dyn TraceStore>) -> Self {
        Self { events, traces }
    }

    /// The event store.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// The trace store.
    #[must_use]
    pub fn traces(&self) -> &Arc<dyn TraceStore> {
        &self.traces
    }

    /// Ingests an event.
    ///
    /// Fills the tenant from the context when the event has none, assigns an
    /// id when absent, registers the span the event represents and stores
    /// the event. An unknown parent event or parent span flags the event as
    /// orphaned; it is still stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is invalid, its id or span id is
    /// already taken, or a store fails.
    pub fn ingest(
        &self,
        ctx: &TelemetryContext,
        mut event: Event,
    ) -> Result<IngestOutcome, IngestError> {
        event.validate_event()?;

        if event.tenant_id.is_none() {
            event.tenant_id.clone_from(&ctx.tenant_id);
        }
        let id = *event.id.get_or_insert_with(Uuid::new_v4);

        let span = span_for_event(id, &event)?;
        if let Some(ref span) = span {
            span.validate_span()?;
        }

        if self.events.contains(&id)? {
            return Err(IngestError::DuplicateEvent(id));
        }

        let mut orphan = match event.parent_event_id {
            Some(parent) if !self.events.contains(&parent)? => {
                Some(OrphanReason::MissingParentEvent {
                    parent_event_id: parent,
                })
            }
            _ => None,
        };

        let registered = match span {
            Some(span) => {
                let stored = self.traces.insert_span(span)?;
                if stored.orphaned && orphan.is_none() {
                    orphan = Some(OrphanReason::MissingParentSpan {
                        trace_id: stored.trace_id.clone(),
                        parent_span_id: stored.parent_span_id.clone().unwrap_or_default(),
                    });
                }
                Some((stored.trace_id, stored.span_id))
            }
            None => None,
        };

        if let Some(ref reason) = orphan {
            warn!(
                event_id = %id,
                event_name = %event.name,
                error = %CorrelationError::from(reason),
                "Storing orphaned event"
            );
        }

        let inserted = self.events.insert(StoredEvent {
            id,
            event,
            orphan: orphan.clone(),
            ingested_at: Utc::now(),
        });
        if let Err(e) = inserted {
            // The event lost a race on its id; its span must not outlive it.
            if let Some((trace_id, span_id)) = registered {
                self.traces.remove_span(&trace_id, &span_id)?;
                debug!(event_id = %id, %trace_id, %span_id, "Rolled back span of rejected event");
            }
            return Err(e.into());
        }

        debug!(event_id = %id, "Event ingested");
        Ok(IngestOutcome { id, orphan })
    }

    /// Removes events with a timestamp before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event store fails.
    pub fn prune_events(&self, cutoff: DateTime<Utc>) -> Result<usize, IngestError> {
        Ok(self.events.prune_before(cutoff)?)
    }

    /// Removes traces whose last span ended before `cutoff`. Returns the
    /// number of removed spans.
    ///
    /// # Errors
    ///
    /// Returns an error if the trace store fails.
    pub fn prune_traces(&self, cutoff: DateTime<Utc>) -> Result<usize, IngestError> {
        Ok(self.traces.prune_before(cutoff)?)
    }

    /// Registers an explicit span.
    ///
    /// A span whose parent is not registered in the same trace is stored
    /// with `orphaned` set.
    ///
    /// # Errors
    ///
    /// Returns an error if the span is invalid, already registered, or the
    /// store fails.
    pub fn ingest_span(&self, span: Span) -> Result<Span, IngestError> {
        span.validate_span()?;
        let stored = self.traces.insert_span(span)?;
        if stored.orphaned {
            let error = CorrelationError::UnknownParentSpan {
                trace_id: stored.trace_id.clone(),
                parent_span_id: stored.parent_span_id.clone().unwrap_or_default(),
            };
            warn!(span_id = %stored.span_id, error = %error, "Storing orphaned span");
        }
        Ok(stored)
    }
}

/// Derives the span an event represents, if it carries span identifiers.
fn span_for_event(id: EventId, event: &Event) -> Result<Option<Span>, EventValidationError> {
    let (Some(trace_id), Some(span_id)) = (event.trace_id.as_ref(), event.span_id.as_ref()) else {
        return Ok(None);
    };

    let end_time = match &event.details {
        EventDetails::Performance(perf) => {
            #[allow(clippy::cast_possible_truncation)]
            let micros = (perf.duration_ms * 1000.0).round() as i64;
            event
                .timestamp
                .checked_add_signed(chrono::Duration::microseconds(micros))
                .ok_or(EventValidationError::InvalidDuration)?
        }
        _ => event.timestamp,
    };

    let mut span = Span::new(trace_id.clone(), span_id.clone(), event.name.clone())
        .with_start_time(event.timestamp)
        .with_end_time(end_time)
        .with_error(event.is_failure())
        .with_attribute("event_id", id.to_string())
        .with_attribute("category", event.category.to_string());
    if let Some(ref parent) = event.parent_span_id {
        span = span.with_parent(parent.clone());
    }
    if let Some(ref module) = event.source.module {
        span = span.with_service(module.clone());
    }
    if let Some(ref correlation_id) = event.correlation_id {
        span = span.with_attribute("correlation_id", correlation_id.clone());
    }
    Ok(Some(span))
}
