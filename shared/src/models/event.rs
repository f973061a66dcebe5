//! Event data model.
//!
//! An [`Event`] is a discrete occurrence reported by a business module: a
//! user action, a failed operation, a security decision, a slow query.
//! Events are immutable once stored.

use super::error::StackFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

/// Identifier of a stored event.
pub type EventId = Uuid;

/// Longest accepted performance duration: one week.
pub const MAX_DURATION_MS: f64 = 7.0 * 24.0 * 60.0 * 60.0 * 1000.0;

/// Category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Infrastructure and lifecycle events.
    System,
    /// Interactive user actions.
    User,
    /// Timing and throughput observations.
    Performance,
    /// Authentication and authorization decisions.
    Security,
    /// Domain occurrences (invoice issued, project closed, ...).
    Business,
    /// Failed operations.
    Error,
    /// Privileged data mutations.
    Audit,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Performance => write!(f, "performance"),
            Self::Security => write!(f, "security"),
            Self::Business => write!(f, "business"),
            Self::Error => write!(f, "error"),
            Self::Audit => write!(f, "audit"),
        }
    }
}

/// Severity of an event, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Something unexpected that did not fail.
    Warning,
    /// An operation failed.
    Error,
    /// The system or a tenant is impaired.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Info
    }
}

/// Code location that produced an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    /// Module (e.g. `invoicing`, `fleet`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Function name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Source file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Line number (1-based).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Details of a user action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActionDetails {
    /// What the user did (e.g. `open_project`).
    pub action: String,
    /// What the action targeted, if anything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Details of a performance observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceDetails {
    /// Measured operation.
    pub operation: String,
    /// Duration of the operation in milliseconds.
    pub duration_ms: f64,
}

/// Details of a security decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityDetails {
    /// Principal the decision was about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Outcome (e.g. `denied`, `granted`).
    pub outcome: String,
}

/// Details of a business occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessDetails {
    /// Entity kind (e.g. `invoice`).
    pub entity: String,
    /// Entity identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

/// Details of a failed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Error type (e.g. `IntegrityError`).
    pub error_type: String,
    /// Raw error message.
    pub message: String,
    /// Stack frames, innermost first.
    #[serde(default)]
    pub stack: Vec<StackFrame>,
}

/// Typed payload of an event.
///
/// Each category has its own explicitly typed struct. `Other` is the only
/// open-ended variant and is reserved for deployment-specific fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetails {
    /// No payload.
    #[default]
    Empty,
    /// A user action.
    UserAction(UserActionDetails),
    /// A performance observation.
    Performance(PerformanceDetails),
    /// A security decision.
    Security(SecurityDetails),
    /// A business occurrence.
    Business(BusinessDetails),
    /// A failed operation.
    Error(ErrorDetails),
    /// Deployment-specific fields.
    Other {
        /// Free-form string fields.
        fields: BTreeMap<String, String>,
    },
}

impl EventDetails {
    /// Returns the category a typed payload belongs to, if it implies one.
    #[must_use]
    pub fn implied_category(&self) -> Option<EventCategory> {
        match self {
            Self::Empty | Self::Other { .. } => None,
            Self::UserAction(_) => Some(EventCategory::User),
            Self::Performance(_) => Some(EventCategory::Performance),
            Self::Security(_) => Some(EventCategory::Security),
            Self::Business(_) => Some(EventCategory::Business),
            Self::Error(_) => Some(EventCategory::Error),
        }
    }
}

/// A telemetry event as submitted by a producer.
///
/// # Example
///
/// ```
/// use shared::models::{Event, EventCategory, Severity};
///
/// let event = Event::new("invoice.issued", EventCategory::Business)
///     .with_severity(Severity::Info)
///     .with_tenant("zimmerei-nord")
///     .with_trace("trace-1", "span-1");
///
/// assert!(event.validate_event().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Event {
    /// Event identifier; assigned on ingest when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EventId>,

    /// Tenant the event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Event name (e.g. `project.closed`).
    #[validate(length(min = 1, message = "Event name cannot be empty"))]
    pub name: String,

    /// Event category.
    pub category: EventCategory,

    /// Event severity.
    #[serde(default)]
    pub severity: Severity,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Code location that produced the event.
    #[serde(default)]
    pub source: EventSource,

    /// Free correlation identifier (e.g. a request id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Trace the event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Span the event represents inside its trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Parent span inside the same trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    /// Earlier event this one is caused by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<EventId>,

    /// Typed payload.
    #[serde(default)]
    pub details: EventDetails,
}

/// Errors that can occur during event validation.
#[derive(Debug, Error)]
pub enum EventValidationError {
    /// The event name is empty.
    #[error("Event name cannot be empty")]
    EmptyName,

    /// The source line is zero.
    #[error("Source line numbers start at 1")]
    InvalidSourceLine,

    /// A span id was given without a trace id.
    #[error("span_id requires trace_id")]
    SpanWithoutTrace,

    /// A parent span id was given without a span id.
    #[error("parent_span_id requires span_id")]
    ParentSpanWithoutSpan,

    /// The payload belongs to a different category.
    #[error("Details of kind '{details}' do not belong to category '{category}'")]
    DetailsMismatch {
        /// Category of the event.
        category: EventCategory,
        /// Category implied by the payload.
        details: EventCategory,
    },

    /// A performance duration is negative, not finite or longer than
    /// [`MAX_DURATION_MS`].
    #[error("Performance duration must lie between 0 ms and one week")]
    InvalidDuration,

    /// An error event carries no error details to group it by.
    #[error("Events of category 'error' require error details")]
    MissingErrorDetails,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl Event {
    /// Creates a new event with the current timestamp.
    #[must_use]
    pub fn new(name: impl Into<String>, category: EventCategory) -> Self {
        Self {
            id: None,
            tenant_id: None,
            name: name.into(),
            category,
            severity: Severity::default(),
            timestamp: Utc::now(),
            source: EventSource::default(),
            correlation_id: None,
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            parent_event_id: None,
            details: EventDetails::default(),
        }
    }

    /// Creates an error event carrying error details.
    #[must_use]
    pub fn error(
        name: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(name, EventCategory::Error)
            .with_severity(Severity::Error)
            .with_details(EventDetails::Error(ErrorDetails {
                error_type: error_type.into(),
                message: message.into(),
                stack: Vec::new(),
            }))
    }

    /// Sets the id.
    #[must_use]
    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the source location.
    #[must_use]
    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Places the event at a span of a trace.
    #[must_use]
    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }

    /// Sets the parent span.
    #[must_use]
    pub fn with_parent_span(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    /// Sets the parent event.
    #[must_use]
    pub fn with_parent_event(mut self, parent_event_id: EventId) -> Self {
        self.parent_event_id = Some(parent_event_id);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_details(mut self, details: EventDetails) -> Self {
        self.details = details;
        self
    }

    /// Returns the error payload, if this is an error event.
    #[must_use]
    pub fn error_details(&self) -> Option<&ErrorDetails> {
        match &self.details {
            EventDetails::Error(details) => Some(details),
            _ => None,
        }
    }

    /// Returns true if the event describes a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.category == EventCategory::Error || self.severity >= Severity::Error
    }

    /// Validates the event.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The name is empty
    /// - The source line is zero
    /// - Span identifiers are inconsistent
    /// - The payload belongs to another category
    /// - A performance duration is negative, not finite or too long
    /// - An error event has no error details
    pub fn validate_event(&self) -> Result<(), EventValidationError> {
        if self.name.trim().is_empty() {
            return Err(EventValidationError::EmptyName);
        }
        if self.source.line == Some(0) {
            return Err(EventValidationError::InvalidSourceLine);
        }
        if self.span_id.is_some() && self.trace_id.is_none() {
            return Err(EventValidationError::SpanWithoutTrace);
        }
        if self.parent_span_id.is_some() && self.span_id.is_none() {
            return Err(EventValidationError::ParentSpanWithoutSpan);
        }
        if let Some(implied) = self.details.implied_category() {
            if implied != self.category {
                return Err(EventValidationError::DetailsMismatch {
                    category: self.category,
                    details: implied,
                });
            }
        }
        if let EventDetails::Performance(perf) = &self.details {
            if !(0.0..=MAX_DURATION_MS).contains(&perf.duration_ms) {
                return Err(EventValidationError::InvalidDuration);
            }
        }
        if self.category == EventCategory::Error && self.error_details().is_none() {
            return Err(EventValidationError::MissingErrorDetails);
        }
        self.validate()?;
        Ok(())
    }
}

/// Why a stored event could not be attached to its causal parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum OrphanReason {
    /// `parent_event_id` did not reference a stored event.
    MissingParentEvent {
        /// The unknown parent.
        parent_event_id: EventId,
    },
    /// `parent_span_id` was not registered in the trace.
    MissingParentSpan {
        /// Trace of the span.
        trace_id: String,
        /// The unknown parent span.
        parent_span_id: String,
    },
}

/// An event as held by the event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Assigned identifier.
    pub id: EventId,
    /// The submitted event (with `id` filled in).
    pub event: Event,
    /// Set when a causal parent was unknown at ingest time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphan: Option<OrphanReason>,
    /// When the event was accepted.
    pub ingested_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Returns true if a causal parent was missing at ingest time.
    #[must_use]
    pub fn is_orphaned(&self) -> bool {
        self.orphan.is_some()
    }
}
