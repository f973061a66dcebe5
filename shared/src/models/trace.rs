//! Trace and span data models.
//!
//! Spans sharing a `trace_id` form a tree. The tree is stored flat: a
//! [`Trace`] owns its spans in a vector and parent relationships are
//! resolved by lookup, never by owning references.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use validator::Validate;

/// A span representing a unit of work in a trace.
///
/// # Example
///
/// ```
/// use shared::models::Span;
///
/// let span = Span::new("trace-123", "span-456", "load_project")
///     .with_service("projects")
///     .with_attribute("project_id", "P-1001");
///
/// assert!(span.validate_span().is_ok());
/// assert!(span.is_root());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Span {
    /// Trace this span belongs to.
    #[validate(length(min = 1, message = "Trace ID cannot be empty"))]
    pub trace_id: String,

    /// Identifier of the span, unique within its trace.
    #[validate(length(min = 1, message = "Span ID cannot be empty"))]
    pub span_id: String,

    /// The parent span ID (None for root spans).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    /// Operation performed by this span.
    #[validate(length(min = 1, message = "Operation name cannot be empty"))]
    pub operation_name: String,

    /// Module or service that produced the span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Timestamp when the span started.
    pub start_time: DateTime<Utc>,

    /// Timestamp when the span ended.
    pub end_time: DateTime<Utc>,

    /// Whether the unit of work failed.
    #[serde(default)]
    pub is_error: bool,

    /// Additional attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Set when the parent span was unknown at registration time.
    #[serde(default)]
    pub orphaned: bool,
}

/// Errors that can occur during span validation.
#[derive(Debug, Error)]
pub enum SpanValidationError {
    /// The trace ID is empty.
    #[error("Trace ID cannot be empty")]
    EmptyTraceId,

    /// The span ID is empty.
    #[error("Span ID cannot be empty")]
    EmptySpanId,

    /// The operation name is empty.
    #[error("Operation name cannot be empty")]
    EmptyOperation,

    /// The span names itself as its parent.
    #[error("Span cannot be its own parent")]
    SelfParent,

    /// The end time is before the start time.
    #[error("End time cannot be before start time")]
    InvalidTimeRange,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl Span {
    /// Creates a new span with the current time as both start and end.
    #[must_use]
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        operation_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            operation_name: operation_name.into(),
            service: None,
            start_time: now,
            end_time: now,
            is_error: false,
            attributes: BTreeMap::new(),
            orphaned: false,
        }
    }

    /// Sets the parent span ID.
    #[must_use]
    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    /// Sets the producing service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the start time.
    #[must_use]
    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    /// Sets the end time.
    #[must_use]
    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = end_time;
        self
    }

    /// Marks the span as failed.
    #[must_use]
    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }

    /// Adds an attribute to the span.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the duration of the span.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// Returns the duration in milliseconds.
    ///
    /// Always derived from start and end time.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.duration().num_milliseconds()
    }

    /// Returns true if this is a root span (no parent).
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Validates the span.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The trace ID, span ID or operation name is empty
    /// - The span is its own parent
    /// - The end time is before the start time
    pub fn validate_span(&self) -> Result<(), SpanValidationError> {
        if self.trace_id.is_empty() {
            return Err(SpanValidationError::EmptyTraceId);
        }
        if self.span_id.is_empty() {
            return Err(SpanValidationError::EmptySpanId);
        }
        if self.operation_name.is_empty() {
            return Err(SpanValidationError::EmptyOperation);
        }
        if self.parent_span_id.as_deref() == Some(self.span_id.as_str()) {
            return Err(SpanValidationError::SelfParent);
        }
        if self.end_time < self.start_time {
            return Err(SpanValidationError::InvalidTimeRange);
        }
        self.validate()?;
        Ok(())
    }
}

/// A trace consisting of the spans registered under one `trace_id`.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    /// The trace ID.
    pub trace_id: String,

    /// All spans in this trace, in registration order.
    pub spans: Vec<Span>,

    /// Span id to position in `spans`.
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Trace {
    /// Creates a new trace from a collection of spans.
    #[must_use]
    pub fn from_spans(spans: Vec<Span>) -> Option<Self> {
        let trace_id = spans.first()?.trace_id.clone();
        let index = spans
            .iter()
            .enumerate()
            .map(|(i, s)| (s.span_id.clone(), i))
            .collect();

        Some(Self {
            trace_id,
            spans,
            index,
        })
    }

    /// Looks up a span by id.
    #[must_use]
    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.index.get(span_id).map(|&i| &self.spans[i])
    }

    /// Returns the first root span, if any.
    #[must_use]
    pub fn root_span(&self) -> Option<&Span> {
        self.spans.iter().find(|s| s.is_root())
    }

    /// Returns the direct children of a span.
    #[must_use]
    pub fn children(&self, span_id: &str) -> Vec<&Span> {
        self.spans
            .iter()
            .filter(|s| s.parent_span_id.as_deref() == Some(span_id))
            .collect()
    }

    /// Returns the spans whose parent was unknown at registration.
    #[must_use]
    pub fn orphans(&self) -> Vec<&Span> {
        self.spans.iter().filter(|s| s.orphaned).collect()
    }

    /// Returns the chain of ancestors of a span, nearest first.
    ///
    /// Stops at a root, at an unknown parent, or when a cycle is detected.
    #[must_use]
    pub fn ancestors(&self, span_id: &str) -> Vec<&Span> {
        let mut chain = Vec::new();
        let mut current = self.span(span_id);
        while let Some(parent_id) = current.and_then(|s| s.parent_span_id.as_deref()) {
            match self.span(parent_id) {
                Some(parent) if chain.len() < self.spans.len() => {
                    chain.push(parent);
                    current = Some(parent);
                }
                _ => break,
            }
        }
        chain
    }

    /// Returns the total duration of the trace (from earliest start to latest end).
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        let start = self.start_time()?;
        let end = self.spans.iter().map(|s| s.end_time).max()?;
        Some(end - start)
    }

    /// Returns the earliest span start.
    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.spans.iter().map(|s| s.start_time).min()
    }

    /// Returns true if any span failed.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.spans.iter().any(|s| s.is_error)
    }

    /// Returns the number of spans in this trace.
    #[must_use]
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Returns all services involved in this trace.
    #[must_use]
    pub fn services(&self) -> Vec<&str> {
        let mut services: Vec<&str> = self.spans.iter().filter_map(|s| s.service.as_deref()).collect();
        services.sort_unstable();
        services.dedup();
        services
    }

    /// Infers whether the trace has finished.
    ///
    /// Traces carry no end marker. A trace is considered complete when it
    /// has a root, no orphaned spans, and nothing ended within `idle` of `now`.
    #[must_use]
    pub fn is_quiescent(&self, idle: Duration, now: DateTime<Utc>) -> bool {
        let Some(last_end) = self.spans.iter().map(|s| s.end_time).max() else {
            return false;
        };
        self.root_span().is_some() && self.orphans().is_empty() && now - last_end >= idle
    }
}
