//! Trace storage trait and implementations.
//!
//! Provides the `TraceStore` trait for abstracting span storage operations
//! and an `InMemoryTraceStore` implementation. Spans are grouped by
//! `trace_id`; registering a span whose parent is not (yet) known stores it
//! with the `orphaned` flag set.

use crate::models::{Span, Trace};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during trace store operations.
#[derive(Debug, Error)]
pub enum TraceStoreError {
    /// A span with this id is already registered in the trace.
    #[error("Span {span_id} already exists in trace {trace_id}")]
    DuplicateSpan {
        /// Trace of the span.
        trace_id: String,
        /// Duplicated span id.
        span_id: String,
    },

    /// Trace not found.
    #[error("Trace not found: {0}")]
    NotFound(String),

    /// Generic storage error.
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Query parameters for retrieving traces.
#[derive(Debug, Clone, Default)]
pub struct TraceQuery {
    /// Filter by service name.
    pub service: Option<String>,

    /// Filter traces starting from this time (inclusive).
    pub start_time: Option<DateTime<Utc>>,

    /// Filter traces starting before this time (exclusive).
    pub end_time: Option<DateTime<Utc>>,

    /// Minimum duration in milliseconds.
    pub min_duration_ms: Option<i64>,

    /// Maximum duration in milliseconds.
    pub max_duration_ms: Option<i64>,

    /// Only traces containing a failed span.
    pub errors_only: bool,

    /// Maximum number of traces to return.
    pub limit: Option<usize>,

    /// Number of traces to skip (for pagination).
    pub offset: Option<usize>,
}

impl TraceQuery {
    /// Creates a new empty query (returns all traces).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service filter.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the start time filter.
    #[must_use]
    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    /// Sets the end time filter.
    #[must_use]
    pub fn with_end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    /// Sets the minimum duration filter.
    #[must_use]
    pub fn with_min_duration_ms(mut self, ms: i64) -> Self {
        self.min_duration_ms = Some(ms);
        self
    }

    /// Sets the maximum duration filter.
    #[must_use]
    pub fn with_max_duration_ms(mut self, ms: i64) -> Self {
        self.max_duration_ms = Some(ms);
        self
    }

    /// Restricts the result to traces with a failed span.
    #[must_use]
    pub fn errors_only(mut self) -> Self {
        self.errors_only = true;
        self
    }

    /// Sets the maximum number of results.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset for pagination.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    fn matches(&self, trace: &Trace) -> bool {
        if let Some(ref service) = self.service {
            if !trace.services().contains(&service.as_str()) {
                return false;
            }
        }

        let start = trace.start_time();
        if let Some(from) = self.start_time {
            if !matches!(start, Some(s) if s >= from) {
                return false;
            }
        }
        if let Some(to) = self.end_time {
            if !matches!(start, Some(s) if s < to) {
                return false;
            }
        }

        if let Some(duration) = trace.duration() {
            let duration_ms = duration.num_milliseconds();
            if self.min_duration_ms.is_some_and(|min| duration_ms < min) {
                return false;
            }
            if self.max_duration_ms.is_some_and(|max| duration_ms > max) {
                return false;
            }
        }

        !self.errors_only || trace.has_error()
    }
}

/// Result of a trace query operation.
#[derive(Debug, Clone)]
pub struct TraceQueryResult {
    /// The traces matching the query.
    pub traces: Vec<Trace>,

    /// Total count of matching traces (before limit/offset applied).
    pub total_count: usize,
}

/// Trait for trace storage implementations.
///
/// Implementations must be thread-safe (Send + Sync).
pub trait TraceStore: Send + Sync {
    /// Registers a span.
    ///
    /// The parent check and the insert are atomic for the trace: a span is
    /// marked `orphaned` exactly when its `parent_span_id` was not
    /// registered in the same trace beforehand. Returns the stored span.
    ///
    /// # Errors
    ///
    /// Returns an error if the span id is already registered in the trace
    /// or the storage operation fails.
    fn insert_span(&self, span: Span) -> Result<Span, TraceStoreError>;

    /// Returns true if the span is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn contains_span(&self, trace_id: &str, span_id: &str) -> Result<bool, TraceStoreError>;

    /// Removes a span registered for an event whose insert failed. Returns
    /// true if the span was registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn remove_span(&self, trace_id: &str, span_id: &str) -> Result<bool, TraceStoreError>;

    /// Removes every trace whose last span ended before `cutoff`. Returns
    /// the number of removed spans.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TraceStoreError>;

    /// Gets a trace by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the trace is not found or the operation fails.
    fn get_trace(&self, trace_id: &str) -> Result<Trace, TraceStoreError>;

    /// Queries traces based on the provided parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the query operation fails.
    fn query(&self, query: TraceQuery) -> Result<TraceQueryResult, TraceStoreError>;

    /// Returns the total number of spans in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the count operation fails.
    fn span_count(&self) -> Result<usize, TraceStoreError>;

    /// Returns the total number of unique traces in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the count operation fails.
    fn trace_count(&self) -> Result<usize, TraceStoreError>;
}

/// In-memory trace store implementation.
#[derive(Debug, Default)]
pub struct InMemoryTraceStore {
    /// Spans grouped by `trace_id`, in registration order.
    spans: DashMap<String, Vec<Span>>,
}

impl InMemoryTraceStore {
    /// Creates a new empty in-memory trace store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory trace store wrapped in an Arc.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl TraceStore for InMemoryTraceStore {
    fn insert_span(&self, mut span: Span) -> Result<Span, TraceStoreError> {
        // The entry guard holds the shard lock for this trace until the push.
        let mut spans = self.spans.entry(span.trace_id.clone()).or_default();

        if spans.iter().any(|s| s.span_id == span.span_id) {
            return Err(TraceStoreError::DuplicateSpan {
                trace_id: span.trace_id,
                span_id: span.span_id,
            });
        }

        span.orphaned = span
            .parent_span_id
            .as_ref()
            .is_some_and(|parent| !spans.iter().any(|s| &s.span_id == parent));

        spans.push(span.clone());
        Ok(span)
    }

    fn contains_span(&self, trace_id: &str, span_id: &str) -> Result<bool, TraceStoreError> {
        Ok(self
            .spans
            .get(trace_id)
            .is_some_and(|spans| spans.iter().any(|s| s.span_id == span_id)))
    }

    fn remove_span(&self, trace_id: &str, span_id: &str) -> Result<bool, TraceStoreError> {
        let Some(mut spans) = self.spans.get_mut(trace_id) else {
            return Ok(false);
        };
        let before = spans.len();
        spans.retain(|s| s.span_id != span_id);
        let removed = spans.len() < before;
        let empty = spans.is_empty();
        drop(spans);
        if empty {
            self.spans.remove_if(trace_id, |_, spans| spans.is_empty());
        }
        Ok(removed)
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TraceStoreError> {
        let mut removed = 0;
        self.spans.retain(|_, spans| {
            let expired = spans.iter().map(|s| s.end_time).max().map_or(true, |end| end < cutoff);
            if expired {
                removed += spans.len();
            }
            !expired
        });
        Ok(removed)
    }

    fn get_trace(&self, trace_id: &str) -> Result<Trace, TraceStoreError> {
        self.spans
            .get(trace_id)
            .and_then(|s| Trace::from_spans(s.value().clone()))
            .ok_or_else(|| TraceStoreError::NotFound(trace_id.to_string()))
    }

    fn query(&self, query: TraceQuery) -> Result<TraceQueryResult, TraceStoreError> {
        let mut traces: Vec<Trace> = self
            .spans
            .iter()
            .filter_map(|s| Trace::from_spans(s.value().clone()))
            .filter(|trace| query.matches(trace))
            .collect();

        // Sort by start time (most recent first)
        traces.sort_by(|a, b| {
            b.start_time()
                .cmp(&a.start_time())
                .then_with(|| a.trace_id.cmp(&b.trace_id))
        });

        let total_count = traces.len();

        let offset = query.offset.unwrap_or(0);
        let result: Vec<Trace> = traces
            .into_iter()
            .skip(offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(TraceQueryResult {
            traces: result,
            total_count,
        })
    }

    fn span_count(&self) -> Result<usize, TraceStoreError> {
        Ok(self.spans.iter().map(|s| s.value().len()).sum())
    }

    fn trace_count(&self) -> Result<usize, TraceStoreError> {
        Ok(self.spans.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_span(trace_id: &str, span_id: &str, service: &str) -> Span {
        Span::new(trace_id, span_id, "test operation").with_service(service)
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = InMemoryTraceStore::new();
        assert_eq!(store.span_count().unwrap(), 0);
        assert_eq!(store.trace_count().unwrap(), 0);
    }

    #[test]
    fn test_insert_spans_same_trace() {
        let store = InMemoryTraceStore::new();
        store
            .insert_span(create_test_span("trace-1", "span-1", "projects"))
            .unwrap();
        store
            .insert_span(create_test_span("trace-1", "span-2", "invoices").with_parent("span-1"))
            .unwrap();

        assert_eq!(store.span_count().unwrap(), 2);
        assert_eq!(store.trace_count().unwrap(), 1);
        assert!(store.contains_span("trace-1", "span-2").unwrap());
    }

    #[test]
    fn test_known_parent_is_not_orphaned() {
        let store = InMemoryTraceStore::new();
        store
            .insert_span(create_test_span("trace-1", "root", "projects"))
            .unwrap();
        let child = store
            .insert_span(create_test_span("trace-1", "child", "projects").with_parent("root"))
            .unwrap();

        assert!(!child.orphaned);
    }

    #[test]
    fn test_unknown_parent_is_orphaned() {
        let store = InMemoryTraceStore::new();
        let child = store
            .insert_span(create_test_span("trace-1", "child", "projects").with_parent("root"))
            .unwrap();

        assert!(child.orphaned);
        let trace = store.get_trace("trace-1").unwrap();
        assert_eq!(trace.orphans().len(), 1);
    }

    #[test]
    fn test_parent_in_other_trace_is_orphaned() {
        let store = InMemoryTraceStore::new();
        store
            .insert_span(create_test_span("trace-1", "root", "projects"))
            .unwrap();
        let child = store
            .insert_span(create_test_span("trace-2", "child", "projects").with_parent("root"))
            .unwrap();

        assert!(child.orphaned);
    }

    #[test]
    fn test_duplicate_span_rejected() {
        let store = InMemoryTraceStore::new();
        store
            .insert_span(create_test_span("trace-1", "span-1", "projects"))
            .unwrap();
        let result = store.insert_span(create_test_span("trace-1", "span-1", "projects"));

        assert!(matches!(
            result,
            Err(TraceStoreError::DuplicateSpan { .. })
        ));
        assert_eq!(store.span_count().unwrap(), 1);
    }

    #[test]
    fn test_remove_span() {
        let store = InMemoryTraceStore::new();
        store
            .insert_span(create_test_span("trace-1", "root", "projects"))
            .unwrap();
        store
            .insert_span(create_test_span("trace-2", "only", "projects"))
            .unwrap();

        assert!(store.remove_span("trace-2", "only").unwrap());
        assert!(!store.remove_span("trace-2", "only").unwrap());
        assert_eq!(store.trace_count().unwrap(), 1);
        assert!(store.contains_span("trace-1", "root").unwrap());
    }

    #[test]
    fn test_prune_keeps_traces_with_recent_spans() {
        let store = InMemoryTraceStore::new();
        let now = Utc::now();
        let old = now - Duration::days(40);
        store
            .insert_span(
                create_test_span("stale", "root", "api")
                    .with_start_time(old)
                    .with_end_time(old),
            )
            .unwrap();
        store
            .insert_span(
                create_test_span("live", "root", "api")
                    .with_start_time(old)
                    .with_end_time(old),
            )
            .unwrap();
        store
            .insert_span(
                create_test_span("live", "child", "api")
                    .with_parent("root")
                    .with_start_time(now)
                    .with_end_time(now),
            )
            .unwrap();

        let removed = store.prune_before(now - Duration::days(30)).unwrap();

        assert_eq!(removed, 1);
        assert!(store.get_trace("stale").is_err());
        assert_eq!(store.get_trace("live").unwrap().span_count(), 2);
    }

    #[test]
    fn test_get_trace_not_found() {
        let store = InMemoryTraceStore::new();

        let result = store.get_trace("nonexistent");

        assert!(matches!(result, Err(TraceStoreError::NotFound(_))));
    }

    #[test]
    fn test_query_by_service_and_errors() {
        let store = InMemoryTraceStore::new();
        store
            .insert_span(create_test_span("trace-1", "span-1", "payroll"))
            .unwrap();
        store
            .insert_span(create_test_span("trace-2", "span-1", "fleet").with_error(true))
            .unwrap();

        let by_service = store
            .query(TraceQuery::new().with_service("payroll"))
            .unwrap();
        assert_eq!(by_service.total_count, 1);
        assert_eq!(by_service.traces[0].trace_id, "trace-1");

        let failed = store.query(TraceQuery::new().errors_only()).unwrap();
        assert_eq!(failed.total_count, 1);
        assert_eq!(failed.traces[0].trace_id, "trace-2");
    }

    #[test]
    fn test_query_by_duration() {
        let store = InMemoryTraceStore::new();
        let start = Utc::now();
        store
            .insert_span(
                create_test_span("fast", "s", "api")
                    .with_start_time(start)
                    .with_end_time(start + Duration::milliseconds(50)),
            )
            .unwrap();
        store
            .insert_span(
                create_test_span("slow", "s", "api")
                    .with_start_time(start)
                    .with_end_time(start + Duration::milliseconds(900)),
            )
            .unwrap();

        let result = store
            .query(TraceQuery::new().with_min_duration_ms(500))
            .unwrap();
        assert_eq!(result.total_count, 1);
        assert_eq!(result.traces[0].trace_id, "slow");
    }

    #[test]
    fn test_query_pagination() {
        let store = InMemoryTraceStore::new();
        for i in 0..5 {
            store
                .insert_span(create_test_span(&format!("trace-{i}"), "s", "api"))
                .unwrap();
        }

        let result = store
            .query(TraceQuery::new().with_offset(1).with_limit(2))
            .unwrap();
        assert_eq!(result.total_count, 5);
        assert_eq!(result.traces.len(), 2);
    }
}
