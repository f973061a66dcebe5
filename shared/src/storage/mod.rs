//! Storage traits and implementations.
//!
//! Each store is a `Send + Sync` trait with an in-memory implementation
//! backed by sharded maps. The persistence engine is pluggable behind the
//! traits.

pub mod audit_store;
pub mod event_store;
pub mod metric_store;
pub mod trace_store;

pub use audit_store::{AuditStore, AuditStoreError, InMemoryAuditStore};
pub use event_store::{EventQuery, EventQueryResult, EventStore, EventStoreError, InMemoryEventStore};
pub use metric_store::{
    AggregateQuery, AggregateQueryResult, InMemoryMetricStore, MetricQuery, MetricQueryResult,
    MetricStore, MetricStoreError,
};
pub use trace_store::{
    InMemoryTraceStore, TraceQuery, TraceQueryResult, TraceStore, TraceStoreError,
};
