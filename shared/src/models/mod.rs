//! Data models for the Timbertrace telemetry pipeline.
//!
//! This module contains the core data structures for events, spans,
//! metrics, errors, audit entries, alerts, sessions and health checks.

pub mod alert;
pub mod audit;
pub mod error;
pub mod event;
pub mod health;
pub mod metric;
pub mod session;
pub mod trace;

pub use alert::{Alert, AlertCondition, AlertDefinition, AlertState, AlertTransitionError};
pub use audit::{
    Actor, AuditAction, AuditEntry, AuditValidationError, FieldValues, NewAuditEntry,
    GENESIS_CHECKSUM,
};
pub use error::{ErrorOccurrence, ErrorOccurrenceValidationError, ErrorRecord, StackFrame};
pub use event::{
    BusinessDetails, ErrorDetails, Event, EventCategory, EventDetails, EventId, EventSource,
    EventValidationError, OrphanReason, PerformanceDetails, SecurityDetails, Severity,
    StoredEvent, UserActionDetails,
};
pub use health::{
    HealthCheckResult, HealthStatus, HealthValidationError, LatencyPercentiles, ResourceUsage,
};
pub use metric::{
    AggregateKey, AnomalyLevel, Labels, MetricAggregate, MetricSample, MetricType,
    MetricValidationError,
};
pub use session::{Activity, EndReason, Session};
pub use trace::{Span, SpanValidationError, Trace};
