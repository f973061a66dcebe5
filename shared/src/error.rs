//! Crate-level error type.

use crate::aggregation::AggregationError;
use crate::alerting::AlertError;
use crate::audit::AuditError;
use crate::config::ConfigError;
use crate::grouping::GroupingError;
use crate::ingest::IngestError;
use crate::sessions::{HealthError, SessionError};
use crate::storage::{AuditStoreError, MetricStoreError};
use thiserror::Error;

/// Any error raised by the telemetry pipeline.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Event or span ingestion failed.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Metric recording or rollup failed.
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    /// Error grouping failed.
    #[error(transparent)]
    Grouping(#[from] GroupingError),

    /// An audit operation failed.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// A session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Recording a health check failed.
    #[error(transparent)]
    Health(#[from] HealthError),

    /// An alert operation failed.
    #[error(transparent)]
    Alert(#[from] AlertError),

    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Broad classification of a [`TelemetryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input was rejected; nothing was stored.
    Validation,
    /// The referenced item does not exist.
    NotFound,
    /// The operation conflicts with current state.
    Conflict,
    /// An audit chain failed verification.
    Integrity,
    /// A store failed.
    Storage,
}

fn metric_store_kind(err: &MetricStoreError) -> ErrorKind {
    match err {
        MetricStoreError::NotFound(_) => ErrorKind::NotFound,
        MetricStoreError::StorageError(_) => ErrorKind::Storage,
    }
}

fn audit_store_kind(err: &AuditStoreError) -> ErrorKind {
    match err {
        AuditStoreError::NotFound { .. } => ErrorKind::NotFound,
        AuditStoreError::SequenceMismatch { .. } => ErrorKind::Conflict,
        AuditStoreError::StorageError(_) => ErrorKind::Storage,
    }
}

impl TelemetryError {
    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ingest(e) if e.is_validation() => ErrorKind::Validation,
            Self::Ingest(_) => ErrorKind::Storage,
            Self::Aggregation(AggregationError::Conflict { .. }) => ErrorKind::Conflict,
            Self::Aggregation(AggregationError::Store(e)) => metric_store_kind(e),
            Self::Aggregation(_) => ErrorKind::Validation,
            Self::Grouping(GroupingError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Grouping(_) => ErrorKind::Validation,
            Self::Audit(AuditError::ChainIntegrity { .. }) => ErrorKind::Integrity,
            Self::Audit(AuditError::Store(e)) => audit_store_kind(e),
            Self::Audit(AuditError::Serialization(_)) => ErrorKind::Storage,
            Self::Audit(_) => ErrorKind::Validation,
            Self::Session(SessionError::NotFound(_)) => ErrorKind::NotFound,
            Self::Session(SessionError::AlreadyEnded { .. }) => ErrorKind::Conflict,
            Self::Session(SessionError::MissingUser)
            | Self::Health(_)
            | Self::Config(_) => ErrorKind::Validation,
            Self::Alert(AlertError::NotFound(_)) => ErrorKind::NotFound,
            Self::Alert(AlertError::Transition(_)) => ErrorKind::Conflict,
        }
    }

    /// Returns true if the input itself was rejected.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RollupWindow;
    use crate::models::{AlertState, AlertTransitionError, EndReason};

    #[test]
    fn test_kind_classification() {
        let conflict: TelemetryError = AggregationError::Conflict {
            metric_name: "export_ms".to_string(),
            window: RollupWindow::OneMinute,
        }
        .into();
        assert_eq!(conflict.kind(), ErrorKind::Conflict);

        let ended: TelemetryError = SessionError::AlreadyEnded {
            token: "t".to_string(),
            reason: EndReason::Logout,
        }
        .into();
        assert_eq!(ended.kind(), ErrorKind::Conflict);

        let transition: TelemetryError = AlertError::from(AlertTransitionError {
            from: AlertState::Inactive,
            to: AlertState::Resolved,
        })
        .into();
        assert_eq!(transition.kind(), ErrorKind::Conflict);

        let integrity: TelemetryError = AuditError::ChainIntegrity {
            chain: "_global".to_string(),
            first_invalid: 3,
        }
        .into();
        assert_eq!(integrity.kind(), ErrorKind::Integrity);

        let missing: TelemetryError = SessionError::NotFound("t".to_string()).into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(TelemetryError::from(SessionError::MissingUser).is_validation());
    }
}
