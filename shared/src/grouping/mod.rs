//! Error grouping.
//!
//! [`ErrorGrouper`] folds raw [`ErrorOccurrence`]s into one [`ErrorRecord`]
//! per `(fingerprint, environment)`. Lookup-or-create runs under the map's
//! per-key entry lock, so concurrent occurrences of one error never create
//! two records or lose a count.

pub mod fingerprint;

pub use fingerprint::Fingerprinter;

use crate::config::FingerprintConfig;
use crate::models::{ErrorOccurrence, ErrorOccurrenceValidationError, ErrorRecord};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur during error grouping.
#[derive(Debug, Error)]
pub enum GroupingError {
    /// The occurrence is malformed.
    #[error("Invalid error occurrence: {0}")]
    InvalidOccurrence(#[from] ErrorOccurrenceValidationError),

    /// A normalization rule does not compile.
    #[error("{0}")]
    InvalidRule(String),

    /// No record exists for the fingerprint in the environment.
    #[error("Error record not found: {error_hash} in {environment}")]
    NotFound {
        /// Fingerprint.
        error_hash: String,
        /// Environment.
        environment: String,
    },
}

/// Query parameters for retrieving error records.
#[derive(Debug, Clone, Default)]
pub struct ErrorQuery {
    /// Filter by environment.
    pub environment: Option<String>,

    /// Filter by resolved flag.
    pub resolved: Option<bool>,

    /// Filter records last seen from this time (inclusive).
    pub start_time: Option<DateTime<Utc>>,

    /// Filter records last seen before this time (exclusive).
    pub end_time: Option<DateTime<Utc>>,

    /// Maximum number of records to return.
    pub limit: Option<usize>,

    /// Number of records to skip (for pagination).
    pub offset: Option<usize>,
}

impl ErrorQuery {
    /// Creates a new empty query (returns all records).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the environment filter.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Sets the resolved filter.
    #[must_use]
    pub fn with_resolved(mut self, resolved: bool) -> Self {
        self.resolved = Some(resolved);
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

    fn matches(&self, record: &ErrorRecord) -> bool {
        if let Some(ref environment) = self.environment {
            if &record.environment != environment {
                return false;
            }
        }
        if self.resolved.is_some_and(|r| r != record.is_resolved) {
            return false;
        }
        if self.start_time.is_some_and(|s| record.last_seen < s) {
            return false;
        }
        if self.end_time.is_some_and(|e| record.last_seen >= e) {
            return false;
        }
        true
    }
}

/// Result of an error record query.
#[derive(Debug, Clone)]
pub struct ErrorQueryResult {
    /// Matching records, most recently seen first.
    pub records: Vec<ErrorRecord>,

    /// Total count of matching records (before limit/offset applied).
    pub total_count: usize,
}

/// Groups error occurrences into deduplicated records.
#[derive(Debug)]
pub struct ErrorGrouper {
    fingerprinter: Fingerprinter,
    records: DashMap<(String, String), ErrorRecord>,
}

impl ErrorGrouper {
    /// Creates a grouper with the given fingerprint configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a normalization rule does not compile.
    pub fn new(config: &FingerprintConfig) -> Result<Self, GroupingError> {
        Ok(Self {
            fingerprinter: Fingerprinter::new(config).map_err(GroupingError::InvalidRule)?,
            records: DashMap::new(),
        })
    }

    /// The fingerprinter used by this grouper.
    #[must_use]
    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    /// Records an occurrence and returns the updated record.
    ///
    /// Occurrences may arrive out of order: `first_seen` and `last_seen`
    /// only ever widen. An occurrence of a resolved error reopens it.
    ///
    /// # Errors
    ///
    /// Returns an error if the occurrence is invalid.
    pub fn record_error(&self, occurrence: ErrorOccurrence) -> Result<ErrorRecord, GroupingError> {
        occurrence.validate_occurrence()?;

        let (error_hash, normalized_message) = self.fingerprinter.compute(
            &occurrence.error_type,
            &occurrence.message,
            &occurrence.stack,
        );
        let ts = occurrence.timestamp;

        match self
            .records
            .entry((error_hash.clone(), occurrence.environment.clone()))
        {
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                record.occurrence_count += 1;
                record.last_seen = record.last_seen.max(ts);
                record.first_seen = record.first_seen.min(ts);
                if record.is_resolved {
                    record.is_resolved = false;
                    record.reopen_count += 1;
                    info!(
                        error_hash = %record.error_hash,
                        environment = %record.environment,
                        reopen_count = record.reopen_count,
                        "Resolved error reoccurred"
                    );
                } else {
                    debug!(
                        error_hash = %record.error_hash,
                        occurrence_count = record.occurrence_count,
                        "Error occurrence grouped"
                    );
                }
                Ok(record.clone())
            }
            Entry::Vacant(slot) => {
                let record = ErrorRecord {
                    error_hash,
                    environment: occurrence.environment,
                    error_type: occurrence.error_type,
                    message: occurrence.message,
                    normalized_message,
                    occurrence_count: 1,
                    first_seen: ts,
                    last_seen: ts,
                    is_resolved: false,
                    resolved_at: None,
                    reopen_count: 0,
                };
                info!(
                    error_hash = %record.error_hash,
                    environment = %record.environment,
                    error_type = %record.error_type,
                    "New error group"
                );
                Ok(slot.insert(record).clone())
            }
        }
    }

    /// Marks a record resolved. Resolving a resolved record is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if no record exists.
    pub fn resolve(
        &self,
        error_hash: &str,
        environment: &str,
        at: DateTime<Utc>,
    ) -> Result<ErrorRecord, GroupingError> {
        let mut record = self
            .records
            .get_mut(&(error_hash.to_string(), environment.to_string()))
            .ok_or_else(|| GroupingError::NotFound {
                error_hash: error_hash.to_string(),
                environment: environment.to_string(),
            })?;
        if !record.is_resolved {
            record.is_resolved = true;
            record.resolved_at = Some(at);
            info!(error_hash, environment, "Error resolved");
        }
        Ok(record.clone())
    }

    /// Gets a record.
    ///
    /// # Errors
    ///
    /// Returns an error if no record exists.
    pub fn get(&self, error_hash: &str, environment: &str) -> Result<ErrorRecord, GroupingError> {
        self.records
            .get(&(error_hash.to_string(), environment.to_string()))
            .map(|r| r.value().clone())
            .ok_or_else(|| GroupingError::NotFound {
                error_hash: error_hash.to_string(),
                environment: environment.to_string(),
            })
    }

    /// Queries records.
    #[must_use]
    pub fn query(&self, query: &ErrorQuery) -> ErrorQueryResult {
        let mut records: Vec<ErrorRecord> = self
            .records
            .iter()
            .filter(|r| query.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();

        records.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.error_hash.cmp(&b.error_hash))
        });

        let total_count = records.len();
        let records = records
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        ErrorQueryResult {
            records,
            total_count,
        }
    }
}
