//! Metric storage trait and implementations.
//!
//! The store holds raw samples, indexed by `(metric_name, timestamp)`, and
//! rolled-up aggregates keyed by series, window and period. Writing an
//! aggregate replaces any earlier aggregate with the same key.

use crate::config::RollupWindow;
use crate::models::{AggregateKey, Labels, MetricAggregate, MetricSample, MetricType};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during metric store operations.
#[derive(Debug, Error)]
pub enum MetricStoreError {
    /// Metric not found.
    #[error("Metric not found: {0}")]
    NotFound(String),

    /// Generic storage error.
    #[error("Storage error: {0}")]
    StorageError(String),
}

fn labels_match(filter: &Labels, labels: &Labels) -> bool {
    filter.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Query parameters for retrieving raw samples.
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    /// Filter by metric name.
    pub name: Option<String>,

    /// Filter by metric type.
    pub metric_type: Option<MetricType>,

    /// Filter samples from this time (inclusive).
    pub start_time: Option<DateTime<Utc>>,

    /// Filter samples up to this time (exclusive).
    pub end_time: Option<DateTime<Utc>>,

    /// Samples must carry all of these labels.
    pub labels: Labels,

    /// Maximum number of samples to return.
    pub limit: Option<usize>,

    /// Number of samples to skip (for pagination).
    pub offset: Option<usize>,
}

impl MetricQuery {
    /// Creates a new empty query (returns all samples).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the metric name filter.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the metric type filter.
    #[must_use]
    pub fn with_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = Some(metric_type);
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

    /// Adds a label filter.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
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

    fn matches(&self, sample: &MetricSample) -> bool {
        if self.metric_type.is_some_and(|t| t != sample.metric_type) {
            return false;
        }
        if self.start_time.is_some_and(|s| sample.timestamp < s) {
            return false;
        }
        if self.end_time.is_some_and(|e| sample.timestamp >= e) {
            return false;
        }
        labels_match(&self.labels, &sample.labels)
    }
}

/// Result of a sample query operation.
#[derive(Debug, Clone)]
pub struct MetricQueryResult {
    /// The samples matching the query, most recent first.
    pub samples: Vec<MetricSample>,

    /// Total count of matching samples (before limit/offset applied).
    pub total_count: usize,
}

/// Query parameters for retrieving aggregates.
#[derive(Debug, Clone, Default)]
pub struct AggregateQuery {
    /// Filter by metric name.
    pub name: Option<String>,

    /// Filter by rollup window.
    pub window: Option<RollupWindow>,

    /// Aggregates must carry all of these labels.
    pub labels: Labels,

    /// Only anomalous aggregates.
    pub anomalies_only: bool,

    /// Filter periods starting from this time (inclusive).
    pub start_time: Option<DateTime<Utc>>,

    /// Filter periods starting before this time (exclusive).
    pub end_time: Option<DateTime<Utc>>,

    /// Maximum number of aggregates to return.
    pub limit: Option<usize>,

    /// Number of aggregates to skip (for pagination).
    pub offset: Option<usize>,
}

impl AggregateQuery {
    /// Creates a new empty query (returns all aggregates).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the metric name filter.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the window filter.
    #[must_use]
    pub fn with_window(mut self, window: RollupWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Adds a label filter.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Restricts the result to anomalous aggregates.
    #[must_use]
    pub fn anomalies_only(mut self) -> Self {
        self.anomalies_only = true;
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

    fn matches(&self, aggregate: &MetricAggregate) -> bool {
        if let Some(ref name) = self.name {
            if &aggregate.metric_name != name {
                return false;
            }
        }
        if self.window.is_some_and(|w| w != aggregate.window) {
            return false;
        }
        if self.anomalies_only && !aggregate.is_anomaly {
            return false;
        }
        if self.start_time.is_some_and(|s| aggregate.period_start < s) {
            return false;
        }
        if self.end_time.is_some_and(|e| aggregate.period_start >= e) {
            return false;
        }
        labels_match(&self.labels, &aggregate.labels)
    }
}

/// Result of an aggregate query operation.
#[derive(Debug, Clone)]
pub struct AggregateQueryResult {
    /// The aggregates matching the query, most recent period first.
    pub aggregates: Vec<MetricAggregate>,

    /// Total count of matching aggregates (before limit/offset applied).
    pub total_count: usize,
}

/// Trait for metric storage implementations.
///
/// Implementations must be thread-safe (Send + Sync).
pub trait MetricStore: Send + Sync {
    /// Inserts a raw sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn insert_sample(&self, sample: MetricSample) -> Result<(), MetricStoreError>;

    /// Returns the samples of a metric with `start <= timestamp < end`.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    fn samples_in_range(
        &self,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, MetricStoreError>;

    /// Returns the names of all metrics with samples, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    fn metric_names(&self) -> Result<Vec<String>, MetricStoreError>;

    /// Queries raw samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the query operation fails.
    fn query_samples(&self, query: MetricQuery) -> Result<MetricQueryResult, MetricStoreError>;

    /// Writes an aggregate, replacing any aggregate with the same key.
    /// Returns the replaced aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn upsert_aggregate(
        &self,
        aggregate: MetricAggregate,
    ) -> Result<Option<MetricAggregate>, MetricStoreError>;

    /// Gets the aggregate with the given key.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregate is not found.
    fn get_aggregate(&self, key: &AggregateKey) -> Result<MetricAggregate, MetricStoreError>;

    /// Queries aggregates.
    ///
    /// # Errors
    ///
    /// Returns an error if the query operation fails.
    fn query_aggregates(
        &self,
        query: AggregateQuery,
    ) -> Result<AggregateQueryResult, MetricStoreError>;

    /// Returns the most recent aggregate of every series of a metric in a
    /// window.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    fn latest_aggregates(
        &self,
        metric_name: &str,
        window: RollupWindow,
    ) -> Result<Vec<MetricAggregate>, MetricStoreError>;

    /// Returns the total number of raw samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the count operation fails.
    fn sample_count(&self) -> Result<usize, MetricStoreError>;

    /// Timestamp of the oldest stored sample of any metric.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    fn earliest_sample_time(&self) -> Result<Option<DateTime<Utc>>, MetricStoreError>;

    /// Removes every raw sample older than `cutoff`. Returns the number of
    /// removed samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn prune_samples_before(&self, cutoff: DateTime<Utc>) -> Result<usize, MetricStoreError>;

    /// Removes every aggregate whose period ended before `cutoff`. Returns
    /// the number of removed aggregates.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn prune_aggregates_before(&self, cutoff: DateTime<Utc>) -> Result<usize, MetricStoreError>;
}

/// In-memory metric store implementation.
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    /// Raw samples grouped by metric name, ordered by timestamp.
    samples: DashMap<String, Vec<MetricSample>>,
    /// Aggregates by key.
    aggregates: DashMap<AggregateKey, MetricAggregate>,
}

impl InMemoryMetricStore {
    /// Creates a new empty in-memory metric store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory metric store wrapped in an Arc.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl MetricStore for InMemoryMetricStore {
    fn insert_sample(&self, sample: MetricSample) -> Result<(), MetricStoreError> {
        let mut samples = self.samples.entry(sample.metric_name.clone()).or_default();
        let at = samples.partition_point(|s| s.timestamp <= sample.timestamp);
        samples.insert(at, sample);
        Ok(())
    }

    fn samples_in_range(
        &self,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, MetricStoreError> {
        Ok(self
            .samples
            .get(metric_name)
            .map(|samples| {
                let from = samples.partition_point(|s| s.timestamp < start);
                let to = samples.partition_point(|s| s.timestamp < end);
                samples[from..to.max(from)].to_vec()
            })
            .unwrap_or_default())
    }

    fn metric_names(&self) -> Result<Vec<String>, MetricStoreError> {
        let mut names: Vec<String> = self.samples.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        Ok(names)
    }

    fn query_samples(&self, query: MetricQuery) -> Result<MetricQueryResult, MetricStoreError> {
        let mut samples: Vec<MetricSample> = self
            .samples
            .iter()
            .filter(|e| !matches!(&query.name, Some(name) if name != e.key()))
            .flat_map(|e| {
                e.value()
                    .iter()
                    .filter(|s| query.matches(s))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        // Sort by timestamp (most recent first)
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total_count = samples.len();
        let offset = query.offset.unwrap_or(0);
        let samples = samples
            .into_iter()
            .skip(offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(MetricQueryResult {
            samples,
            total_count,
        })
    }

    fn upsert_aggregate(
        &self,
        aggregate: MetricAggregate,
    ) -> Result<Option<MetricAggregate>, MetricStoreError> {
        Ok(self.aggregates.insert(aggregate.key(), aggregate))
    }

    fn get_aggregate(&self, key: &AggregateKey) -> Result<MetricAggregate, MetricStoreError> {
        self.aggregates
            .get(key)
            .map(|a| a.value().clone())
            .ok_or_else(|| {
                MetricStoreError::NotFound(format!(
                    "{} {} {}",
                    key.metric_name, key.window, key.period_start
                ))
            })
    }

    fn query_aggregates(
        &self,
        query: AggregateQuery,
    ) -> Result<AggregateQueryResult, MetricStoreError> {
        let mut aggregates: Vec<MetricAggregate> = self
            .aggregates
            .iter()
            .filter(|e| query.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();

        aggregates.sort_by(|a, b| {
            b.period_start
                .cmp(&a.period_start)
                .then_with(|| a.metric_name.cmp(&b.metric_name))
                .then_with(|| a.window.cmp(&b.window))
                .then_with(|| a.labels.cmp(&b.labels))
        });

        let total_count = aggregates.len();
        let offset = query.offset.unwrap_or(0);
        let aggregates = aggregates
            .into_iter()
            .skip(offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(AggregateQueryResult {
            aggregates,
            total_count,
        })
    }

    fn latest_aggregates(
        &self,
        metric_name: &str,
        window: RollupWindow,
    ) -> Result<Vec<MetricAggregate>, MetricStoreError> {
        let mut latest: BTreeMap<Labels, MetricAggregate> = BTreeMap::new();
        for entry in &self.aggregates {
            let aggregate = entry.value();
            if aggregate.metric_name != metric_name || aggregate.window != window {
                continue;
            }
            let superseded = matches!(
                latest.get(&aggregate.labels),
                Some(current) if current.period_start >= aggregate.period_start
            );
            if !superseded {
                latest.insert(aggregate.labels.clone(), aggregate.clone());
            }
        }
        Ok(latest.into_values().collect())
    }

    fn sample_count(&self) -> Result<usize, MetricStoreError> {
        Ok(self.samples.iter().map(|e| e.value().len()).sum())
    }

    fn earliest_sample_time(&self) -> Result<Option<DateTime<Utc>>, MetricStoreError> {
        Ok(self
            .samples
            .iter()
            .filter_map(|e| e.value().first().map(|s| s.timestamp))
            .min())
    }

    fn prune_samples_before(&self, cutoff: DateTime<Utc>) -> Result<usize, MetricStoreError> {
        let mut removed = 0;
        self.samples.retain(|_, samples| {
            let expired = samples.partition_point(|s| s.timestamp < cutoff);
            samples.drain(..expired);
            removed += expired;
            !samples.is_empty()
        });
        Ok(removed)
    }

    fn prune_aggregates_before(&self, cutoff: DateTime<Utc>) -> Result<usize, MetricStoreError> {
        let before = self.aggregates.len();
        self.aggregates.retain(|_, a| a.period_end >= cutoff);
        Ok(before.saturating_sub(self.aggregates.len()))
    }
}
