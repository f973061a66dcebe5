//! Metric sample and aggregate models.
//!
//! A [`MetricSample`] is a single raw measurement. A [`MetricAggregate`] is
//! the statistical summary of all samples of one series inside one rollup
//! period.

use crate::config::RollupWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use validator::Validate;

/// Metric labels. Ordered so that a label set has one canonical form.
pub type Labels = BTreeMap<String, String>;

/// Type of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// A counter that only increases (e.g., request count).
    Counter,
    /// A gauge that can go up or down (e.g., open sessions).
    Gauge,
    /// An observation feeding a distribution.
    Histogram,
    /// A pre-computed quantile observation.
    Summary,
    /// An elapsed time in milliseconds.
    Timer,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Counter => write!(f, "counter"),
            Self::Gauge => write!(f, "gauge"),
            Self::Histogram => write!(f, "histogram"),
            Self::Summary => write!(f, "summary"),
            Self::Timer => write!(f, "timer"),
        }
    }
}

impl Default for MetricType {
    fn default() -> Self {
        Self::Gauge
    }
}

/// A raw metric data point.
///
/// # Example
///
/// ```
/// use shared::models::{MetricSample, MetricType};
///
/// let sample = MetricSample::new("invoice_export_ms", MetricType::Timer, 412.0)
///     .with_label("format", "pdf");
///
/// assert!(sample.validate_sample().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MetricSample {
    /// The name of the metric (e.g. "`http_requests_total`").
    #[validate(length(min = 1, message = "Metric name cannot be empty"))]
    pub metric_name: String,

    /// The type of metric.
    #[serde(default, rename = "type")]
    pub metric_type: MetricType,

    /// The measured value.
    pub value: f64,

    /// Labels (dimensions) for the metric.
    #[serde(default)]
    pub labels: Labels,

    /// Timestamp when the sample was taken.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Errors that can occur during metric validation.
#[derive(Debug, Error)]
pub enum MetricValidationError {
    /// The metric name is empty.
    #[error("Metric name cannot be empty")]
    EmptyName,

    /// Invalid label name.
    #[error("Invalid label name: '{0}'")]
    InvalidLabelName(String),

    /// The value is NaN or infinite.
    #[error("Metric value must be finite")]
    NonFiniteValue,

    /// A counter sample is negative.
    #[error("Counter samples cannot be negative")]
    NegativeCounter,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl MetricSample {
    /// Creates a new sample with the current timestamp.
    #[must_use]
    pub fn new(metric_name: impl Into<String>, metric_type: MetricType, value: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            metric_type,
            value,
            labels: Labels::new(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a new counter sample.
    #[must_use]
    pub fn counter(metric_name: impl Into<String>, value: f64) -> Self {
        Self::new(metric_name, MetricType::Counter, value)
    }

    /// Creates a new gauge sample.
    #[must_use]
    pub fn gauge(metric_name: impl Into<String>, value: f64) -> Self {
        Self::new(metric_name, MetricType::Gauge, value)
    }

    /// Creates a new timer sample.
    #[must_use]
    pub fn timer(metric_name: impl Into<String>, millis: f64) -> Self {
        Self::new(metric_name, MetricType::Timer, millis)
    }

    /// Adds a label to the sample.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Validates the sample.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The name is empty
    /// - A label key is empty or contains whitespace
    /// - The value is not finite
    /// - A counter sample is negative
    pub fn validate_sample(&self) -> Result<(), MetricValidationError> {
        if self.metric_name.is_empty() {
            return Err(MetricValidationError::EmptyName);
        }
        if let Some(key) = self
            .labels
            .keys()
            .find(|k| k.is_empty() || k.chars().any(char::is_whitespace))
        {
            return Err(MetricValidationError::InvalidLabelName(key.clone()));
        }
        if !self.value.is_finite() {
            return Err(MetricValidationError::NonFiniteValue);
        }
        if self.metric_type == MetricType::Counter && self.value < 0.0 {
            return Err(MetricValidationError::NegativeCounter);
        }
        self.validate()?;
        Ok(())
    }
}

/// Identity of an aggregate: one per series, window and period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    /// Metric name.
    pub metric_name: String,
    /// Label set of the series.
    pub labels: Labels,
    /// Rollup window.
    pub window: RollupWindow,
    /// Start of the period (inclusive).
    pub period_start: DateTime<Utc>,
}

/// Threshold level crossed by an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyLevel {
    /// The warning threshold was crossed.
    Warning,
    /// The critical threshold was crossed.
    Critical,
}

/// Statistical summary of one series over one rollup period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    /// Metric name.
    pub metric_name: String,
    /// Type of the underlying samples.
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// Label set of the series.
    pub labels: Labels,
    /// Rollup window.
    pub window: RollupWindow,
    /// Start of the period (inclusive).
    pub period_start: DateTime<Utc>,
    /// End of the period (exclusive).
    pub period_end: DateTime<Utc>,
    /// Number of samples.
    pub count: u64,
    /// Sum of sample values.
    pub sum: f64,
    /// Smallest sample value.
    pub min: f64,
    /// Largest sample value.
    pub max: f64,
    /// Mean sample value.
    pub avg: f64,
    /// Whether a configured threshold was crossed.
    pub is_anomaly: bool,
    /// Highest threshold crossed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_level: Option<AnomalyLevel>,
}

impl MetricAggregate {
    /// Returns the identity of this aggregate.
    #[must_use]
    pub fn key(&self) -> AggregateKey {
        AggregateKey {
            metric_name: self.metric_name.clone(),
            labels: self.labels.clone(),
            window: self.window,
            period_start: self.period_start,
        }
    }
}
