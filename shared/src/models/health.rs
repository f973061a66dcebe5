//! Health check results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Outcome of a health check, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational with reduced quality.
    Degraded,
    /// Not operational.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    /// Median latency.
    pub p50_ms: f64,
    /// 95th percentile latency.
    pub p95_ms: f64,
    /// 99th percentile latency.
    pub p99_ms: f64,
}

/// Resource usage at check time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU usage in percent.
    pub cpu_percent: f64,
    /// Resident memory in megabytes.
    pub memory_mb: f64,
    /// Disk usage in percent.
    pub disk_percent: f64,
}

/// One health check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct HealthCheckResult {
    /// Check name (e.g. `database`, `pdf_renderer`).
    #[validate(length(min = 1, message = "Check name cannot be empty"))]
    pub check_name: String,
    /// Outcome.
    pub status: HealthStatus,
    /// Latency percentiles.
    #[serde(default)]
    pub latency: LatencyPercentiles,
    /// Resource usage.
    #[serde(default)]
    pub resources: ResourceUsage,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the check ran.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Errors that can occur during health result validation.
#[derive(Debug, Error)]
pub enum HealthValidationError {
    /// The check name is empty.
    #[error("Check name cannot be empty")]
    EmptyCheckName,

    /// A latency or resource figure is negative or not finite.
    #[error("Health figures must be finite and non-negative")]
    InvalidFigure,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl HealthCheckResult {
    /// Creates a result taken now.
    #[must_use]
    pub fn new(check_name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            check_name: check_name.into(),
            status,
            latency: LatencyPercentiles::default(),
            resources: ResourceUsage::default(),
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the latency percentiles.
    #[must_use]
    pub fn with_latency(mut self, latency: LatencyPercentiles) -> Self {
        self.latency = latency;
        self
    }

    /// Validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or a figure is invalid.
    pub fn validate_result(&self) -> Result<(), HealthValidationError> {
        if self.check_name.trim().is_empty() {
            return Err(HealthValidationError::EmptyCheckName);
        }
        let figures = [
            self.latency.p50_ms,
            self.latency.p95_ms,
            self.latency.p99_ms,
            self.resources.cpu_percent,
            self.resources.memory_mb,
            self.resources.disk_percent,
        ];
        if figures.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(HealthValidationError::InvalidFigure);
        }
        self.validate()?;
        Ok(())
    }
}
