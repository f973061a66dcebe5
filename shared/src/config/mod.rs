//! Configuration module for Timbertrace.
//!
//! [`TelemetryConfig`] bundles every section of the pipeline configuration.
//! Each section has defaults and a `validate()` method; the whole
//! configuration is loaded from a JSON file.

pub mod aggregation;
pub mod alerting;
pub mod audit;
pub mod fingerprint;
pub mod retention;
pub mod sessions;

pub use aggregation::{
    AggregationConfig, MetricPolicy, RollupWindow, ThresholdDirection, ThresholdStat,
};
pub use alerting::{AlertingConfig, RetryPolicy};
pub use audit::{AuditConfig, ChainScope, GLOBAL_CHAIN};
pub use fingerprint::{FingerprintConfig, NormalizationRule};
pub use retention::{DataType, RetentionConfig, RetentionPolicy, MAX_TTL_DAYS};
pub use sessions::SessionConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid JSON for the configuration.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A section failed validation.
    #[error("Invalid {section} config: {message}")]
    Invalid {
        /// Section name.
        section: &'static str,
        /// Validation message.
        message: String,
    },
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Metric rollup.
    pub aggregation: AggregationConfig,
    /// Alert evaluation and notification.
    pub alerting: AlertingConfig,
    /// Error fingerprinting.
    pub fingerprint: FingerprintConfig,
    /// Audit chain.
    pub audit: AuditConfig,
    /// Session tracking.
    pub sessions: SessionConfig,
    /// Data expiration.
    pub retention: RetentionConfig,
}

impl TelemetryConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a section is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn section(name: &'static str, result: Result<(), String>) -> Result<(), ConfigError> {
            result.map_err(|message| ConfigError::Invalid {
                section: name,
                message,
            })
        }

        section("aggregation", self.aggregation.validate())?;
        section("alerting", self.alerting.validate())?;
        section("fingerprint", self.fingerprint.validate())?;
        section("audit", self.audit.validate())?;
        section("sessions", self.sessions.validate())?;
        section("retention", self.retention.validate())?;
        Ok(())
    }
}
