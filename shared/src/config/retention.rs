//! Retention configuration for data expiration policies.
//!
//! Every kind of stored telemetry has its own time-to-live. The audit chain
//! is append-only and is never expired.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest allowed TTL (10 years).
pub const MAX_TTL_DAYS: u32 = 3650;

/// Kinds of telemetry with a retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Stored events.
    Events,
    /// Trace spans.
    Traces,
    /// Raw metric samples.
    Samples,
    /// Rolled-up metric aggregates.
    Aggregates,
    /// Ended user sessions.
    Sessions,
    /// Health check history.
    HealthChecks,
}

/// Retention policy for one data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// The data type this policy applies to.
    pub data_type: DataType,
    /// Time-to-live in days.
    pub ttl_days: u32,
}

impl RetentionPolicy {
    /// Creates a new retention policy.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared::config::{DataType, RetentionPolicy};
    ///
    /// let policy = RetentionPolicy::new(DataType::Events, 30);
    /// assert_eq!(policy.as_duration().as_secs(), 30 * 24 * 60 * 60);
    /// ```
    #[must_use]
    pub const fn new(data_type: DataType, ttl_days: u32) -> Self {
        Self {
            data_type,
            ttl_days,
        }
    }

    /// Returns the TTL as a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.ttl_days) * 24 * 60 * 60)
    }

    /// Validates the retention policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the TTL is zero or exceeds [`MAX_TTL_DAYS`].
    pub fn validate(&self) -> Result<(), String> {
        if self.ttl_days == 0 {
            return Err(format!("TTL of {:?} must be greater than zero", self.data_type));
        }
        if self.ttl_days > MAX_TTL_DAYS {
            return Err(format!(
                "TTL of {:?} cannot exceed {MAX_TTL_DAYS} days",
                self.data_type
            ));
        }
        Ok(())
    }
}

/// Retention configuration for all data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Retention of events.
    pub events: RetentionPolicy,
    /// Retention of traces, measured from the end of their last span.
    pub traces: RetentionPolicy,
    /// Retention of raw metric samples.
    pub samples: RetentionPolicy,
    /// Retention of metric aggregates, measured from the end of their period.
    pub aggregates: RetentionPolicy,
    /// Retention of ended sessions, measured from their end.
    pub sessions: RetentionPolicy,
    /// Retention of health check history. The latest result of a check is
    /// always kept.
    pub health_checks: RetentionPolicy,
    /// How often the prune job runs, in seconds.
    pub prune_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            events: RetentionPolicy::new(DataType::Events, 30),
            traces: RetentionPolicy::new(DataType::Traces, 30),
            samples: RetentionPolicy::new(DataType::Samples, 2),
            aggregates: RetentionPolicy::new(DataType::Aggregates, 90),
            sessions: RetentionPolicy::new(DataType::Sessions, 30),
            health_checks: RetentionPolicy::new(DataType::HealthChecks, 30),
            prune_interval_secs: 3600,
        }
    }
}

impl RetentionConfig {
    /// Validates all retention policies.
    ///
    /// # Errors
    ///
    /// Returns an error if a policy is invalid, a policy sits in the wrong
    /// slot, or the prune interval is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.prune_interval_secs == 0 {
            return Err("Prune interval must be greater than zero".to_string());
        }
        for (expected, policy) in self.policies() {
            if policy.data_type != expected {
                return Err(format!(
                    "Policy for {:?} is configured as {expected:?}",
                    policy.data_type
                ));
            }
            policy.validate()?;
        }
        Ok(())
    }

    /// Gets the retention policy for a data type.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared::config::{DataType, RetentionConfig};
    ///
    /// let config = RetentionConfig::default();
    /// assert_eq!(config.get_policy(DataType::Aggregates).ttl_days, 90);
    /// ```
    #[must_use]
    pub fn get_policy(&self, data_type: DataType) -> &RetentionPolicy {
        match data_type {
            DataType::Events => &self.events,
            DataType::Traces => &self.traces,
            DataType::Samples => &self.samples,
            DataType::Aggregates => &self.aggregates,
            DataType::Sessions => &self.sessions,
            DataType::HealthChecks => &self.health_checks,
        }
    }

    /// Replaces the TTL of a data type.
    ///
    /// # Errors
    ///
    /// Returns an error if the TTL is invalid; the config is left unchanged.
    pub fn update_policy(&mut self, data_type: DataType, ttl_days: u32) -> Result<(), String> {
        let policy = RetentionPolicy::new(data_type, ttl_days);
        policy.validate()?;
        let slot = match data_type {
            DataType::Events => &mut self.events,
            DataType::Traces => &mut self.traces,
            DataType::Samples => &mut self.samples,
            DataType::Aggregates => &mut self.aggregates,
            DataType::Sessions => &mut self.sessions,
            DataType::HealthChecks => &mut self.health_checks,
        };
        *slot = policy;
        Ok(())
    }

    /// Prune interval as a duration.
    #[must_use]
    pub const fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    fn policies(&self) -> [(DataType, &RetentionPolicy); 6] {
        [
            (DataType::Events, &self.events),
            (DataType::Traces, &self.traces),
            (DataType::Samples, &self.samples),
            (DataType::Aggregates, &self.aggregates),
            (DataType::Sessions, &self.sessions),
            (DataType::HealthChecks, &self.health_checks),
        ]
    }
}
