//! Alert evaluation and notification configuration.

use crate::models::alert::AlertDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Retry policy for notification delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delivery attempts before giving up.
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if no attempt is allowed or the delays are inverted.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("Notification retry policy needs at least one attempt".to_string());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err("Notification base delay cannot exceed the maximum delay".to_string());
        }
        Ok(())
    }
}

/// Alerting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Interval between evaluation ticks, in seconds.
    pub tick_interval_secs: u64,
    /// Alert definitions.
    pub definitions: Vec<AlertDefinition>,
    /// Notification retry policy.
    pub notification_retry: RetryPolicy,
    /// Capacity of the notification queue.
    pub notification_queue_capacity: usize,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            definitions: Vec::new(),
            notification_retry: RetryPolicy::default(),
            notification_queue_capacity: 1024,
        }
    }
}

impl AlertingConfig {
    /// Adds a definition.
    #[must_use]
    pub fn with_definition(mut self, definition: AlertDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an interval or capacity is zero, a definition is
    /// invalid, or two definitions share a name.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_secs == 0 {
            return Err("Alert tick interval must be greater than zero".to_string());
        }
        if self.notification_queue_capacity == 0 {
            return Err("Notification queue capacity must be greater than zero".to_string());
        }
        self.notification_retry.validate()?;
        let mut seen = HashSet::new();
        for definition in &self.definitions {
            definition.validate()?;
            if !seen.insert(definition.alert_name.as_str()) {
                return Err(format!(
                    "Duplicate alert definition '{}'",
                    definition.alert_name
                ));
            }
        }
        Ok(())
    }
}
