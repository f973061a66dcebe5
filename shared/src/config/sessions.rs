//! Session tracking configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session tracking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity after which a session is closed with `timeout`, in seconds.
    pub idle_timeout_secs: u64,
    /// How often the idle sweep runs, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1800,
            sweep_interval_secs: 60,
        }
    }
}

impl SessionConfig {
    /// Idle timeout as a duration.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_timeout_secs == 0 {
            return Err("Session idle timeout must be greater than zero".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("Session sweep interval must be greater than zero".to_string());
        }
        Ok(())
    }
}
