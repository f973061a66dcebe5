//! Application state module.
//!
//! Defines the shared application state that is passed to route handlers.

use chrono::{DateTime, Utc};
use shared::alerting::AlertNotification;
use shared::config::TelemetryConfig;
use shared::telemetry::{Stores, Telemetry};
use shared::TelemetryError;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Application state shared across all request handlers and background jobs.
#[derive(Clone)]
pub struct AppState {
    telemetry: Arc<Telemetry>,
    started_at: DateTime<Utc>,
}

impl AppState {
    /// Wraps an assembled pipeline.
    #[must_use]
    pub fn new(telemetry: Telemetry) -> Self {
        Self {
            telemetry: Arc::new(telemetry),
            started_at: Utc::now(),
        }
    }

    /// Builds the pipeline on the given stores. The receiver carries alert
    /// notifications for the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(
        config: TelemetryConfig,
        stores: Stores,
    ) -> Result<(Self, mpsc::Receiver<AlertNotification>), TelemetryError> {
        let (telemetry, notifications) = Telemetry::new(config, stores)?;
        Ok((Self::new(telemetry), notifications))
    }

    /// Creates a new application state with in-memory stores and the
    /// default configuration. Alert notifications are discarded.
    ///
    /// This is useful for development and testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the default configuration is rejected.
    pub fn with_in_memory_store() -> Result<Self, TelemetryError> {
        Self::from_config(TelemetryConfig::default(), Stores::in_memory()).map(|(state, _)| state)
    }

    /// Returns the telemetry pipeline.
    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// When the server state was created.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
