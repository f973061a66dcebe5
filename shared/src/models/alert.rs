//! Alert definitions and alert state.
//!
//! An alert moves through a fixed lifecycle:
//!
//! ```text
//! inactive ──breach──▶ triggered ──ack──▶ acknowledged
//!    ▲                    │                    │
//!    │                    └──────clear─────────┴──▶ resolved
//!    └───────────────────next tick────────────────────┘
//! ```
//!
//! Every path out of `inactive` passes through `triggered`.

use super::event::Severity;
use super::health::HealthStatus;
use super::metric::{AnomalyLevel, Labels};
use crate::config::RollupWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// State of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    /// The condition is not breaching.
    Inactive,
    /// The condition breached for the debounce period.
    Triggered,
    /// An operator took ownership of the alert.
    Acknowledged,
    /// The condition cleared or an operator closed the alert.
    Resolved,
}

impl AlertState {
    /// Returns true if the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Inactive, Self::Triggered)
                | (Self::Triggered, Self::Acknowledged)
                | (Self::Triggered | Self::Acknowledged, Self::Resolved)
                | (Self::Resolved, Self::Inactive)
        )
    }

    /// Returns true for states shown in the alert feed.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Triggered | Self::Acknowledged)
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Triggered => write!(f, "triggered"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// What an alert watches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertCondition {
    /// The latest aggregate of a metric is flagged as an anomaly.
    MetricAnomaly {
        /// Metric name.
        metric_name: String,
        /// Rollup window whose aggregates are inspected.
        window: RollupWindow,
        /// Restrict to one series; any series when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        labels: Option<Labels>,
        /// Minimum anomaly level that counts as a breach.
        #[serde(default = "default_anomaly_level")]
        min_level: AnomalyLevel,
    },
    /// The latest result of a health check is at least this bad.
    HealthStatus {
        /// Health check name.
        check_name: String,
        /// Status from which the check counts as breaching.
        #[serde(default = "default_health_status")]
        min_status: HealthStatus,
    },
    /// An audit chain failed verification.
    AuditChainIntegrity,
}

fn default_anomaly_level() -> AnomalyLevel {
    AnomalyLevel::Warning
}

fn default_health_status() -> HealthStatus {
    HealthStatus::Degraded
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MetricAnomaly {
                metric_name,
                window,
                min_level,
                ..
            } => write!(f, "{metric_name} {window} aggregate is {min_level:?} or worse"),
            Self::HealthStatus {
                check_name,
                min_status,
            } => write!(f, "health check {check_name} is {min_status} or worse"),
            Self::AuditChainIntegrity => write!(f, "audit chain verification failed"),
        }
    }
}

/// Configured alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDefinition {
    /// Unique alert name.
    pub alert_name: String,
    /// Watched condition.
    pub trigger_condition: AlertCondition,
    /// Threshold shown to operators (the metric policy holds the effective one).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Severity of the alert.
    #[serde(default = "default_alert_severity")]
    pub severity: Severity,
    /// Consecutive breaching ticks before triggering.
    #[serde(default = "default_ticks")]
    pub debounce_ticks: u32,
    /// Consecutive clear ticks before resolving.
    #[serde(default = "default_ticks")]
    pub resolve_ticks: u32,
}

fn default_alert_severity() -> Severity {
    Severity::Warning
}

fn default_ticks() -> u32 {
    1
}

impl AlertDefinition {
    /// Creates a definition with single-tick debounce and resolve.
    #[must_use]
    pub fn new(alert_name: impl Into<String>, trigger_condition: AlertCondition) -> Self {
        Self {
            alert_name: alert_name.into(),
            trigger_condition,
            threshold: None,
            severity: default_alert_severity(),
            debounce_ticks: default_ticks(),
            resolve_ticks: default_ticks(),
        }
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the debounce tick count.
    #[must_use]
    pub fn with_debounce(mut self, ticks: u32) -> Self {
        self.debounce_ticks = ticks;
        self
    }

    /// Sets the resolve tick count.
    #[must_use]
    pub fn with_resolve_after(mut self, ticks: u32) -> Self {
        self.resolve_ticks = ticks;
        self
    }

    /// Validates the definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or a tick count is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.alert_name.trim().is_empty() {
            return Err("Alert name cannot be empty".to_string());
        }
        if self.debounce_ticks == 0 || self.resolve_ticks == 0 {
            return Err(format!(
                "Alert '{}': debounce and resolve ticks must be at least 1",
                self.alert_name
            ));
        }
        Ok(())
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Alert cannot move from {from} to {to}")]
pub struct AlertTransitionError {
    /// Current state.
    pub from: AlertState,
    /// Requested state.
    pub to: AlertState,
}

/// Runtime state of one alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert name.
    pub alert_name: String,
    /// Severity copied from the definition.
    pub severity: Severity,
    /// Current state.
    pub state: AlertState,
    /// When the alert last triggered.
    pub triggered_at: Option<DateTime<Utc>>,
    /// When the alert was last acknowledged.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Who acknowledged the alert.
    pub acknowledged_by: Option<String>,
    /// When the alert was last resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Consecutive breaching ticks observed.
    pub breach_streak: u32,
    /// Consecutive clear ticks observed.
    pub clear_streak: u32,
}

impl Alert {
    /// Creates an inactive alert for a definition.
    #[must_use]
    pub fn new(definition: &AlertDefinition) -> Self {
        Self {
            alert_name: definition.alert_name.clone(),
            severity: definition.severity,
            state: AlertState::Inactive,
            triggered_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            breach_streak: 0,
            clear_streak: 0,
        }
    }

    /// Moves the alert to `next`, stamping the matching timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the lifecycle does not allow the transition.
    pub fn transition(
        &mut self,
        next: AlertState,
        at: DateTime<Utc>,
    ) -> Result<(), AlertTransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(AlertTransitionError {
                from: self.state,
                to: next,
            });
        }
        match next {
            AlertState::Triggered => {
                self.triggered_at = Some(at);
                self.acknowledged_at = None;
                self.acknowledged_by = None;
                self.resolved_at = None;
            }
            AlertState::Acknowledged => self.acknowledged_at = Some(at),
            AlertState::Resolved => self.resolved_at = Some(at),
            AlertState::Inactive => {}
        }
        self.state = next;
        self.breach_streak = 0;
        self.clear_streak = 0;
        Ok(())
    }
}
