//! Alert evaluation.
//!
//! The [`AlertEvaluator`] checks every alert definition on a fixed tick
//! against the latest aggregates, health results and the audit integrity
//! flag, and drives each alert through its lifecycle:
//!
//! - `inactive → triggered` after `debounce_ticks` consecutive breaches
//! - `triggered → acknowledged` by an operator
//! - `triggered | acknowledged → resolved` after `resolve_ticks`
//!   consecutive clear ticks, or by an operator
//! - `resolved → inactive` at the start of the next tick
//!
//! Each trigger queues exactly one notification. Delivery happens on the
//! dispatcher's task (see [`notify`]), never inside a tick.

pub mod notify;

pub use notify::{
    backoff_delay, AlertNotification, AlertNotificationFailure, LogNotifier,
    NotificationDispatcher, Notifier, NotifyError,
};

use crate::audit::IntegrityFlag;
use crate::models::{Alert, AlertCondition, AlertDefinition, AlertState, AlertTransitionError};
use crate::sessions::HealthTracker;
use crate::storage::{MetricStore, MetricStoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Errors that can occur during operator actions.
#[derive(Debug, Error)]
pub enum AlertError {
    /// No alert with that name is defined.
    #[error("Alert not found: {0}")]
    NotFound(String),

    /// The lifecycle forbids the transition.
    #[error(transparent)]
    Transition(#[from] AlertTransitionError),
}

/// Read access to the signals alert conditions are evaluated against.
pub struct AlertSignals {
    metrics: Arc<dyn MetricStore>,
    health: Arc<HealthTracker>,
    integrity: Arc<IntegrityFlag>,
}

impl AlertSignals {
    /// Creates a signal view.
    #[must_use]
    pub fn new(
        metrics: Arc<dyn MetricStore>,
        health: Arc<HealthTracker>,
        integrity: Arc<IntegrityFlag>,
    ) -> Self {
        Self {
            metrics,
            health,
            integrity,
        }
    }

    /// Returns true if the definition's condition currently holds.
    ///
    /// A metric condition holds when the latest aggregate of any matching
    /// series is anomalous at `min_level` or above, or when its average
    /// reaches the definition's `threshold`. A health condition holds when
    /// the check's latest status is at least `min_status`, or when its p95
    /// latency reaches the `threshold`.
    ///
    /// # Errors
    ///
    /// Returns an error if the metric store fails.
    pub fn is_breached(&self, definition: &AlertDefinition) -> Result<bool, MetricStoreError> {
        let threshold = definition.threshold;
        match &definition.trigger_condition {
            AlertCondition::MetricAnomaly {
                metric_name,
                window,
                labels,
                min_level,
            } => Ok(self
                .metrics
                .latest_aggregates(metric_name, *window)?
                .iter()
                .filter(|a| {
                    labels.as_ref().map_or(true, |wanted| {
                        wanted.iter().all(|(k, v)| a.labels.get(k) == Some(v))
                    })
                })
                .any(|a| {
                    a.anomaly_level.is_some_and(|level| level >= *min_level)
                        || threshold.is_some_and(|t| a.avg >= t)
                })),
            AlertCondition::HealthStatus {
                check_name,
                min_status,
            } => Ok(self.health.latest(check_name).is_some_and(|result| {
                result.status >= *min_status
                    || threshold.is_some_and(|t| result.latency.p95_ms >= t)
            })),
            AlertCondition::AuditChainIntegrity => Ok(self.integrity.is_raised()),
        }
    }
}

/// Outcome of one evaluation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Alerts evaluated.
    pub evaluated: usize,
    /// Alerts that moved to `triggered`.
    pub triggered: Vec<String>,
    /// Alerts that moved to `resolved`.
    pub resolved: Vec<String>,
    /// Alerts skipped because a previous evaluation was still running.
    pub skipped: Vec<String>,
    /// Alerts whose signals could not be read.
    pub failed: Vec<String>,
}

struct AlertSlot {
    definition: AlertDefinition,
    alert: Mutex<Alert>,
    running: AtomicBool,
}

impl AlertSlot {
    fn alert(&self) -> MutexGuard<'_, Alert> {
        self.alert.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Step {
    Unchanged,
    Triggered(AlertNotification),
    Resolved,
}

/// Evaluates alert definitions and keeps alert state.
pub struct AlertEvaluator {
    slots: Vec<AlertSlot>,
    signals: AlertSignals,
    notifications: mpsc::Sender<AlertNotification>,
}

impl AlertEvaluator {
    /// Creates an evaluator with every alert `inactive`.
    #[must_use]
    pub fn new(
        definitions: Vec<AlertDefinition>,
        signals: AlertSignals,
        notifications: mpsc::Sender<AlertNotification>,
    ) -> Self {
        let slots = definitions
            .into_iter()
            .map(|definition| AlertSlot {
                alert: Mutex::new(Alert::new(&definition)),
                definition,
                running: AtomicBool::new(false),
            })
            .collect();
        Self {
            slots,
            signals,
            notifications,
        }
    }

    fn slot(&self, alert_name: &str) -> Result<&AlertSlot, AlertError> {
        self.slots
            .iter()
            .find(|s| s.definition.alert_name == alert_name)
            .ok_or_else(|| AlertError::NotFound(alert_name.to_string()))
    }

    /// Evaluates every alert once.
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        for slot in &self.slots {
            let name = &slot.definition.alert_name;
            if slot
                .running
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                debug!(alert_name = %name, "Evaluation still running, skipping");
                report.skipped.push(name.clone());
                continue;
            }
            let _running = RunningGuard(&slot.running);
            report.evaluated += 1;

            let breached = match self.signals.is_breached(&slot.definition) {
                Ok(breached) => breached,
                Err(e) => {
                    warn!(alert_name = %name, error = %e, "Failed to read alert signals");
                    report.failed.push(name.clone());
                    continue;
                }
            };

            match Self::step(slot, breached, now) {
                Step::Triggered(notification) => {
                    report.triggered.push(name.clone());
                    self.queue(notification);
                }
                Step::Resolved => report.resolved.push(name.clone()),
                Step::Unchanged => {}
            }
        }

        report
    }

    fn step(slot: &AlertSlot, breached: bool, now: DateTime<Utc>) -> Step {
        let definition = &slot.definition;
        let mut alert = slot.alert();

        if alert.state == AlertState::Resolved {
            // Resolved is always allowed to move to inactive.
            let _ = alert.transition(AlertState::Inactive, now);
        }

        match alert.state {
            AlertState::Inactive if breached => {
                alert.breach_streak += 1;
                if alert.breach_streak < definition.debounce_ticks {
                    return Step::Unchanged;
                }
                if alert.transition(AlertState::Triggered, now).is_err() {
                    return Step::Unchanged;
                }
                info!(
                    alert_name = %definition.alert_name,
                    severity = %definition.severity,
                    "Alert triggered"
                );
                Step::Triggered(AlertNotification {
                    alert_name: definition.alert_name.clone(),
                    severity: definition.severity,
                    condition: definition.trigger_condition.to_string(),
                    triggered_at: now,
                })
            }
            AlertState::Inactive => {
                alert.breach_streak = 0;
                Step::Unchanged
            }
            AlertState::Triggered | AlertState::Acknowledged if breached => {
                alert.clear_streak = 0;
                Step::Unchanged
            }
            AlertState::Triggered | AlertState::Acknowledged => {
                alert.clear_streak += 1;
                if alert.clear_streak < definition.resolve_ticks
                    || alert.transition(AlertState::Resolved, now).is_err()
                {
                    return Step::Unchanged;
                }
                info!(alert_name = %definition.alert_name, "Alert resolved");
                Step::Resolved
            }
            AlertState::Resolved => Step::Unchanged,
        }
    }

    fn queue(&self, notification: AlertNotification) {
        if let Err(e) = self.notifications.try_send(notification) {
            error!(error = %e, "AlertNotificationFailure: notification queue unavailable");
        }
    }

    /// Acknowledges a triggered alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert is unknown or not `triggered`.
    pub fn acknowledge(
        &self,
        alert_name: &str,
        acknowledged_by: &str,
        at: DateTime<Utc>,
    ) -> Result<Alert, AlertError> {
        let slot = self.slot(alert_name)?;
        let mut alert = slot.alert();
        alert.transition(AlertState::Acknowledged, at)?;
        alert.acknowledged_by = Some(acknowledged_by.to_string());
        info!(alert_name, acknowledged_by, "Alert acknowledged");
        Ok(alert.clone())
    }

    /// Resolves an open alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert is unknown or not open.
    pub fn resolve(&self, alert_name: &str, at: DateTime<Utc>) -> Result<Alert, AlertError> {
        let slot = self.slot(alert_name)?;
        let mut alert = slot.alert();
        alert.transition(AlertState::Resolved, at)?;
        info!(alert_name, "Alert resolved manually");
        Ok(alert.clone())
    }

    /// Returns one alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert is unknown.
    pub fn get(&self, alert_name: &str) -> Result<Alert, AlertError> {
        Ok(self.slot(alert_name)?.alert().clone())
    }

    /// Returns every alert in definition order.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.slots.iter().map(|s| s.alert().clone()).collect()
    }

    /// Returns the alerts currently `triggered` or `acknowledged`, most
    /// recently triggered first.
    #[must_use]
    pub fn feed(&self) -> Vec<Alert> {
        let mut open: Vec<Alert> = self
            .alerts()
            .into_iter()
            .filter(|a| a.state.is_open())
            .collect();
        open.sort_by(|a, b| {
            b.triggered_at
                .cmp(&a.triggered_at)
                .then_with(|| a.alert_name.cmp(&b.alert_name))
        });
        open
    }

    /// The configured definitions.
    #[must_use]
    pub fn definitions(&self) -> Vec<&AlertDefinition> {
        self.slots.iter().map(|s| &s.definition).collect()
    }
}
