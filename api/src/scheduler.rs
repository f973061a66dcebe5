//! Background jobs.
//!
//! The pipeline leaves scheduling to its host. The server runs each periodic
//! job on its own `tokio::time::interval`, plus the alert notification
//! dispatcher. Every job stops at a tick boundary when the shutdown signal
//! is broadcast.

use crate::state::AppState;
use chrono::Utc;
use shared::alerting::{AlertNotification, NotificationDispatcher, Notifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Runs `job` every `period` until shutdown is signalled.
pub async fn run_periodic<F>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut job: F,
) where
    F: FnMut() + Send,
{
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(job = name, period_secs = period.as_secs_f64(), "Background job started");

    loop {
        tokio::select! {
            _ = tick.tick() => job(),
            _ = shutdown.recv() => break,
        }
    }

    info!(job = name, "Background job stopped");
}

/// Rolls up every configured window.
pub fn rollup_job(state: &AppState) {
    match state.telemetry().run_rollups(Utc::now()) {
        Ok(reports) => {
            for report in reports {
                if !report.conflicts.is_empty() {
                    warn!(
                        window = %report.window,
                        conflicts = report.conflicts.len(),
                        "Rollup skipped metrics held by another rollup"
                    );
                }
                debug!(
                    window = %report.window,
                    period_start = %report.period_start,
                    aggregates = report.aggregates_written,
                    "Rollup complete"
                );
            }
        }
        Err(e) => error!(error = %e, "Rollup failed"),
    }
}

/// Evaluates every alert once.
pub fn alert_job(state: &AppState) {
    let report = state.telemetry().tick_alerts(Utc::now());
    if !report.skipped.is_empty() {
        warn!(skipped = ?report.skipped, "Alert evaluations still running");
    }
    debug!(
        evaluated = report.evaluated,
        triggered = report.triggered.len(),
        resolved = report.resolved.len(),
        "Alert tick complete"
    );
}

/// Closes idle sessions.
pub fn session_sweep_job(state: &AppState) {
    let closed = state.telemetry().sweep_sessions(Utc::now());
    debug!(closed = closed.len(), "Session sweep complete");
}

/// Verifies every audit chain.
pub fn audit_verify_job(state: &AppState) {
    match state.telemetry().verify_all_chains() {
        Ok(reports) => {
            let invalid = reports.iter().filter(|r| !r.is_valid()).count();
            debug!(chains = reports.len(), invalid, "Audit verification complete");
        }
        Err(e) => error!(error = %e, "Audit verification failed"),
    }
}

/// Removes telemetry past its retention.
pub fn retention_job(state: &AppState) {
    match state.telemetry().prune(Utc::now()) {
        Ok(report) => debug!(removed = report.total(), "Retention pass complete"),
        Err(e) => error!(error = %e, "Retention pass failed"),
    }
}

/// Owns the shutdown signal of the background jobs.
pub struct Scheduler {
    state: AppState,
    shutdown: broadcast::Sender<()>,
}

impl Scheduler {
    /// Creates a scheduler for the given state.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self { state, shutdown }
    }

    /// Spawns every periodic job and the notification dispatcher.
    pub fn spawn(
        &self,
        notifications: mpsc::Receiver<AlertNotification>,
        notifier: Arc<dyn Notifier>,
    ) -> Vec<JoinHandle<()>> {
        let config = self.state.telemetry().config().clone();
        let mut handles = Vec::new();

        let periodic: [(&'static str, Option<u64>, fn(&AppState)); 5] = [
            (
                "rollup",
                Some(config.aggregation.rollup_interval_secs),
                rollup_job,
            ),
            (
                "alert_tick",
                Some(config.alerting.tick_interval_secs),
                alert_job,
            ),
            (
                "session_sweep",
                Some(config.sessions.sweep_interval_secs),
                session_sweep_job,
            ),
            ("audit_verify", config.audit.verify_interval_secs, audit_verify_job),
            (
                "retention",
                Some(config.retention.prune_interval_secs),
                retention_job,
            ),
        ];

        for (name, secs, job) in periodic {
            let Some(secs) = secs else { continue };
            let state = self.state.clone();
            handles.push(tokio::spawn(run_periodic(
                name,
                Duration::from_secs(secs),
                self.shutdown.subscribe(),
                move || job(&state),
            )));
        }

        let dispatcher = NotificationDispatcher::new(notifier, config.alerting.notification_retry);
        handles.push(tokio::spawn(
            dispatcher.run(notifications, self.shutdown.subscribe()),
        ));

        handles
    }

    /// Signals every job to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}
