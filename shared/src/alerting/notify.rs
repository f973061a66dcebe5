//! Alert notification delivery.
//!
//! The evaluator queues one [`AlertNotification`] per trigger on a bounded
//! channel. A [`NotificationDispatcher`] drains the channel on its own task
//! and retries failed deliveries with exponential backoff and jitter.

use crate::config::RetryPolicy;
use crate::models::Severity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Notification sent when an alert triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertNotification {
    /// Alert name.
    pub alert_name: String,
    /// Alert severity.
    pub severity: Severity,
    /// Human-readable trigger condition.
    pub condition: String,
    /// When the alert triggered.
    pub triggered_at: DateTime<Utc>,
}

/// A single failed delivery attempt.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// Every delivery attempt for a notification failed.
#[derive(Debug, Error)]
#[error("Notification for alert {alert_name} failed after {attempts} attempts: {last_error}")]
pub struct AlertNotificationFailure {
    /// Alert name.
    pub alert_name: String,
    /// Number of attempts made.
    pub attempts: u32,
    /// Error of the last attempt.
    pub last_error: String,
}

/// Delivers alert notifications to operators.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery failed; the dispatcher retries.
    async fn notify(&self, notification: &AlertNotification) -> Result<(), NotifyError>;
}

/// Notifier that writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &AlertNotification) -> Result<(), NotifyError> {
        warn!(
            alert_name = %notification.alert_name,
            severity = %notification.severity,
            condition = %notification.condition,
            triggered_at = %notification.triggered_at,
            "Alert triggered"
        );
        Ok(())
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)` capped at
/// the maximum, plus up to 10% jitter.
#[must_use]
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exponential = 2_u64.saturating_pow(attempt - 1);
    let capped = policy
        .base_delay_ms
        .saturating_mul(exponential)
        .min(policy.max_delay_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

/// Drains the notification channel and delivers with retries.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
}

impl NotificationDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, policy: RetryPolicy) -> Self {
        Self { notifier, policy }
    }

    /// Delivers one notification, retrying up to the policy's attempt limit.
    /// Returns the number of attempts used.
    ///
    /// # Errors
    ///
    /// Returns [`AlertNotificationFailure`] when every attempt failed.
    pub async fn deliver(
        &self,
        notification: &AlertNotification,
    ) -> Result<u32, AlertNotificationFailure> {
        let mut attempt = 1;
        loop {
            match self.notifier.notify(notification).await {
                Ok(()) => {
                    debug!(alert_name = %notification.alert_name, attempt, "Notification delivered");
                    return Ok(attempt);
                }
                Err(e) if attempt >= self.policy.max_attempts => {
                    return Err(AlertNotificationFailure {
                        alert_name: notification.alert_name.clone(),
                        attempts: attempt,
                        last_error: e.0,
                    });
                }
                Err(e) => {
                    let delay = backoff_delay(&self.policy, attempt);
                    warn!(
                        alert_name = %notification.alert_name,
                        attempt,
                        error = %e,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Notification failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Runs until the channel closes or shutdown is signalled.
    pub async fn run(
        self,
        mut notifications: mpsc::Receiver<AlertNotification>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Notification dispatcher started");
        loop {
            tokio::select! {
                next = notifications.recv() => {
                    let Some(notification) = next else { break };
                    if let Err(failure) = self.deliver(&notification).await {
                        error!(
                            alert_name = %failure.alert_name,
                            attempts = failure.attempts,
                            error = %failure.last_error,
                            "AlertNotificationFailure"
                        );
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        info!("Notification dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyNotifier {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyNotifier {
        fn failing(times: u32) -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicU32::new(times),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn notify(&self, _notification: &AlertNotification) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(NotifyError("webhook unavailable".to_string()));
            }
            Ok(())
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    fn notification() -> AlertNotification {
        AlertNotification {
            alert_name: "db-down".to_string(),
            severity: Severity::Critical,
            condition: "health check database is unhealthy or worse".to_string(),
            triggered_at: Utc::now(),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        };

        assert_eq!(backoff_delay(&policy, 0), Duration::ZERO);
        assert!(backoff_delay(&policy, 1) >= Duration::from_millis(100));
        assert!(backoff_delay(&policy, 2) >= Duration::from_millis(200));
        let capped = backoff_delay(&policy, 20);
        assert!(capped >= Duration::from_millis(1000));
        assert!(capped < Duration::from_millis(1100));
    }

    #[tokio::test]
    async fn test_deliver_retries_until_success() {
        let notifier = FlakyNotifier::failing(2);
        let dispatcher = NotificationDispatcher::new(notifier.clone(), fast_policy(5));

        let attempts = dispatcher.deliver(&notification()).await.unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deliver_gives_up_after_max_attempts() {
        let notifier = FlakyNotifier::failing(10);
        let dispatcher = NotificationDispatcher::new(notifier.clone(), fast_policy(3));

        let failure = dispatcher.deliver(&notification()).await.unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.last_error, "webhook unavailable");
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_drains_until_channel_closes() {
        let notifier = FlakyNotifier::failing(0);
        let dispatcher = NotificationDispatcher::new(notifier.clone(), fast_policy(1));
        let (tx, rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tx.send(notification()).await.unwrap();
        tx.send(notification()).await.unwrap();
        drop(tx);
        dispatcher.run(rx, shutdown_rx).await;

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
    }
}
