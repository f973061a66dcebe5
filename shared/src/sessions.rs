//! Session and health tracking.
//!
//! [`SessionTracker`] follows user sessions from login to logout or idle
//! timeout. [`HealthTracker`] keeps the time series of health check
//! results per check.

use crate::context::TelemetryContext;
use crate::models::{Activity, EndReason, HealthCheckResult, HealthValidationError, Session};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors that can occur while tracking sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session needs an authenticated user.
    #[error("Cannot start a session without a user")]
    MissingUser,

    /// The token is unknown.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The session already ended.
    #[error("Session {token} already ended ({reason})")]
    AlreadyEnded {
        /// Session token.
        token: String,
        /// Recorded end reason.
        reason: EndReason,
    },
}

/// Tracks user sessions.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: DashMap<String, Session>,
}

fn refresh_duration(session: &mut Session) {
    let end = session.ended_at.unwrap_or(session.last_activity_at);
    session.total_duration_secs = (end - session.started_at).num_seconds().max(0);
}

impl SessionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session for the context's user with a fresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if the context carries no user.
    pub fn start_session(
        &self,
        ctx: &TelemetryContext,
        at: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let user_id = ctx
            .user_id
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or(SessionError::MissingUser)?;

        let session = Session::start(
            Uuid::new_v4().to_string(),
            user_id,
            ctx.tenant_id.clone(),
            at,
        );
        self.sessions.insert(session.token.clone(), session.clone());
        info!(
            user_id = %session.user_id,
            tenant_id = ?session.tenant_id,
            "Session started"
        );
        Ok(session)
    }

    /// Records activity on an open session.
    ///
    /// `last_activity_at` never moves backwards; late activity still counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unknown or already ended.
    pub fn touch(
        &self,
        token: &str,
        activity: &Activity,
        at: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let mut session = self
            .sessions
            .get_mut(token)
            .ok_or_else(|| SessionError::NotFound(token.to_string()))?;

        if let Some(reason) = session.end_reason {
            return Err(SessionError::AlreadyEnded {
                token: token.to_string(),
                reason,
            });
        }

        match activity {
            Activity::PageView { .. } => session.page_views += 1,
            Activity::Action { .. } => session.actions_count += 1,
        }
        session.last_activity_at = session.last_activity_at.max(at);
        refresh_duration(&mut session);
        debug!(token, ?activity, "Session activity");
        Ok(session.clone())
    }

    /// Ends a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unknown or already ended.
    pub fn end_session(
        &self,
        token: &str,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let mut session = self
            .sessions
            .get_mut(token)
            .ok_or_else(|| SessionError::NotFound(token.to_string()))?;

        if let Some(existing) = session.end_reason {
            return Err(SessionError::AlreadyEnded {
                token: token.to_string(),
                reason: existing,
            });
        }

        session.ended_at = Some(at.max(session.last_activity_at));
        session.is_active = false;
        session.end_reason = Some(reason);
        refresh_duration(&mut session);
        info!(
            user_id = %session.user_id,
            %reason,
            duration_secs = session.total_duration_secs,
            "Session ended"
        );
        Ok(session.clone())
    }

    /// Closes every active session idle for at least `idle_timeout` with
    /// reason `timeout`. Returns the closed sessions.
    pub fn sweep_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> Vec<Session> {
        let mut closed = Vec::new();
        for mut session in self.sessions.iter_mut() {
            if !session.is_active || now - session.last_activity_at < idle_timeout {
                continue;
            }
            session.ended_at = Some(session.last_activity_at + idle_timeout);
            session.is_active = false;
            session.end_reason = Some(EndReason::Timeout);
            refresh_duration(&mut session);
            closed.push(session.clone());
        }
        if !closed.is_empty() {
            info!(count = closed.len(), "Idle sessions closed");
        }
        closed
    }

    /// Returns a session by token.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<Session> {
        self.sessions.get(token).map(|s| s.clone())
    }

    /// Lists sessions filtered by user and active flag, newest first.
    #[must_use]
    pub fn list(&self, user_id: Option<&str>, is_active: Option<bool>) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| !matches!(user_id, Some(u) if u != s.user_id))
            .filter(|s| !matches!(is_active, Some(a) if a != s.is_active))
            .map(|s| s.clone())
            .collect();
        sessions.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.token.cmp(&b.token))
        });
        sessions
    }

    /// Number of active sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_active).count()
    }

    /// Forgets sessions that ended before `cutoff`. Active sessions are
    /// kept regardless of age. Returns the number removed.
    pub fn prune_ended(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| !matches!(s.ended_at, Some(ended) if ended < cutoff));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            debug!(removed, %cutoff, "Pruned ended sessions");
        }
        removed
    }
}

/// Errors that can occur while recording health checks.
#[derive(Debug, Error)]
pub enum HealthError {
    /// The result is malformed.
    #[error("Invalid health check result: {0}")]
    InvalidResult(#[from] HealthValidationError),

    /// The result is not newer than the latest one for the check.
    #[error("Health check {check_name} at {timestamp} is not after {latest}")]
    OutOfOrder {
        /// Check name.
        check_name: String,
        /// Rejected timestamp.
        timestamp: DateTime<Utc>,
        /// Latest stored timestamp.
        latest: DateTime<Utc>,
    },
}

/// Keeps health check results per check, oldest first.
#[derive(Debug, Default)]
pub struct HealthTracker {
    results: DashMap<String, Vec<HealthCheckResult>>,
}

impl HealthTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a result.
    ///
    /// # Errors
    ///
    /// Returns an error if the result is invalid or its timestamp is not
    /// strictly after the check's latest result.
    pub fn record_health_check(&self, result: HealthCheckResult) -> Result<(), HealthError> {
        result.validate_result()?;

        match self.results.entry(result.check_name.clone()) {
            Entry::Occupied(mut entry) => {
                let history = entry.get_mut();
                if let Some(latest) = history.last().map(|r| r.timestamp) {
                    if result.timestamp <= latest {
                        warn!(
                            check_name = %result.check_name,
                            timestamp = %result.timestamp,
                            %latest,
                            "Rejected out-of-order health check"
                        );
                        return Err(HealthError::OutOfOrder {
                            check_name: result.check_name,
                            timestamp: result.timestamp,
                            latest,
                        });
                    }
                }
                history.push(result);
            }
            Entry::Vacant(entry) => {
                entry.insert(vec![result]);
            }
        }
        Ok(())
    }

    /// Latest result of a check.
    #[must_use]
    pub fn latest(&self, check_name: &str) -> Option<HealthCheckResult> {
        self.results
            .get(check_name)
            .and_then(|history| history.last().cloned())
    }

    /// Latest result of every check, ordered by check name.
    #[must_use]
    pub fn latest_all(&self) -> Vec<HealthCheckResult> {
        let mut latest: Vec<HealthCheckResult> = self
            .results
            .iter()
            .filter_map(|history| history.last().cloned())
            .collect();
        latest.sort_by(|a, b| a.check_name.cmp(&b.check_name));
        latest
    }

    /// Results of a check with `start <= timestamp < end`.
    #[must_use]
    pub fn history(
        &self,
        check_name: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<HealthCheckResult> {
        self.results
            .get(check_name)
            .map(|history| {
                history
                    .iter()
                    .filter(|r| !matches!(start, Some(s) if r.timestamp < s))
                    .filter(|r| !matches!(end, Some(e) if r.timestamp >= e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops results older than `cutoff`, keeping the latest result of
    /// every check. Returns the number removed.
    pub fn prune_history(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for mut history in self.results.iter_mut() {
            let keep_from = history
                .partition_point(|r| r.timestamp < cutoff)
                .min(history.len().saturating_sub(1));
            history.drain(..keep_from);
            removed += keep_from;
        }
        if removed > 0 {
            debug!(removed, %cutoff, "Pruned health check history");
        }
        removed
    }
}
