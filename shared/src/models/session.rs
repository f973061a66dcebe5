//! User session model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a session ended. Exactly one reason is recorded per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    /// The user logged out.
    Logout,
    /// The idle sweep closed the session.
    Timeout,
    /// An administrator terminated the session.
    Forced,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logout => write!(f, "logout"),
            Self::Timeout => write!(f, "timeout"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

/// Activity reported for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    /// A screen or page was opened.
    PageView {
        /// Screen identifier.
        page: String,
    },
    /// An action was performed.
    Action {
        /// Action name.
        name: String,
    },
}

/// A user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// Authenticated user.
    pub user_id: String,
    /// Tenant of the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// Last tracked activity.
    pub last_activity_at: DateTime<Utc>,
    /// When the session ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Whether the session is still open.
    pub is_active: bool,
    /// Why the session ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    /// Pages viewed.
    pub page_views: u64,
    /// Actions performed.
    pub actions_count: u64,
    /// Seconds between start and last activity (or end).
    pub total_duration_secs: i64,
}

impl Session {
    /// Creates an active session started at `at`.
    #[must_use]
    pub fn start(
        token: impl Into<String>,
        user_id: impl Into<String>,
        tenant_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
            tenant_id,
            started_at: at,
            last_activity_at: at,
            ended_at: None,
            is_active: true,
            end_reason: None,
            page_views: 0,
            actions_count: 0,
            total_duration_secs: 0,
        }
    }

    /// Seconds since the last activity.
    #[must_use]
    pub fn idle_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_activity_at).num_seconds()
    }
}
