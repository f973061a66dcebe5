//! Producer context.
//!
//! Every producer call carries an explicit [`TelemetryContext`] describing
//! who emitted the telemetry. There is no ambient, process-wide telemetry
//! state: the tenant, user, session and deployment environment travel with
//! the call.

use serde::{Deserialize, Serialize};

/// Environment name used when a producer does not specify one.
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Identity and deployment context attached to a producer call.
///
/// # Example
///
/// ```
/// use shared::context::TelemetryContext;
///
/// let ctx = TelemetryContext::new("staging")
///     .with_tenant("zimmerei-nord")
///     .with_user("u-42");
///
/// assert_eq!(ctx.environment, "staging");
/// assert_eq!(ctx.tenant_id.as_deref(), Some("zimmerei-nord"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryContext {
    /// Tenant the producer acts for, if any.
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Authenticated user, if any.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Session token of the authenticated user, if any.
    #[serde(default)]
    pub session_token: Option<String>,

    /// Deployment environment (used to scope error grouping).
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    DEFAULT_ENVIRONMENT.to_string()
}

impl TelemetryContext {
    /// Creates an anonymous context for the given environment.
    #[must_use]
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            tenant_id: None,
            user_id: None,
            session_token: None,
            environment: environment.into(),
        }
    }

    /// Sets the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the session token.
    #[must_use]
    pub fn with_session(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

impl Default for TelemetryContext {
    fn default() -> Self {
        Self::new(DEFAULT_ENVIRONMENT)
    }
}
