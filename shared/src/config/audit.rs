//! Audit chain configuration.

use serde::{Deserialize, Serialize};

/// Chain key used for entries without a tenant under [`ChainScope::PerTenant`],
/// and for every entry under [`ChainScope::Global`].
pub const GLOBAL_CHAIN: &str = "_global";

/// How audit entries are partitioned into hash chains.
///
/// The scope is fixed per deployment; changing it splits existing history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChainScope {
    /// One chain for the whole installation.
    #[default]
    Global,
    /// One chain per tenant.
    PerTenant,
}

impl ChainScope {
    /// Returns the chain key for an entry of `tenant_id`.
    #[must_use]
    pub fn chain_key(self, tenant_id: Option<&str>) -> String {
        match (self, tenant_id) {
            (Self::PerTenant, Some(tenant)) if !tenant.is_empty() => tenant.to_string(),
            _ => GLOBAL_CHAIN.to_string(),
        }
    }
}

impl std::fmt::Display for ChainScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::PerTenant => write!(f, "per_tenant"),
        }
    }
}

/// Audit chain configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuditConfig {
    /// Chain partitioning.
    pub chain_scope: ChainScope,
    /// How often every chain is verified in the background, in seconds.
    /// `None` disables scheduled verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_interval_secs: Option<u64>,
}

impl AuditConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the verification interval is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.verify_interval_secs == Some(0) {
            return Err("Audit verification interval must be greater than zero".to_string());
        }
        Ok(())
    }
}
