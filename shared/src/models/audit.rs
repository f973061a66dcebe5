//! Audit entry model.
//!
//! Audit entries record privileged mutations. Each entry is linked into a
//! hash chain: its checksum covers the previous entry's checksum and the
//! canonical form of the entry itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use validator::Validate;

/// `prev_checksum` of the first entry in every chain.
pub const GENESIS_CHECKSUM: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Field values before or after a mutation.
pub type FieldValues = BTreeMap<String, serde_json::Value>;

/// Who performed a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Acting user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Tenant the user acted for.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// A record was created.
    Create,
    /// A record was changed.
    Update,
    /// A record was deleted.
    Delete,
    /// Sensitive data was read.
    Access,
    /// An earlier audit entry is corrected.
    Correction,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Access => write!(f, "access"),
            Self::Correction => write!(f, "correction"),
        }
    }
}

/// A mutation submitted for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewAuditEntry {
    /// Who performed the mutation.
    #[serde(default)]
    pub actor: Actor,

    /// Kind of mutation.
    pub action: AuditAction,

    /// Resource type (e.g. `invoice`).
    #[validate(length(min = 1, message = "Resource type cannot be empty"))]
    pub resource_type: String,

    /// Resource identifier.
    #[validate(length(min = 1, message = "Resource ID cannot be empty"))]
    pub resource_id: String,

    /// Values before the mutation.
    #[serde(default)]
    pub old_values: FieldValues,

    /// Values after the mutation.
    #[serde(default)]
    pub new_values: FieldValues,

    /// Changed fields; derived from the values when empty.
    #[serde(default)]
    pub changed_fields: Vec<String>,

    /// When the mutation happened.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Sequence of the entry this one corrects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects: Option<u64>,
}

/// Errors that can occur during audit entry validation.
#[derive(Debug, Error)]
pub enum AuditValidationError {
    /// A correction does not name the corrected entry.
    #[error("Correction entries must reference the corrected entry")]
    CorrectionWithoutTarget,

    /// Only corrections may reference another entry.
    #[error("Only correction entries may reference another entry")]
    UnexpectedCorrectionTarget,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl NewAuditEntry {
    /// Creates an entry for a mutation happening now.
    #[must_use]
    pub fn new(
        action: AuditAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            actor: Actor::default(),
            action,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            old_values: FieldValues::new(),
            new_values: FieldValues::new(),
            changed_fields: Vec::new(),
            timestamp: Utc::now(),
            corrects: None,
        }
    }

    /// Sets the actor.
    #[must_use]
    pub fn by(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    /// Records an old value.
    #[must_use]
    pub fn with_old(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.old_values.insert(field.into(), value.into());
        self
    }

    /// Records a new value.
    #[must_use]
    pub fn with_new(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.new_values.insert(field.into(), value.into());
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Turns the entry into a correction of the entry at `sequence`.
    #[must_use]
    pub fn correcting(mut self, sequence: u64) -> Self {
        self.action = AuditAction::Correction;
        self.corrects = Some(sequence);
        self
    }

    /// Returns the fields whose value differs between old and new.
    #[must_use]
    pub fn diff_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .old_values
            .keys()
            .chain(self.new_values.keys())
            .filter(|k| self.old_values.get(*k) != self.new_values.get(*k))
            .cloned()
            .collect();
        fields.sort_unstable();
        fields.dedup();
        fields
    }

    /// Validates the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is not identified or the correction
    /// reference does not match the action.
    pub fn validate_entry(&self) -> Result<(), AuditValidationError> {
        match (self.action, self.corrects) {
            (AuditAction::Correction, None) => {
                return Err(AuditValidationError::CorrectionWithoutTarget)
            }
            (action, Some(_)) if action != AuditAction::Correction => {
                return Err(AuditValidationError::UnexpectedCorrectionTarget)
            }
            _ => {}
        }
        self.validate()?;
        Ok(())
    }
}

/// An entry of the audit chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the chain, starting at 0.
    pub sequence: u64,
    /// Chain the entry belongs to.
    pub chain: String,
    /// Who performed the mutation.
    pub actor: Actor,
    /// Kind of mutation.
    pub action: AuditAction,
    /// Resource type.
    pub resource_type: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Values before the mutation.
    pub old_values: FieldValues,
    /// Values after the mutation.
    pub new_values: FieldValues,
    /// Changed fields.
    pub changed_fields: Vec<String>,
    /// When the mutation happened.
    pub timestamp: DateTime<Utc>,
    /// Sequence of the corrected entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects: Option<u64>,
    /// Checksum of the preceding entry.
    pub prev_checksum: String,
    /// Checksum of this entry.
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_fields() {
        let entry = NewAuditEntry::new(AuditAction::Update, "invoice", "INV-1")
            .with_old("total", json!(100))
            .with_old("status", json!("draft"))
            .with_new("total", json!(120))
            .with_new("status", json!("draft"))
            .with_new("approved_by", json!("u-7"));

        assert_eq!(entry.diff_fields(), vec!["approved_by", "total"]);
    }

    #[test]
    fn test_correction_requires_target() {
        let mut entry = NewAuditEntry::new(AuditAction::Correction, "invoice", "INV-1");
        assert!(matches!(
            entry.validate_entry(),
            Err(AuditValidationError::CorrectionWithoutTarget)
        ));

        entry.corrects = Some(3);
        assert!(entry.validate_entry().is_ok());
    }

    #[test]
    fn test_target_only_on_corrections() {
        let mut entry = NewAuditEntry::new(AuditAction::Delete, "invoice", "INV-1");
        entry.corrects = Some(1);
        assert!(matches!(
            entry.validate_entry(),
            Err(AuditValidationError::UnexpectedCorrectionTarget)
        ));
    }

    #[test]
    fn test_empty_resource_rejected() {
        let entry = NewAuditEntry::new(AuditAction::Create, "", "INV-1");
        assert!(matches!(
            entry.validate_entry(),
            Err(AuditValidationError::ValidationError(_))
        ));
    }

    #[test]
    fn test_correcting_builder() {
        let entry = NewAuditEntry::new(AuditAction::Update, "invoice", "INV-1").correcting(4);
        assert_eq!(entry.action, AuditAction::Correction);
        assert_eq!(entry.corrects, Some(4));
        assert!(entry.validate_entry().is_ok());
    }
}
