//! Error occurrence and error record models.
//!
//! Raw [`ErrorOccurrence`]s are grouped by fingerprint into deduplicated
//! [`ErrorRecord`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// A single stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Function name.
    pub function: String,
    /// Module or namespace containing the function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Source file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Line number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl StackFrame {
    /// Creates a frame for a function.
    #[must_use]
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            module: None,
            file: None,
            line: None,
        }
    }

    /// Sets the module.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Sets file and line.
    #[must_use]
    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Returns the location-independent identity of the frame
    /// (`module::function`).
    #[must_use]
    pub fn symbol(&self) -> String {
        match &self.module {
            Some(module) => format!("{module}::{}", self.function),
            None => self.function.clone(),
        }
    }
}

/// One raw occurrence of an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ErrorOccurrence {
    /// Error type (e.g. `IntegrityError`).
    #[validate(length(min = 1, message = "Error type cannot be empty"))]
    pub error_type: String,

    /// Raw message.
    pub message: String,

    /// Stack frames, innermost first.
    #[serde(default)]
    pub stack: Vec<StackFrame>,

    /// Deployment environment.
    #[validate(length(min = 1, message = "Environment cannot be empty"))]
    pub environment: String,

    /// When the error happened.
    pub timestamp: DateTime<Utc>,

    /// Tenant affected, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Errors that can occur during occurrence validation.
#[derive(Debug, Error)]
pub enum ErrorOccurrenceValidationError {
    /// The error type is empty.
    #[error("Error type cannot be empty")]
    EmptyErrorType,

    /// The environment is empty.
    #[error("Environment cannot be empty")]
    EmptyEnvironment,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl ErrorOccurrence {
    /// Creates an occurrence happening now.
    #[must_use]
    pub fn new(
        error_type: impl Into<String>,
        message: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            stack: Vec::new(),
            environment: environment.into(),
            timestamp: Utc::now(),
            tenant_id: None,
        }
    }

    /// Adds a stack frame (innermost first).
    #[must_use]
    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.stack.push(frame);
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Validates the occurrence.
    ///
    /// # Errors
    ///
    /// Returns an error if the error type or environment is empty.
    pub fn validate_occurrence(&self) -> Result<(), ErrorOccurrenceValidationError> {
        if self.error_type.trim().is_empty() {
            return Err(ErrorOccurrenceValidationError::EmptyErrorType);
        }
        if self.environment.trim().is_empty() {
            return Err(ErrorOccurrenceValidationError::EmptyEnvironment);
        }
        self.validate()?;
        Ok(())
    }
}

/// A deduplicated error, one per `(error_hash, environment)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Fingerprint of the error.
    pub error_hash: String,
    /// Environment the error was seen in.
    pub environment: String,
    /// Error type.
    pub error_type: String,
    /// Message of the first occurrence.
    pub message: String,
    /// Normalized message the fingerprint was computed from.
    pub normalized_message: String,
    /// Number of occurrences recorded.
    pub occurrence_count: u64,
    /// Earliest occurrence.
    pub first_seen: DateTime<Utc>,
    /// Latest occurrence.
    pub last_seen: DateTime<Utc>,
    /// Whether the error is marked resolved.
    pub is_resolved: bool,
    /// When the error was last resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// How many times a resolved error came back.
    #[serde(default)]
    pub reopen_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_symbol_ignores_location() {
        let a = StackFrame::new("post_invoice")
            .with_module("ledger")
            .at("ledger.rs", 10);
        let b = StackFrame::new("post_invoice")
            .with_module("ledger")
            .at("ledger.rs", 42);

        assert_eq!(a.symbol(), "ledger::post_invoice");
        assert_eq!(a.symbol(), b.symbol());
        assert_eq!(StackFrame::new("main").symbol(), "main");
    }

    #[test]
    fn test_occurrence_validation() {
        let ok = ErrorOccurrence::new("IntegrityError", "duplicate key", "production");
        assert!(ok.validate_occurrence().is_ok());

        let no_type = ErrorOccurrence::new("  ", "duplicate key", "production");
        assert!(matches!(
            no_type.validate_occurrence(),
            Err(ErrorOccurrenceValidationError::EmptyErrorType)
        ));

        let no_env = ErrorOccurrence::new("IntegrityError", "duplicate key", "");
        assert!(matches!(
            no_env.validate_occurrence(),
            Err(ErrorOccurrenceValidationError::EmptyEnvironment)
        ));
    }
}
