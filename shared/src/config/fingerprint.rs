//! Error fingerprint configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum number of stack frames that may contribute to a fingerprint.
pub const MAX_FRAME_DEPTH: usize = 64;

/// A message normalization rule: every match of `pattern` is replaced by
/// `replacement` before fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationRule {
    /// Rule name, for diagnostics.
    pub name: String,
    /// Regular expression.
    pub pattern: String,
    /// Replacement text.
    pub replacement: String,
}

impl NormalizationRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    /// Compiles the pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is not a valid regular expression.
    pub fn compile(&self) -> Result<Regex, String> {
        Regex::new(&self.pattern)
            .map_err(|e| format!("Normalization rule '{}' is invalid: {e}", self.name))
    }
}

/// Default rules, applied in order.
#[must_use]
pub fn default_rules() -> Vec<NormalizationRule> {
    vec![
        NormalizationRule::new(
            "uuid",
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
            "<uuid>",
        ),
        NormalizationRule::new("address", r"0x[0-9a-fA-F]+", "<addr>"),
        NormalizationRule::new(
            "timestamp",
            r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
            "<ts>",
        ),
        NormalizationRule::new("hex_id", r"\b[0-9a-fA-F]{16,}\b", "<hex>"),
        NormalizationRule::new("number", r"\b\d+(?:\.\d+)?\b", "<n>"),
    ]
}

/// Error fingerprint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Number of innermost frames included in the fingerprint.
    pub frame_depth: usize,
    /// Ordered normalization rules.
    pub rules: Vec<NormalizationRule>,
}

impl FingerprintConfig {
    /// Creates a configuration with the default rules and a depth of 5.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frame_depth: 5,
            rules: default_rules(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame depth is out of range or a rule does
    /// not compile.
    pub fn validate(&self) -> Result<(), String> {
        if self.frame_depth > MAX_FRAME_DEPTH {
            return Err(format!(
                "Fingerprint frame depth cannot exceed {MAX_FRAME_DEPTH}"
            ));
        }
        for rule in &self.rules {
            rule.compile()?;
        }
        Ok(())
    }
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self::new()
    }
}
