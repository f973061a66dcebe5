//! Error fingerprinting.
//!
//! A fingerprint identifies "the same error" across occurrences. It is a
//! BLAKE3 hash over the error type, the normalized message and the symbols
//! of the innermost stack frames. Line numbers never contribute, so the
//! fingerprint survives unrelated edits to the failing file.

use crate::config::FingerprintConfig;
use crate::models::StackFrame;
use regex::Regex;

/// Computes normalized messages and fingerprints.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    rules: Vec<(Regex, String)>,
    frame_depth: usize,
}

impl Fingerprinter {
    /// Compiles the configured normalization rules.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first rule that does not compile.
    pub fn new(config: &FingerprintConfig) -> Result<Self, String> {
        let rules = config
            .rules
            .iter()
            .map(|rule| Ok((rule.compile()?, rule.replacement.clone())))
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Self {
            rules,
            frame_depth: config.frame_depth,
        })
    }

    /// Number of frames that contribute to a fingerprint.
    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.frame_depth
    }

    /// Applies the rules in order, then collapses whitespace.
    #[must_use]
    pub fn normalize(&self, message: &str) -> String {
        let mut normalized = message.to_string();
        for (pattern, replacement) in &self.rules {
            normalized = pattern
                .replace_all(&normalized, replacement.as_str())
                .into_owned();
        }
        normalized.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Hashes an error type, an already normalized message and a stack.
    #[must_use]
    pub fn fingerprint(
        &self,
        error_type: &str,
        normalized_message: &str,
        stack: &[StackFrame],
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(error_type.as_bytes());
        hasher.update(&[0]);
        hasher.update(normalized_message.as_bytes());
        for frame in stack.iter().take(self.frame_depth) {
            hasher.update(&[0]);
            hasher.update(frame.symbol().as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Normalizes the message and returns `(fingerprint, normalized_message)`.
    #[must_use]
    pub fn compute(
        &self,
        error_type: &str,
        message: &str,
        stack: &[StackFrame],
    ) -> (String, String) {
        let normalized = self.normalize(message);
        (self.fingerprint(error_type, &normalized, stack), normalized)
    }
}
