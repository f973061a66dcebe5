//! Tamper-evident audit chain.
//!
//! [`AuditChainLogger`] appends audit entries to hash chains. Each entry's
//! checksum covers the previous checksum and the canonical JSON form of the
//! entry, so altering any stored entry breaks verification from that entry
//! onwards. Entries are never updated or deleted; mistakes are fixed by
//! appending a correction.

use crate::config::ChainScope;
use crate::models::{AuditEntry, AuditValidationError, FieldValues, NewAuditEntry, GENESIS_CHECKSUM};
use crate::storage::{AuditStore, AuditStoreError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors that can occur while appending or verifying audit entries.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The entry is malformed.
    #[error("Invalid audit entry: {0}")]
    InvalidEntry(#[from] AuditValidationError),

    /// A correction references an entry that is not in the chain.
    #[error("Corrected entry {sequence} does not exist in chain {chain}")]
    UnknownCorrectionTarget {
        /// Chain key.
        chain: String,
        /// Referenced sequence.
        sequence: u64,
    },

    /// Verification found entries whose checksums do not match.
    #[error("Audit chain {chain} diverges at sequence {first_invalid}")]
    ChainIntegrity {
        /// Chain key.
        chain: String,
        /// First diverging sequence.
        first_invalid: u64,
    },

    /// The entry could not be serialized for hashing.
    #[error("Failed to serialize audit entry: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The audit store failed.
    #[error("Audit store error: {0}")]
    Store(#[from] AuditStoreError),
}

#[derive(Serialize)]
struct CanonicalEntry<'a> {
    sequence: u64,
    chain: &'a str,
    user_id: Option<&'a str>,
    tenant_id: Option<&'a str>,
    action: crate::models::AuditAction,
    resource_type: &'a str,
    resource_id: &'a str,
    old_values: &'a FieldValues,
    new_values: &'a FieldValues,
    changed_fields: &'a [String],
    timestamp: DateTime<Utc>,
    corrects: Option<u64>,
    prev_checksum: &'a str,
}

/// Computes the checksum of `entry` chained onto `prev_checksum`.
///
/// The stored `prev_checksum` and `checksum` of `entry` are ignored.
///
/// # Errors
///
/// Returns an error if the entry cannot be serialized.
pub fn compute_checksum(prev_checksum: &str, entry: &AuditEntry) -> Result<String, AuditError> {
    let canonical = serde_json::to_vec(&CanonicalEntry {
        sequence: entry.sequence,
        chain: &entry.chain,
        user_id: entry.actor.user_id.as_deref(),
        tenant_id: entry.actor.tenant_id.as_deref(),
        action: entry.action,
        resource_type: &entry.resource_type,
        resource_id: &entry.resource_id,
        old_values: &entry.old_values,
        new_values: &entry.new_values,
        changed_fields: &entry.changed_fields,
        timestamp: entry.timestamp,
        corrects: entry.corrects,
        prev_checksum,
    })?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(prev_checksum.as_bytes());
    hasher.update(&canonical);
    Ok(hasher.finalize().to_hex().to_string())
}

/// Result of verifying a range of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Chain key.
    pub chain: String,
    /// First verified sequence.
    pub start: u64,
    /// Number of entries checked.
    pub checked: u64,
    /// First diverging sequence.
    pub first_invalid: Option<u64>,
    /// Every sequence that failed verification.
    pub invalid_sequences: Vec<u64>,
    /// When verification ran.
    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    /// Returns true if every checked entry matched.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.first_invalid.is_none()
    }

    /// Converts a failed report into [`AuditError::ChainIntegrity`].
    ///
    /// # Errors
    ///
    /// Returns an error if the report is not valid.
    pub fn into_result(self) -> Result<Self, AuditError> {
        match self.first_invalid {
            Some(first_invalid) => Err(AuditError::ChainIntegrity {
                chain: self.chain,
                first_invalid,
            }),
            None => Ok(self),
        }
    }
}

/// Verifies consecutive entries of one chain anchored on `anchor`, the
/// checksum preceding the first entry (genesis for sequence 0).
///
/// The recomputed checksum of each entry is the anchor of the next, so a
/// tampered entry invalidates itself and every entry after it.
///
/// # Errors
///
/// Returns an error if an entry cannot be serialized.
pub fn verify_entries(
    chain: &str,
    start: u64,
    entries: &[AuditEntry],
    anchor: &str,
) -> Result<VerificationReport, AuditError> {
    let mut expected_prev = anchor.to_string();
    let mut invalid_sequences = Vec::new();

    for (offset, entry) in (0_u64..).zip(entries) {
        let recomputed = compute_checksum(&expected_prev, entry)?;
        let intact = entry.sequence == start + offset
            && entry.chain == chain
            && entry.prev_checksum == expected_prev
            && entry.checksum == recomputed;
        if !intact {
            invalid_sequences.push(entry.sequence);
        }
        expected_prev = recomputed;
    }

    Ok(VerificationReport {
        chain: chain.to_string(),
        start,
        checked: entries.len() as u64,
        first_invalid: invalid_sequences.first().copied(),
        invalid_sequences,
        verified_at: Utc::now(),
    })
}

/// Records the most recent failed verification.
///
/// The alert evaluator watches the flag; operators clear it after
/// investigating.
#[derive(Debug, Default)]
pub struct IntegrityFlag {
    raised: AtomicBool,
    last_failure: Mutex<Option<VerificationReport>>,
}

impl IntegrityFlag {
    /// Creates a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn failure_slot(&self) -> MutexGuard<'_, Option<VerificationReport>> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Raises the flag for a failed report.
    pub fn raise(&self, report: VerificationReport) {
        *self.failure_slot() = Some(report);
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Lowers the flag and returns the failure it held.
    pub fn clear(&self) -> Option<VerificationReport> {
        self.raised.store(false, Ordering::SeqCst);
        self.failure_slot().take()
    }

    /// Returns true while a failure is unacknowledged.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// The failure that raised the flag.
    #[must_use]
    pub fn last_failure(&self) -> Option<VerificationReport> {
        self.failure_slot().clone()
    }
}

/// Appends to and verifies audit chains.
pub struct AuditChainLogger {
    store: Arc<dyn AuditStore>,
    scope: ChainScope,
    chain_locks: DashMap<String, Arc<Mutex<()>>>,
    integrity: Arc<IntegrityFlag>,
}

impl AuditChainLogger {
    /// Creates a logger with its own integrity flag.
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>, scope: ChainScope) -> Self {
        Self {
            store,
            scope,
            chain_locks: DashMap::new(),
            integrity: Arc::new(IntegrityFlag::new()),
        }
    }

    /// The audit store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// The chain partitioning.
    #[must_use]
    pub fn scope(&self) -> ChainScope {
        self.scope
    }

    /// The integrity flag raised by failed verifications.
    #[must_use]
    pub fn integrity(&self) -> &Arc<IntegrityFlag> {
        &self.integrity
    }

    fn chain_lock(&self, chain: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.chain_locks
                .entry(chain.to_string())
                .or_default()
                .value(),
        )
    }

    /// Appends an entry to the chain selected by the actor's tenant.
    ///
    /// Reading the chain head, hashing and storing happen under the chain's
    /// mutex; other chains append concurrently.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is invalid, a correction target does
    /// not exist, or the store fails.
    pub fn append(&self, new_entry: NewAuditEntry) -> Result<AuditEntry, AuditError> {
        new_entry.validate_entry()?;

        let chain = self.scope.chain_key(new_entry.actor.tenant_id.as_deref());
        let lock = self.chain_lock(&chain);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(target) = new_entry.corrects {
            if let Err(AuditStoreError::NotFound { .. }) = self.store.get(&chain, target) {
                return Err(AuditError::UnknownCorrectionTarget {
                    chain,
                    sequence: target,
                });
            }
        }

        let (sequence, prev_checksum) = match self.store.head(&chain)? {
            Some(head) => (head.sequence + 1, head.checksum),
            None => (0, GENESIS_CHECKSUM.to_string()),
        };

        let changed_fields = if new_entry.changed_fields.is_empty() {
            new_entry.diff_fields()
        } else {
            let mut fields = new_entry.changed_fields;
            fields.sort_unstable();
            fields.dedup();
            fields
        };

        let mut entry = AuditEntry {
            sequence,
            chain,
            actor: new_entry.actor,
            action: new_entry.action,
            resource_type: new_entry.resource_type,
            resource_id: new_entry.resource_id,
            old_values: new_entry.old_values,
            new_values: new_entry.new_values,
            changed_fields,
            timestamp: new_entry.timestamp,
            corrects: new_entry.corrects,
            prev_checksum,
            checksum: String::new(),
        };
        entry.checksum = compute_checksum(&entry.prev_checksum, &entry)?;

        self.store.append(entry.clone())?;
        debug!(
            chain = %entry.chain,
            sequence = entry.sequence,
            action = %entry.action,
            resource_type = %entry.resource_type,
            "Audit entry appended"
        );
        Ok(entry)
    }

    /// Appends a correction of the entry at `original_sequence`.
    ///
    /// # Errors
    ///
    /// Returns an error if the original entry does not exist in the chain
    /// the correction lands in, or the append fails.
    pub fn correct(
        &self,
        original_sequence: u64,
        new_entry: NewAuditEntry,
    ) -> Result<AuditEntry, AuditError> {
        self.append(new_entry.correcting(original_sequence))
    }

    /// Verifies the entries of `chain` with `start <= sequence < end`
    /// (to the head when `end` is `None`).
    ///
    /// A failed verification is logged and raises the integrity flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the anchor entry is missing.
    pub fn verify(
        &self,
        chain: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<VerificationReport, AuditError> {
        let anchor = match start {
            0 => GENESIS_CHECKSUM.to_string(),
            _ => self.store.get(chain, start - 1)?.checksum,
        };
        let entries = self.store.range(chain, start, end)?;
        let report = verify_entries(chain, start, &entries, &anchor)?;

        if report.is_valid() {
            info!(chain, checked = report.checked, "Audit chain verified");
        } else {
            error!(
                chain,
                first_invalid = ?report.first_invalid,
                invalid = report.invalid_sequences.len(),
                "Audit chain integrity violated"
            );
            self.integrity.raise(report.clone());
        }
        Ok(report)
    }

    /// Verifies every chain from genesis.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn verify_all(&self) -> Result<Vec<VerificationReport>, AuditError> {
        self.store
            .chains()?
            .iter()
            .map(|chain| self.verify(chain, 0, None))
            .collect()
    }

    /// Returns every entry about a resource, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn history(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.store.by_resource(resource_type, resource_id)?)
    }
}
