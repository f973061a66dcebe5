//! Audit storage trait and implementations.
//!
//! The store is append-only: it exposes no update or delete. Each chain is a
//! dense sequence starting at 0; an append must carry the next sequence.

use crate::models::AuditEntry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during audit store operations.
#[derive(Debug, Error)]
pub enum AuditStoreError {
    /// The appended entry does not continue the chain.
    #[error("Chain {chain} expects sequence {expected}, got {actual}")]
    SequenceMismatch {
        /// Chain key.
        chain: String,
        /// Next sequence of the chain.
        expected: u64,
        /// Sequence of the rejected entry.
        actual: u64,
    },

    /// Entry not found.
    #[error("Audit entry not found: {chain}#{sequence}")]
    NotFound {
        /// Chain key.
        chain: String,
        /// Requested sequence.
        sequence: u64,
    },

    /// Generic storage error.
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Trait for audit storage implementations.
///
/// Implementations must be thread-safe (Send + Sync). Callers serialize
/// appends to one chain; the store only checks sequence continuity.
pub trait AuditStore: Send + Sync {
    /// Appends an entry to its chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry's sequence is not the chain's next
    /// sequence or the storage operation fails.
    fn append(&self, entry: AuditEntry) -> Result<(), AuditStoreError>;

    /// Returns the last entry of a chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    fn head(&self, chain: &str) -> Result<Option<AuditEntry>, AuditStoreError>;

    /// Gets one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is not found.
    fn get(&self, chain: &str, sequence: u64) -> Result<AuditEntry, AuditStoreError>;

    /// Returns the entries with `start <= sequence < end` (to the head when
    /// `end` is `None`), in sequence order.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    fn range(
        &self,
        chain: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<AuditEntry>, AuditStoreError>;

    /// Returns all chain keys, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    fn chains(&self) -> Result<Vec<String>, AuditStoreError>;

    /// Returns every entry about a resource, across chains, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation fails.
    fn by_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<AuditEntry>, AuditStoreError>;

    /// Returns the number of entries in a chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the count operation fails.
    fn len(&self, chain: &str) -> Result<u64, AuditStoreError>;
}

/// In-memory audit store implementation.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    /// Entries by chain, indexed by sequence.
    chains: DashMap<String, Vec<AuditEntry>>,
    /// `(resource_type, resource_id)` to `(chain, sequence)`.
    resources: DashMap<(String, String), Vec<(String, u64)>>,
}

impl InMemoryAuditStore {
    /// Creates a new empty in-memory audit store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory audit store wrapped in an Arc.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn index(sequence: u64) -> usize {
    sequence as usize
}

impl AuditStore for InMemoryAuditStore {
    fn append(&self, entry: AuditEntry) -> Result<(), AuditStoreError> {
        let mut chain = self.chains.entry(entry.chain.clone()).or_default();
        let expected = chain.len() as u64;
        if entry.sequence != expected {
            return Err(AuditStoreError::SequenceMismatch {
                chain: entry.chain,
                expected,
                actual: entry.sequence,
            });
        }

        self.resources
            .entry((entry.resource_type.clone(), entry.resource_id.clone()))
            .or_default()
            .push((entry.chain.clone(), entry.sequence));
        chain.push(entry);
        Ok(())
    }

    fn head(&self, chain: &str) -> Result<Option<AuditEntry>, AuditStoreError> {
        Ok(self
            .chains
            .get(chain)
            .and_then(|entries| entries.last().cloned()))
    }

    fn get(&self, chain: &str, sequence: u64) -> Result<AuditEntry, AuditStoreError> {
        self.chains
            .get(chain)
            .and_then(|entries| entries.get(index(sequence)).cloned())
            .ok_or_else(|| AuditStoreError::NotFound {
                chain: chain.to_string(),
                sequence,
            })
    }

    fn range(
        &self,
        chain: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<AuditEntry>, AuditStoreError> {
        let Some(entries) = self.chains.get(chain) else {
            return Ok(Vec::new());
        };
        let end = end.map_or(entries.len(), |e| index(e).min(entries.len()));
        let start = index(start).min(end);
        Ok(entries[start..end].to_vec())
    }

    fn chains(&self) -> Result<Vec<String>, AuditStoreError> {
        let mut keys: Vec<String> = self.chains.iter().map(|e| e.key().clone()).collect();
        keys.sort_unstable();
        Ok(keys)
    }

    fn by_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<AuditEntry>, AuditStoreError> {
        let refs = self
            .resources
            .get(&(resource_type.to_string(), resource_id.to_string()))
            .map(|r| r.value().clone())
            .unwrap_or_default();

        let mut entries = refs
            .into_iter()
            .map(|(chain, sequence)| self.get(&chain, sequence))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        Ok(entries)
    }

    fn len(&self, chain: &str) -> Result<u64, AuditStoreError> {
        Ok(self.chains.get(chain).map_or(0, |e| e.len() as u64))
    }
}
