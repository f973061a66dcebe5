//! Event storage trait and implementations.
//!
//! Provides the `EventStore` trait for abstracting event storage operations
//! and an `InMemoryEventStore` implementation backed by a sharded map.

use crate::models::{EventCategory, EventId, StoredEvent};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// An event with this id is already stored.
    #[error("Event already exists: {0}")]
    DuplicateId(EventId),

    /// Event not found.
    #[error("Event not found: {0}")]
    NotFound(EventId),

    /// Generic storage error.
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Query parameters for retrieving events.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Filter by tenant.
    pub tenant_id: Option<String>,

    /// Filter by exact event name.
    pub name: Option<String>,

    /// Filter by category.
    pub category: Option<EventCategory>,

    /// Filter by trace.
    pub trace_id: Option<String>,

    /// Only return orphaned events.
    pub orphaned_only: bool,

    /// Filter events from this time (inclusive).
    pub start_time: Option<DateTime<Utc>>,

    /// Filter events up to this time (exclusive).
    pub end_time: Option<DateTime<Utc>>,

    /// Maximum number of events to return.
    pub limit: Option<usize>,

    /// Number of events to skip (for pagination).
    pub offset: Option<usize>,
}

impl EventQuery {
    /// Creates a new empty query (returns all events).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tenant filter.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the name filter.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the category filter.
    #[must_use]
    pub fn with_category(mut self, category: EventCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Sets the trace filter.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Restricts the result to orphaned events.
    #[must_use]
    pub fn orphaned(mut self) -> Self {
        self.orphaned_only = true;
        self
    }

    /// Sets the start time filter.
    #[must_use]
    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    /// Sets the end time filter.
    #[must_use]
    pub fn with_end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    /// Sets the maximum number of results.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the offset for pagination.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    fn matches(&self, stored: &StoredEvent) -> bool {
        let event = &stored.event;
        if let Some(ref tenant) = self.tenant_id {
            if event.tenant_id.as_ref() != Some(tenant) {
                return false;
            }
        }
        if let Some(ref name) = self.name {
            if &event.name != name {
                return false;
            }
        }
        if let Some(category) = self.category {
            if event.category != category {
                return false;
            }
        }
        if let Some(ref trace_id) = self.trace_id {
            if event.trace_id.as_ref() != Some(trace_id) {
                return false;
            }
        }
        if self.orphaned_only && !stored.is_orphaned() {
            return false;
        }
        if let Some(start) = self.start_time {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if event.timestamp >= end {
                return false;
            }
        }
        true
    }
}

/// Result of an event query operation.
#[derive(Debug, Clone)]
pub struct EventQueryResult {
    /// The events matching the query, most recent first.
    pub events: Vec<StoredEvent>,

    /// Total count of matching events (before limit/offset applied).
    pub total_count: usize,
}

/// Trait for event storage implementations.
///
/// Stored events are immutable: the trait offers no update, and events
/// leave the store only through retention pruning.
/// Implementations must be thread-safe (Send + Sync).
pub trait EventStore: Send + Sync {
    /// Inserts an event.
    ///
    /// # Errors
    ///
    /// Returns an error if an event with the same id exists or the storage
    /// operation fails.
    fn insert(&self, event: StoredEvent) -> Result<(), EventStoreError>;

    /// Gets an event by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is not found.
    fn get(&self, id: &EventId) -> Result<StoredEvent, EventStoreError>;

    /// Returns true if an event with this id is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn contains(&self, id: &EventId) -> Result<bool, EventStoreError>;

    /// Queries events based on the provided parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the query operation fails.
    fn query(&self, query: EventQuery) -> Result<EventQueryResult, EventStoreError>;

    /// Returns the total number of events in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the count operation fails.
    fn count(&self) -> Result<usize, EventStoreError>;

    /// Removes every event whose timestamp is before `cutoff`. Returns the
    /// number of removed events.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, EventStoreError>;
}

/// In-memory event store implementation.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: DashMap<EventId, StoredEvent>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory event store wrapped in an Arc.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl EventStore for InMemoryEventStore {
    fn insert(&self, event: StoredEvent) -> Result<(), EventStoreError> {
        match self.events.entry(event.id) {
            Entry::Occupied(_) => Err(EventStoreError::DuplicateId(event.id)),
            Entry::Vacant(slot) => {
                slot.insert(event);
                Ok(())
            }
        }
    }

    fn get(&self, id: &EventId) -> Result<StoredEvent, EventStoreError> {
        self.events
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EventStoreError::NotFound(*id))
    }

    fn contains(&self, id: &EventId) -> Result<bool, EventStoreError> {
        Ok(self.events.contains_key(id))
    }

    fn query(&self, query: EventQuery) -> Result<EventQueryResult, EventStoreError> {
        let mut events: Vec<StoredEvent> = self
            .events
            .iter()
            .filter(|e| query.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();

        // Most recent first; id breaks ties so pagination is stable
        events.sort_by(|a, b| {
            b.event
                .timestamp
                .cmp(&a.event.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total_count = events.len();
        let offset = query.offset.unwrap_or(0);
        let events = events
            .into_iter()
            .skip(offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(EventQueryResult {
            events,
            total_count,
        })
    }

    fn count(&self) -> Result<usize, EventStoreError> {
        Ok(self.events.len())
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, EventStoreError> {
        let before = self.events.len();
        self.events.retain(|_, e| e.event.timestamp >= cutoff);
        Ok(before.saturating_sub(self.events.len()))
    }
}
