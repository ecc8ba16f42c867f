//! Storage engine: kind-class dispatch, retention, and secondary indexes.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use aether_core::types::Event;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}

/// Outcome of an [`EventStore::insert`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The event was durably stored.
    Admitted,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Same event id already stored.
    Duplicate,
    /// A replaceable/parameterized event already on file has a
    /// `created_at` at or after this one's.
    Superseded,
    /// The immutable event is older than the store's retention window.
    Expired,
    /// Ephemeral-kind events are never persisted; the caller still fans
    /// this out to matching subscribers.
    Ephemeral,
    /// `kind` fell outside the 0..=39_999 range. The validator rejects
    /// this before storage ever sees the event; kept here so storage's
    /// error taxonomy matches its contract even if called directly.
    KindOutOfRange,
}

/// A query over stored (non-ephemeral) events. `None` fields impose no
/// constraint; all present fields are AND-ed.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub kinds: Option<Vec<u16>>,
    pub pubkeys: Option<Vec<[u8; 32]>>,
    pub tags: Option<Vec<(String, String)>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
}

/// The storage backend contract. Ephemeral-kind events are never
/// admitted (dispatch to live subscribers happens upstream in
/// [`crate::core::RelayCore::publish`] regardless of the outcome here).
pub trait EventStore: Send + Sync {
    fn insert(&self, event: Event) -> Result<InsertOutcome, StorageError>;
    fn query(&self, query: &Query) -> Result<Vec<Event>, StorageError>;
    fn has_event(&self, event_id: &[u8; 32]) -> Result<bool, StorageError>;
    fn event_count(&self) -> Result<usize, StorageError>;
}

/// Extract the first value of the event's `d` tag, or `""` if absent —
/// the key parameterized-replaceable events are superseded by.
pub fn d_tag(event: &Event) -> String {
    event.d_tag().to_string()
}
