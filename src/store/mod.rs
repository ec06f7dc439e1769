//! Document-store collaborator boundary.
//!
//! The broker only relies on the generic collection capabilities below;
//! the in-memory implementation backs tests and embedded use, a real
//! driver can be slotted in behind the same trait.

mod memory;

pub use memory::MemoryStore;

use crate::query::{Filter, FindOptions};
use bson::{Bson, Document as BsonDocument};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Collection not found: {0}")]
    NoSuchCollection(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: u64,
}

/// Per-collection document operations the broker depends on. Field
/// mutations address entities by their external `id` and accept dotted
/// paths into nested documents.
pub trait EntityStore: Send + Sync {
    /// Runs filter + projection + sort + skip + limit. A limit of 0
    /// applies no explicit cap. The internal `_id` never appears in
    /// results.
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        opts: &FindOptions,
    ) -> Result<Vec<BsonDocument>, StoreError>;

    /// Total match count, independent of any pagination window.
    fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Inserts a document, returning the store-internal id.
    fn insert(&self, collection: &str, doc: BsonDocument) -> Result<String, StoreError>;

    fn set_field(
        &self,
        collection: &str,
        entity_id: &str,
        field: &str,
        value: Bson,
        upsert: bool,
    ) -> Result<UpdateReport, StoreError>;

    fn unset_field(
        &self,
        collection: &str,
        entity_id: &str,
        field: &str,
    ) -> Result<UpdateReport, StoreError>;

    fn delete_by_id(&self, collection: &str, entity_id: &str) -> Result<DeleteReport, StoreError>;

    /// Atomic numeric increment on one document field, used for the
    /// parent-record counters on entity creation.
    fn increment_field(
        &self,
        collection: &str,
        entity_id: &str,
        field: &str,
        delta: i64,
    ) -> Result<UpdateReport, StoreError>;
}
