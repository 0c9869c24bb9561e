//! Storage traits and error types
//!
//! `Store` is the narrow repository the reconciler writes through. Each
//! upsert runs in its own transaction; a failure rolls back that single
//! record and leaves sibling rows untouched.

use crate::storage::{
    CollectionRecord, FailureRecord, ItemDetailRecord, ItemRecord, RunRecord, RunStatus,
    StoredCollection, StoredItem, StoredItemDetail,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Item {collection_key}#{sequence} has no stored collection")]
    OrphanItem {
        collection_key: String,
        sequence: i64,
    },

    #[error("Detail {collection_key}#{sequence} could not be matched to a stored item")]
    UnresolvedDetail {
        collection_key: String,
        sequence: i64,
    },

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Invalid timestamp in database: {0}")]
    Timestamp(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// Whether the error is a referential-integrity rejection rather than a backend fault
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::OrphanItem { .. } | Self::UnresolvedDetail { .. })
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
pub trait Store: Send {
    // ===== Upserts =====

    /// Inserts or updates a collection by business key
    ///
    /// A new row gets `created_at = updated_at = now`; an existing row has
    /// its mutable fields replaced and `updated_at` raised to `now`, while
    /// `created_at` is left untouched.
    ///
    /// # Returns
    ///
    /// The surrogate id of the collection row
    fn upsert_collection(
        &mut self,
        record: &CollectionRecord,
        now: DateTime<Utc>,
    ) -> StorageResult<i64>;

    /// Inserts or updates an item by (collection key, sequence)
    ///
    /// Fails with `StorageError::OrphanItem` if the collection row is missing.
    fn upsert_item(&mut self, record: &ItemRecord, now: DateTime<Utc>) -> StorageResult<i64>;

    /// Inserts or updates the detail of an already resolved item
    fn upsert_item_detail(
        &mut self,
        item_id: i64,
        record: &ItemDetailRecord,
        now: DateTime<Utc>,
    ) -> StorageResult<i64>;

    // ===== Lookups =====

    /// Resolves an item's surrogate id from its business key
    fn find_item_id(&self, collection_key: &str, sequence: i64) -> StorageResult<Option<i64>>;

    fn get_collection(&self, key: &str) -> StorageResult<Option<StoredCollection>>;

    fn get_item(&self, collection_key: &str, sequence: i64) -> StorageResult<Option<StoredItem>>;

    fn get_item_detail(
        &self,
        collection_key: &str,
        sequence: i64,
    ) -> StorageResult<Option<StoredItemDetail>>;

    // ===== Run Management =====

    /// Creates a new harvest run and returns its id
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Marks a run finished with the given status
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Lists runs, most recent first
    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;

    // ===== Failure Ledger =====

    /// Appends failures of a run to the ledger
    fn record_failures(&mut self, run_id: i64, failures: &[FailureRecord]) -> StorageResult<()>;

    /// Counts ledger entries per drop reason
    fn count_failures_by_reason(&self) -> StorageResult<HashMap<String, u64>>;

    // ===== Statistics =====

    fn count_collections(&self) -> StorageResult<u64>;

    fn count_items(&self) -> StorageResult<u64>;

    fn count_item_details(&self) -> StorageResult<u64>;
}
