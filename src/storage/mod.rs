//! Storage module for persisting harvested records
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Transactional upserts of collections, items and item details
//! - Run tracking
//! - The failure ledger of abandoned tasks and dropped records

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{init_database, SqliteStorage};
pub use traits::{Store, StorageError, StorageResult};

use crate::output::DropReason;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Opens (or creates) the storage database
pub fn open_storage(path: &Path) -> Result<SqliteStorage, crate::HarvestError> {
    SqliteStorage::new(path)
}

/// A collection as extracted from a collection-list page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRecord {
    /// Stable site-assigned identifier
    pub key: String,
    pub title: String,
    pub source_url: String,
    /// Number of items the source claims the collection has
    pub item_count_hint: Option<u32>,
    pub status: String,
}

/// An item of a collection, addressed by (collection key, sequence)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    pub collection_key: String,
    pub sequence: i64,
    pub title: String,
    pub source_url: String,
    /// Publication date exactly as the source prints it
    pub published: String,
}

/// Body of an item, addressed by the owning item's business key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDetailRecord {
    pub collection_key: String,
    pub sequence: i64,
    pub body: String,
}

/// Any record produced by extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Collection(CollectionRecord),
    Item(ItemRecord),
    ItemDetail(ItemDetailRecord),
}

impl Record {
    /// Business key of the collection this record belongs to
    pub fn collection_key(&self) -> &str {
        match self {
            Self::Collection(c) => &c.key,
            Self::Item(i) => &i.collection_key,
            Self::ItemDetail(d) => &d.collection_key,
        }
    }

    /// Human-readable business key, used in diagnostics
    pub fn describe(&self) -> String {
        match self {
            Self::Collection(c) => format!("collection {}", c.key),
            Self::Item(i) => format!("item {}#{}", i.collection_key, i.sequence),
            Self::ItemDetail(d) => format!("detail {}#{}", d.collection_key, d.sequence),
        }
    }
}

/// A collection row as stored
#[derive(Debug, Clone)]
pub struct StoredCollection {
    pub id: i64,
    pub key: String,
    pub title: String,
    pub source_url: String,
    pub item_count_hint: Option<u32>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An item row as stored
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub id: i64,
    pub collection_id: i64,
    pub sequence: i64,
    pub title: String,
    pub source_url: String,
    pub published: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An item detail row as stored
#[derive(Debug, Clone)]
pub struct StoredItemDetail {
    pub id: i64,
    pub item_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One abandoned task or dropped record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub reason: DropReason,
    /// URL of the task or business key of the record
    pub target: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
