//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Store trait.

use crate::output::DropReason;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StorageError, StorageResult, Store};
use crate::storage::{
    CollectionRecord, FailureRecord, ItemDetailRecord, ItemRecord, RunRecord, RunStatus,
    StoredCollection, StoredItem, StoredItemDetail,
};
use crate::HarvestError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

/// Formats a timestamp so that text order equals time order
fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StorageError::Timestamp(raw.to_string()))
}

fn map_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Failed),
    })
}

impl Store for SqliteStorage {
    // ===== Upserts =====

    fn upsert_collection(
        &mut self,
        record: &CollectionRecord,
        now: DateTime<Utc>,
    ) -> StorageResult<i64> {
        let now = to_db_time(now);
        let tx = self.conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM collections WHERE collection_key = ?1",
                params![record.key],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE collections SET title = ?1, source_url = ?2, item_count_hint = ?3,
                     status = ?4, updated_at = MAX(updated_at, ?5) WHERE id = ?6",
                    params![
                        record.title,
                        record.source_url,
                        record.item_count_hint,
                        record.status,
                        now,
                        id
                    ],
                )?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO collections (collection_key, title, source_url, item_count_hint,
                     status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![
                        record.key,
                        record.title,
                        record.source_url,
                        record.item_count_hint,
                        record.status,
                        now
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        tx.commit()?;
        Ok(id)
    }

    fn upsert_item(&mut self, record: &ItemRecord, now: DateTime<Utc>) -> StorageResult<i64> {
        let now = to_db_time(now);
        let tx = self.conn.transaction()?;

        let collection_id: i64 = tx
            .query_row(
                "SELECT id FROM collections WHERE collection_key = ?1",
                params![record.collection_key],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::OrphanItem {
                collection_key: record.collection_key.clone(),
                sequence: record.sequence,
            })?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM items WHERE collection_id = ?1 AND sequence = ?2",
                params![collection_id, record.sequence],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE items SET title = ?1, source_url = ?2, published = ?3,
                     updated_at = MAX(updated_at, ?4) WHERE id = ?5",
                    params![record.title, record.source_url, record.published, now, id],
                )?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO items (collection_id, sequence, title, source_url, published,
                     created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![
                        collection_id,
                        record.sequence,
                        record.title,
                        record.source_url,
                        record.published,
                        now
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        tx.commit()?;
        Ok(id)
    }

    fn upsert_item_detail(
        &mut self,
        item_id: i64,
        record: &ItemDetailRecord,
        now: DateTime<Utc>,
    ) -> StorageResult<i64> {
        let now = to_db_time(now);
        let tx = self.conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM item_details WHERE item_id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE item_details SET body = ?1, updated_at = MAX(updated_at, ?2)
                     WHERE id = ?3",
                    params![record.body, now, id],
                )?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO item_details (item_id, body, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)",
                    params![item_id, record.body, now],
                )?;
                tx.last_insert_rowid()
            }
        };

        tx.commit()?;
        Ok(id)
    }

    // ===== Lookups =====

    fn find_item_id(&self, collection_key: &str, sequence: i64) -> StorageResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT i.id FROM items i JOIN collections c ON c.id = i.collection_id
                 WHERE c.collection_key = ?1 AND i.sequence = ?2",
                params![collection_key, sequence],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn get_collection(&self, key: &str) -> StorageResult<Option<StoredCollection>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, collection_key, title, source_url, item_count_hint, status,
                 created_at, updated_at FROM collections WHERE collection_key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<u32>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        row.map(
            |(id, key, title, source_url, item_count_hint, status, created, updated)|
             -> StorageResult<StoredCollection> {
                Ok(StoredCollection {
                    id,
                    key,
                    title,
                    source_url,
                    item_count_hint,
                    status,
                    created_at: from_db_time(&created)?,
                    updated_at: from_db_time(&updated)?,
                })
            },
        )
        .transpose()
    }

    fn get_item(&self, collection_key: &str, sequence: i64) -> StorageResult<Option<StoredItem>> {
        let row = self
            .conn
            .query_row(
                "SELECT i.id, i.collection_id, i.sequence, i.title, i.source_url, i.published,
                 i.created_at, i.updated_at
                 FROM items i JOIN collections c ON c.id = i.collection_id
                 WHERE c.collection_key = ?1 AND i.sequence = ?2",
                params![collection_key, sequence],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        row.map(
            |(id, collection_id, sequence, title, source_url, published, created, updated)|
             -> StorageResult<StoredItem> {
                Ok(StoredItem {
                    id,
                    collection_id,
                    sequence,
                    title,
                    source_url,
                    published,
                    created_at: from_db_time(&created)?,
                    updated_at: from_db_time(&updated)?,
                })
            },
        )
        .transpose()
    }

    fn get_item_detail(
        &self,
        collection_key: &str,
        sequence: i64,
    ) -> StorageResult<Option<StoredItemDetail>> {
        let row = self
            .conn
            .query_row(
                "SELECT d.id, d.item_id, d.body, d.created_at, d.updated_at
                 FROM item_details d
                 JOIN items i ON i.id = d.item_id
                 JOIN collections c ON c.id = i.collection_id
                 WHERE c.collection_key = ?1 AND i.sequence = ?2",
                params![collection_key, sequence],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, item_id, body, created, updated)| -> StorageResult<StoredItemDetail> {
            Ok(StoredItemDetail {
                id,
                item_id,
                body,
                created_at: from_db_time(&created)?,
                updated_at: from_db_time(&updated)?,
            })
        })
        .transpose()
    }

    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = to_db_time(Utc::now());
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = to_db_time(Utc::now());
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                map_run,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn list_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, status FROM runs
             ORDER BY id DESC LIMIT ?1",
        )?;
        let runs = stmt
            .query_map(params![limit as i64], map_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    // ===== Failure Ledger =====

    fn record_failures(&mut self, run_id: i64, failures: &[FailureRecord]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO failures (run_id, reason, target, detail, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for failure in failures {
                stmt.execute(params![
                    run_id,
                    failure.reason.to_db_string(),
                    failure.target,
                    failure.detail,
                    to_db_time(failure.at)
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn count_failures_by_reason(&self) -> StorageResult<HashMap<String, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT reason, COUNT(*) FROM failures GROUP BY reason")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (reason, count) = row?;
            if DropReason::from_db_string(&reason).is_none() {
                tracing::warn!("Unknown failure reason in ledger: {}", reason);
            }
            counts.insert(reason, count as u64);
        }
        Ok(counts)
    }

    // ===== Statistics =====

    fn count_collections(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM collections", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_items(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_item_details(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM item_details", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Initializes or opens a database at the given path
pub fn init_database(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
    ",
    )?;

    initialize_schema(&conn)?;

    Ok(conn)
}
