//! Idempotent upserts of the three record levels
//!
//! The reconciler resolves business keys to surrogate ids through the
//! `Store`, parks details whose item row does not exist yet, and turns every
//! referential-integrity or backend failure into a counted, ledgered drop.
//! Locks are always taken in the order store, then pending buffer.

use crate::output::{Diagnostics, DropReason};
use crate::persistence::pending::PendingBuffer;
use crate::storage::{
    CollectionRecord, ItemDetailRecord, ItemRecord, Record, StorageError, StorageResult, Store,
};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};

/// Result of delivering an item detail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailOutcome {
    /// Stored against the item with this surrogate id
    Stored(i64),
    /// Item not found yet; parked after `attempts` failed resolutions
    Deferred { attempts: u32 },
}

/// Counts from one pass over the pending buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attached: usize,
    pub dropped: usize,
    pub pending: usize,
}

/// Reconciles extracted records into a `Store`
pub struct Reconciler<S: Store> {
    store: Mutex<S>,
    pending: Mutex<PendingBuffer>,
    diagnostics: Arc<Diagnostics>,
    detail_max_attempts: u32,
}

impl<S: Store> Reconciler<S> {
    /// Creates a reconciler over `store`
    ///
    /// # Arguments
    ///
    /// * `store` - Transactional backend
    /// * `diagnostics` - Sink for upsert counters and drops
    /// * `detail_max_attempts` - Failed resolutions after which a parked detail is dropped
    pub fn new(store: S, diagnostics: Arc<Diagnostics>, detail_max_attempts: u32) -> Self {
        Self {
            store: Mutex::new(store),
            pending: Mutex::new(PendingBuffer::new()),
            diagnostics,
            detail_max_attempts: detail_max_attempts.max(1),
        }
    }

    fn store(&self) -> MutexGuard<'_, S> {
        match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn pending(&self) -> MutexGuard<'_, PendingBuffer> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Upserts a collection and returns its surrogate id
    pub fn upsert_collection(&self, record: &CollectionRecord) -> StorageResult<i64> {
        let id = self.store().upsert_collection(record, Utc::now())?;
        self.diagnostics.collections_upserted.inc();
        tracing::debug!("Upserted collection {} (id {})", record.key, id);
        Ok(id)
    }

    /// Upserts an item, then attaches a detail parked for it
    ///
    /// Fails with `StorageError::OrphanItem` when the collection row is missing.
    pub fn upsert_item(&self, record: &ItemRecord) -> StorageResult<i64> {
        let mut store = self.store();
        let item_id = store.upsert_item(record, Utc::now())?;
        self.diagnostics.items_upserted.inc();

        let parked = self.pending().take(&record.collection_key, record.sequence);
        if let Some(parked) = parked {
            match store.upsert_item_detail(item_id, &parked.record, Utc::now()) {
                Ok(_) => {
                    self.diagnostics.details_upserted.inc();
                    self.diagnostics.details_attached.inc();
                    tracing::debug!(
                        "Attached parked detail {}#{} after {} attempt(s)",
                        record.collection_key,
                        record.sequence,
                        parked.attempts
                    );
                }
                Err(e) => self.diagnostics.record_drop(
                    DropReason::StorageError,
                    Record::ItemDetail(parked.record).describe(),
                    e.to_string(),
                ),
            }
        }

        Ok(item_id)
    }

    /// Upserts an item detail, parking it while its item is unknown
    ///
    /// Fails with `StorageError::UnresolvedDetail` once the detail has missed
    /// its item `detail_max_attempts` times; the parked copy is discarded.
    pub fn upsert_item_detail(&self, record: &ItemDetailRecord) -> StorageResult<DetailOutcome> {
        let mut store = self.store();

        if let Some(item_id) = store.find_item_id(&record.collection_key, record.sequence)? {
            store.upsert_item_detail(item_id, record, Utc::now())?;
            self.diagnostics.details_upserted.inc();
            return Ok(DetailOutcome::Stored(item_id));
        }

        let mut pending = self.pending();
        let attempts = pending.defer(record.clone());
        if attempts >= self.detail_max_attempts {
            pending.take(&record.collection_key, record.sequence);
            return Err(StorageError::UnresolvedDetail {
                collection_key: record.collection_key.clone(),
                sequence: record.sequence,
            });
        }

        if attempts == 1 {
            self.diagnostics.details_deferred.inc();
        }
        tracing::debug!(
            "Parked detail {}#{} (attempt {})",
            record.collection_key,
            record.sequence,
            attempts
        );
        Ok(DetailOutcome::Deferred { attempts })
    }

    /// Applies one record, turning any failure into a recorded drop
    ///
    /// Per-record failures never propagate: the run continues.
    pub fn apply(&self, record: Record) {
        let result = match &record {
            Record::Collection(c) => self.upsert_collection(c).map(|_| ()),
            Record::Item(i) => self.upsert_item(i).map(|_| ()),
            Record::ItemDetail(d) => self.upsert_item_detail(d).map(|_| ()),
        };

        if let Err(e) = result {
            let reason = match e {
                StorageError::OrphanItem { .. } => DropReason::OrphanItem,
                StorageError::UnresolvedDetail { .. } => DropReason::UnresolvedDetail,
                _ => DropReason::StorageError,
            };
            self.diagnostics
                .record_drop(reason, record.describe(), e.to_string());
        }
    }

    /// Retries every parked detail once
    pub fn sweep(&self) -> SweepReport {
        self.resolve_parked(false)
    }

    /// Final resolution pass; whatever is still parked is dropped as unresolved
    pub fn flush(&self) -> SweepReport {
        self.resolve_parked(true)
    }

    fn resolve_parked(&self, final_pass: bool) -> SweepReport {
        // Holding the store lock for the whole pass keeps new deferrals out
        let mut store = self.store();
        let parked = self.pending().drain();
        let mut report = SweepReport::default();

        for mut entry in parked {
            match store.find_item_id(&entry.record.collection_key, entry.record.sequence) {
                Ok(Some(item_id)) => {
                    match store.upsert_item_detail(item_id, &entry.record, Utc::now()) {
                        Ok(_) => {
                            self.diagnostics.details_upserted.inc();
                            self.diagnostics.details_attached.inc();
                            report.attached += 1;
                        }
                        Err(e) => {
                            self.diagnostics.record_drop(
                                DropReason::StorageError,
                                Record::ItemDetail(entry.record).describe(),
                                e.to_string(),
                            );
                            report.dropped += 1;
                        }
                    }
                }
                Ok(None) => {
                    entry.attempts += 1;
                    if final_pass || entry.attempts >= self.detail_max_attempts {
                        self.drop_unresolved(&entry.record);
                        report.dropped += 1;
                    } else {
                        self.pending().restore(entry);
                        report.pending += 1;
                    }
                }
                Err(e) => {
                    self.diagnostics.record_drop(
                        DropReason::StorageError,
                        Record::ItemDetail(entry.record).describe(),
                        e.to_string(),
                    );
                    report.dropped += 1;
                }
            }
        }

        if report.attached + report.dropped > 0 {
            tracing::debug!(
                "Pending sweep: {} attached, {} dropped, {} still parked",
                report.attached,
                report.dropped,
                report.pending
            );
        }
        report
    }

    fn drop_unresolved(&self, record: &ItemDetailRecord) {
        let err = StorageError::UnresolvedDetail {
            collection_key: record.collection_key.clone(),
            sequence: record.sequence,
        };
        self.diagnostics.record_drop(
            DropReason::UnresolvedDetail,
            Record::ItemDetail(record.clone()).describe(),
            err.to_string(),
        );
    }

    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Runs `f` with exclusive access to the store
    pub fn with_store<T>(&self, f: impl FnOnce(&mut S) -> T) -> T {
        f(&mut self.store())
    }
}
