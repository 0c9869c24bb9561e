//! Run diagnostics sink
//!
//! A single `Diagnostics` value is shared (behind an `Arc`) by the
//! coordinator, the retry policy and the persistence workers. Counters are
//! lock-free; the failure ledger sits behind its own mutex and is written to
//! the `failures` table when the run finishes.

use crate::storage::FailureRecord;
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Atomic counter for lock-free metric updates
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Why a task was abandoned or a record was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// A fetch task reached `Fatal`
    FatalTask,
    /// An item arrived for a collection that was never stored
    OrphanItem,
    /// A detail never matched an item within its attempt bound
    UnresolvedDetail,
    /// The backend rejected a write
    StorageError,
}

impl DropReason {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::FatalTask => "fatal_task",
            Self::OrphanItem => "orphan_item",
            Self::UnresolvedDetail => "unresolved_detail",
            Self::StorageError => "storage_error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "fatal_task" => Some(Self::FatalTask),
            "orphan_item" => Some(Self::OrphanItem),
            "unresolved_detail" => Some(Self::UnresolvedDetail),
            "storage_error" => Some(Self::StorageError),
            _ => None,
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Counters and failure ledger of one harvest run
#[derive(Debug, Default)]
pub struct Diagnostics {
    // Fetch attempts by classification
    pub attempts_success: Counter,
    pub attempts_transient: Counter,
    pub attempts_blocked: Counter,
    pub attempts_fatal: Counter,

    pub retries_scheduled: Counter,
    pub identities_exhausted: Counter,
    pub proxy_failures: Counter,
    pub proxy_bans: Counter,

    // Persistence
    pub collections_upserted: Counter,
    pub items_upserted: Counter,
    pub details_upserted: Counter,
    pub details_deferred: Counter,
    pub details_attached: Counter,

    /// Records or follow-ups skipped by `max-collections`/`max-items-per-collection`
    pub capped: Counter,

    dropped_fatal_task: Counter,
    dropped_orphan_item: Counter,
    dropped_unresolved_detail: Counter,
    dropped_storage_error: Counter,

    ledger: Mutex<Vec<FailureRecord>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn drop_counter(&self, reason: DropReason) -> &Counter {
        match reason {
            DropReason::FatalTask => &self.dropped_fatal_task,
            DropReason::OrphanItem => &self.dropped_orphan_item,
            DropReason::UnresolvedDetail => &self.dropped_unresolved_detail,
            DropReason::StorageError => &self.dropped_storage_error,
        }
    }

    /// Counts, logs and ledgers an abandoned task or a dropped record
    ///
    /// # Arguments
    ///
    /// * `reason` - Drop category
    /// * `target` - Task URL or record business key
    /// * `detail` - Human-readable cause
    pub fn record_drop(&self, reason: DropReason, target: impl Into<String>, detail: impl Into<String>) {
        let target = target.into();
        let detail = detail.into();

        self.drop_counter(reason).inc();
        tracing::warn!("Dropped [{}] {}: {}", reason, target, detail);

        let record = FailureRecord {
            reason,
            target,
            detail,
            at: Utc::now(),
        };
        match self.ledger.lock() {
            Ok(mut ledger) => ledger.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }

    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.drop_counter(reason).get()
    }

    /// Removes and returns the ledger entries collected so far
    pub fn take_ledger(&self) -> Vec<FailureRecord> {
        match self.ledger.lock() {
            Ok(mut ledger) => std::mem::take(&mut *ledger),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn ledger_len(&self) -> usize {
        match self.ledger.lock() {
            Ok(ledger) => ledger.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            attempts_success: self.attempts_success.get(),
            attempts_transient: self.attempts_transient.get(),
            attempts_blocked: self.attempts_blocked.get(),
            attempts_fatal: self.attempts_fatal.get(),
            retries_scheduled: self.retries_scheduled.get(),
            identities_exhausted: self.identities_exhausted.get(),
            proxy_failures: self.proxy_failures.get(),
            proxy_bans: self.proxy_bans.get(),
            collections_upserted: self.collections_upserted.get(),
            items_upserted: self.items_upserted.get(),
            details_upserted: self.details_upserted.get(),
            details_deferred: self.details_deferred.get(),
            details_attached: self.details_attached.get(),
            capped: self.capped.get(),
            dropped_fatal_task: self.dropped_fatal_task.get(),
            dropped_orphan_item: self.dropped_orphan_item.get(),
            dropped_unresolved_detail: self.dropped_unresolved_detail.get(),
            dropped_storage_error: self.dropped_storage_error.get(),
        }
    }
}

/// Plain copy of the diagnostics counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub attempts_success: u64,
    pub attempts_transient: u64,
    pub attempts_blocked: u64,
    pub attempts_fatal: u64,
    pub retries_scheduled: u64,
    pub identities_exhausted: u64,
    pub proxy_failures: u64,
    pub proxy_bans: u64,
    pub collections_upserted: u64,
    pub items_upserted: u64,
    pub details_upserted: u64,
    pub details_deferred: u64,
    pub details_attached: u64,
    pub capped: u64,
    pub dropped_fatal_task: u64,
    pub dropped_orphan_item: u64,
    pub dropped_unresolved_detail: u64,
    pub dropped_storage_error: u64,
}

impl DiagnosticsSnapshot {
    pub fn total_attempts(&self) -> u64 {
        self.attempts_success + self.attempts_transient + self.attempts_blocked + self.attempts_fatal
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped_fatal_task
            + self.dropped_orphan_item
            + self.dropped_unresolved_detail
            + self.dropped_storage_error
    }

    /// Writes the end-of-run summary to the log
    pub fn log_summary(&self) {
        tracing::info!(
            "Fetch attempts: {} (success {}, transient {}, blocked {}, fatal {}), retries {}",
            self.total_attempts(),
            self.attempts_success,
            self.attempts_transient,
            self.attempts_blocked,
            self.attempts_fatal,
            self.retries_scheduled
        );
        tracing::info!(
            "Identity: {} exhausted, {} proxy failures, {} proxies banned",
            self.identities_exhausted,
            self.proxy_failures,
            self.proxy_bans
        );
        tracing::info!(
            "Upserted: {} collections, {} items, {} details ({} deferred, {} attached late)",
            self.collections_upserted,
            self.items_upserted,
            self.details_upserted,
            self.details_deferred,
            self.details_attached
        );
        if self.total_dropped() > 0 {
            tracing::warn!(
                "Dropped: {} fatal tasks, {} orphan items, {} unresolved details, {} storage errors",
                self.dropped_fatal_task,
                self.dropped_orphan_item,
                self.dropped_unresolved_detail,
                self.dropped_storage_error
            );
        }
        if self.capped > 0 {
            tracing::info!("Skipped by caps: {}", self.capped);
        }
    }
}
