//! Sharded persistence workers
//!
//! Records are routed to a shard by the hash of their collection key, so all
//! writes touching one collection (and its items and details) are applied by
//! one worker in arrival order. Workers run on the blocking pool. Queues are
//! unbounded: a slow database grows the backlog but never holds up the crawl.

use crate::persistence::reconciler::Reconciler;
use crate::storage::{Record, Store};
use crate::HarvestError;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Backlog size at which a warning is logged (and at each multiple after)
const BACKLOG_WARN: usize = 1024;

/// Handle to the running persistence shards
///
/// Shards route and order records; they do not write in parallel. Every
/// shard applies through the same reconciler, whose store sits behind one
/// lock, so `workers` sets how records are partitioned, not how many writes
/// run at once.
pub struct PersistenceWriter<S: Store + 'static> {
    reconciler: Arc<Reconciler<S>>,
    senders: Vec<mpsc::UnboundedSender<Record>>,
    handles: Vec<JoinHandle<()>>,
    /// Records submitted but not yet applied
    backlog: Arc<AtomicUsize>,
}

impl<S: Store + 'static> PersistenceWriter<S> {
    /// Spawns `workers` shards applying records through `reconciler`
    ///
    /// # Arguments
    ///
    /// * `reconciler` - Shared reconciler
    /// * `workers` - Number of shards (at least one)
    /// * `sweep_every` - Records a shard applies between pending-buffer sweeps
    pub fn spawn(reconciler: Arc<Reconciler<S>>, workers: usize, sweep_every: usize) -> Self {
        let workers = workers.max(1);
        let sweep_every = sweep_every.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        let backlog = Arc::new(AtomicUsize::new(0));

        for shard in 0..workers {
            let (tx, mut rx) = mpsc::unbounded_channel::<Record>();
            let reconciler = Arc::clone(&reconciler);
            let backlog = Arc::clone(&backlog);

            let handle = tokio::task::spawn_blocking(move || {
                let mut applied = 0usize;
                while let Some(record) = rx.blocking_recv() {
                    reconciler.apply(record);
                    backlog.fetch_sub(1, Ordering::Relaxed);
                    applied += 1;
                    if applied % sweep_every == 0 && reconciler.pending_len() > 0 {
                        reconciler.sweep();
                    }
                }
                tracing::debug!("Persistence shard {} applied {} records", shard, applied);
            });

            senders.push(tx);
            handles.push(handle);
        }

        Self {
            reconciler,
            senders,
            handles,
            backlog,
        }
    }

    fn shard_for(&self, collection_key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        collection_key.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queues a record on its collection's shard without waiting
    pub fn submit(&self, record: Record) -> Result<(), HarvestError> {
        let shard = self.shard_for(record.collection_key());
        let queued = self.backlog.fetch_add(1, Ordering::Relaxed) + 1;
        if queued % BACKLOG_WARN == 0 {
            tracing::warn!("Persistence is falling behind: {} records queued", queued);
        }
        self.senders[shard].send(record).map_err(|e| {
            self.backlog.fetch_sub(1, Ordering::Relaxed);
            HarvestError::Worker(format!("shard {} closed: {}", shard, e))
        })
    }

    /// Records submitted but not yet applied
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }

    /// Closes the shards, waits for queued records to drain, then flushes
    /// the pending buffer
    pub async fn shutdown(self) -> Result<Arc<Reconciler<S>>, HarvestError> {
        drop(self.senders);

        let mut failure = None;
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Persistence shard failed: {}", e);
                failure = Some(HarvestError::Worker(e.to_string()));
            }
        }

        let report = self.reconciler.flush();
        if report.dropped > 0 {
            tracing::warn!(
                "{} detail record(s) never matched an item and were dropped",
                report.dropped
            );
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(self.reconciler),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Diagnostics, DropReason};
    use crate::storage::{CollectionRecord, ItemDetailRecord, ItemRecord, SqliteStorage};

    fn writer(workers: usize) -> PersistenceWriter<SqliteStorage> {
        let reconciler = Reconciler::new(
            SqliteStorage::new_in_memory().unwrap(),
            Arc::new(Diagnostics::new()),
            3,
        );
        PersistenceWriter::spawn(Arc::new(reconciler), workers, 2)
    }

    fn collection(key: &str) -> Record {
        Record::Collection(CollectionRecord {
            key: key.to_string(),
            title: key.to_uppercase(),
            source_url: format!("https://example.com/novel/{}.html", key),
            item_count_hint: None,
            status: String::new(),
        })
    }

    fn item(key: &str, sequence: i64) -> Record {
        Record::Item(ItemRecord {
            collection_key: key.to_string(),
            sequence,
            title: format!("Chapter {}", sequence),
            source_url: format!("https://example.com/{}/{}", key, sequence),
            published: String::new(),
        })
    }

    #[tokio::test]
    async fn test_records_of_one_collection_apply_in_order() {
        let writer = writer(4);
        for key in ["a", "b", "c", "d", "e"] {
            writer.submit(collection(key)).unwrap();
            for sequence in 1..=5 {
                writer.submit(item(key, sequence)).unwrap();
            }
        }

        let reconciler = writer.shutdown().await.unwrap();
        reconciler.with_store(|s| {
            assert_eq!(s.count_collections().unwrap(), 5);
            assert_eq!(s.count_items().unwrap(), 25);
        });
        assert_eq!(reconciler.diagnostics().dropped(DropReason::OrphanItem), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_unresolved_details() {
        let writer = writer(2);
        writer.submit(collection("a")).unwrap();
        writer
            .submit(Record::ItemDetail(ItemDetailRecord {
                collection_key: "a".to_string(),
                sequence: 7,
                body: "orphaned body".to_string(),
            }))
            .unwrap();

        let reconciler = writer.shutdown().await.unwrap();
        assert_eq!(reconciler.pending_len(), 0);
        assert_eq!(
            reconciler.diagnostics().dropped(DropReason::UnresolvedDetail),
            1
        );
    }

    #[tokio::test]
    async fn test_submit_never_waits_on_a_busy_store() {
        let writer = writer(1);
        writer.submit(collection("a")).unwrap();

        // Hold the store so nothing can be applied while records pile up
        let reconciler = Arc::clone(&writer.reconciler);
        let queued = reconciler.with_store(|_| {
            for sequence in 1..=3000 {
                writer.submit(item("a", sequence)).unwrap();
            }
            writer.backlog()
        });
        assert!(queued > BACKLOG_WARN);

        let reconciler = writer.shutdown().await.unwrap();
        reconciler.with_store(|s| assert_eq!(s.count_items().unwrap(), 3000));
        assert_eq!(reconciler.diagnostics().dropped(DropReason::OrphanItem), 0);
    }
}
