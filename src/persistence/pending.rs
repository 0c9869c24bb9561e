//! Holding area for item details that arrived before their item row

use crate::storage::ItemDetailRecord;
use std::collections::HashMap;

/// Composite business key of an item
pub type ItemKey = (String, i64);

/// A detail waiting for its item, with the number of failed resolutions so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDetail {
    pub record: ItemDetailRecord,
    pub attempts: u32,
}

/// Details keyed by the business key of the item they belong to
#[derive(Debug, Default)]
pub struct PendingBuffer {
    entries: HashMap<ItemKey, PendingDetail>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a detail after a failed resolution and returns its attempt count
    ///
    /// A newer delivery for the same key replaces the parked body but keeps
    /// the attempt count, so redelivery cannot extend the wait.
    pub fn defer(&mut self, record: ItemDetailRecord) -> u32 {
        let key = (record.collection_key.clone(), record.sequence);
        let entry = self.entries.entry(key).or_insert(PendingDetail {
            record: record.clone(),
            attempts: 0,
        });
        entry.record = record;
        entry.attempts += 1;
        entry.attempts
    }

    /// Puts back an entry taken out by `drain`
    pub fn restore(&mut self, entry: PendingDetail) {
        let key = (entry.record.collection_key.clone(), entry.record.sequence);
        self.entries.insert(key, entry);
    }

    /// Removes the detail parked under `key`, if any
    pub fn take(&mut self, collection_key: &str, sequence: i64) -> Option<PendingDetail> {
        self.entries.remove(&(collection_key.to_string(), sequence))
    }

    /// Removes and returns every parked detail
    pub fn drain(&mut self) -> Vec<PendingDetail> {
        let mut drained: Vec<PendingDetail> = self.entries.drain().map(|(_, v)| v).collect();
        drained.sort_by(|a, b| {
            (&a.record.collection_key, a.record.sequence)
                .cmp(&(&b.record.collection_key, b.record.sequence))
        });
        drained
    }

    pub fn contains(&self, collection_key: &str, sequence: i64) -> bool {
        self.entries
            .contains_key(&(collection_key.to_string(), sequence))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
