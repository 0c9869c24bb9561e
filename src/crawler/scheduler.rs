//! Scheduler for the catalog traversal
//!
//! This module handles:
//! - The pending-task queue, which grows as pages are extracted
//! - Collection-list pagination in strictly increasing page order
//! - Per-collection item-list pagination bounded by the declared item count
//! - The `max-collections` and `max-items-per-collection` caps
//! - URL de-duplication, so no page is ever enqueued twice
//!
//! The scheduler is synchronous and does no I/O. The coordinator pulls
//! tasks from it and reports each successful extraction back.

use crate::config::CrawlerConfig;
use crate::crawler::extractor::Extraction;
use crate::crawler::task::{FetchTask, FollowUp, PageTemplates, TaskKind, TaskParent};
use crate::output::Diagnostics;
use crate::storage::Record;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Traversal progress of one collection's item listing
#[derive(Debug, Default, Clone)]
struct ListingProgress {
    /// Items listed so far, before caps
    listed: u32,
    /// Items admitted under `max-items-per-collection`
    admitted: u32,
}

/// Scheduler manages the pending-task queue and the traversal policy
pub struct Scheduler {
    templates: PageTemplates,
    page_size: u32,
    page_cap: Option<u32>,
    max_collections: Option<u32>,
    max_items: Option<u32>,

    queue: VecDeque<FetchTask>,
    seen: HashSet<String>,
    next_id: u64,

    collections_admitted: u32,
    admitted_keys: HashSet<String>,
    listings: HashMap<String, ListingProgress>,

    diagnostics: Arc<Diagnostics>,
}

impl Scheduler {
    /// Creates a new scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Traversal bounds and caps
    /// * `templates` - Builders for list and item-list page URLs
    /// * `diagnostics` - Receives the count of capped records
    pub fn new(config: &CrawlerConfig, templates: PageTemplates, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            templates,
            page_size: config.page_size.max(1),
            page_cap: config.page_cap,
            max_collections: config.max_collections,
            max_items: config.max_items_per_collection,
            queue: VecDeque::new(),
            seen: HashSet::new(),
            next_id: 1,
            collections_admitted: 0,
            admitted_keys: HashSet::new(),
            listings: HashMap::new(),
            diagnostics,
        }
    }

    /// Enqueues the first collection-list page
    pub fn seed(&mut self) -> Result<(), url::ParseError> {
        let url = self.templates.collection_page(1)?;
        self.enqueue(FollowUp {
            url,
            kind: TaskKind::CollectionPage,
            parent: TaskParent::None,
            page: 1,
        });
        Ok(())
    }

    /// Adds a task unless its URL was already scheduled; returns whether it was added
    pub fn enqueue(&mut self, follow_up: FollowUp) -> bool {
        if !self.seen.insert(follow_up.url.as_str().to_string()) {
            tracing::trace!("Skipping already scheduled {}", follow_up.url);
            return false;
        }
        let task = FetchTask::from_follow_up(self.next_id, follow_up);
        self.next_id += 1;
        tracing::trace!("Queued {} {} (task {})", task.kind, task.url, task.id);
        self.queue.push_back(task);
        true
    }

    /// Pops the next pending task; it enters flight once it holds a fetch slot
    pub fn next_task(&mut self) -> Option<FetchTask> {
        self.queue.pop_front()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drains tasks that will never run, used when the run is stopped
    pub fn drain_pending(&mut self) -> Vec<FetchTask> {
        self.queue.drain(..).collect()
    }

    /// Applies the traversal policy to a successful extraction
    ///
    /// Enqueues follow-ups and pagination continuations, applies the caps,
    /// and returns the records to hand to persistence, in extraction order.
    pub fn complete(&mut self, task: &FetchTask, extraction: Extraction) -> Vec<Record> {
        match task.kind {
            TaskKind::CollectionPage => self.complete_collection_page(task, extraction),
            TaskKind::DetailListPage => self.complete_item_list_page(task, extraction),
            TaskKind::DetailContentPage => {
                for follow_up in extraction.follow_ups {
                    self.enqueue(follow_up);
                }
                extraction.records
            }
        }
    }

    fn collection_cap_reached(&self) -> bool {
        self.max_collections
            .map_or(false, |max| self.collections_admitted >= max)
    }

    fn complete_collection_page(&mut self, task: &FetchTask, extraction: Extraction) -> Vec<Record> {
        let found = extraction
            .records
            .iter()
            .filter(|r| matches!(r, Record::Collection(_)))
            .count();

        let mut records = Vec::with_capacity(extraction.records.len());
        for record in extraction.records {
            if let Record::Collection(collection) = &record {
                if self.admitted_keys.contains(&collection.key) {
                    // Listed again on a later page; refresh the row only
                    records.push(record);
                    continue;
                }
                if self.collection_cap_reached() {
                    self.diagnostics.capped.inc();
                    continue;
                }
                self.collections_admitted += 1;
                self.admitted_keys.insert(collection.key.clone());
            }
            records.push(record);
        }

        for follow_up in extraction.follow_ups {
            let admitted = follow_up
                .parent
                .collection_key()
                .map_or(true, |key| self.admitted_keys.contains(key));
            if admitted {
                self.enqueue(follow_up);
            }
        }

        if found == 0 {
            tracing::info!("Collection list ended at page {} (no entries)", task.page);
        } else if self.page_cap.map_or(false, |cap| task.page >= cap) {
            tracing::info!("Collection list page cap {} reached", task.page);
        } else if self.collection_cap_reached() {
            tracing::info!("Reached maximum number of collections: {}", self.collections_admitted);
        } else {
            match self.templates.collection_page(task.page + 1) {
                Ok(url) => {
                    self.enqueue(FollowUp {
                        url,
                        kind: TaskKind::CollectionPage,
                        parent: TaskParent::None,
                        page: task.page + 1,
                    });
                }
                Err(e) => tracing::error!("Cannot build collection page {}: {}", task.page + 1, e),
            }
        }

        records
    }

    fn complete_item_list_page(&mut self, task: &FetchTask, extraction: Extraction) -> Vec<Record> {
        let (key, hint) = match &task.parent {
            TaskParent::Collection { key, item_count } => (key.clone(), *item_count),
            _ => {
                tracing::error!("Item list task {} has no owning collection", task.url);
                return extraction.records;
            }
        };
        let declared = extraction.declared_total.or(hint);

        let mut progress = self.listings.remove(&key).unwrap_or_default();
        let mut admitted_items = HashSet::new();
        let mut records = Vec::with_capacity(extraction.records.len());
        let mut found = 0u32;

        for record in extraction.records {
            if let Record::Item(item) = &record {
                found += 1;
                progress.listed += 1;
                if self.max_items.map_or(false, |max| progress.admitted >= max) {
                    self.diagnostics.capped.inc();
                    continue;
                }
                progress.admitted += 1;
                admitted_items.insert(item.sequence);
            }
            records.push(record);
        }

        for follow_up in extraction.follow_ups {
            let admitted = match &follow_up.parent {
                TaskParent::Item { sequence, .. } => admitted_items.contains(sequence),
                _ => true,
            };
            if admitted {
                self.enqueue(follow_up);
            }
        }

        let capped = self.max_items.map_or(false, |max| progress.admitted >= max);
        let covered = declared.map_or(false, |total| progress.listed >= total);
        let last_page = declared.map_or(false, |total| task.page >= (total + self.page_size - 1) / self.page_size);

        if found == 0 {
            tracing::debug!("Item list of {} ended at page {} (no entries)", key, task.page);
        } else if covered || last_page {
            tracing::debug!(
                "Item list of {} complete: {} listed over {} page(s)",
                key,
                progress.listed,
                task.page
            );
        } else if capped {
            tracing::info!("Reached maximum items for collection {}", key);
        } else {
            match self.templates.detail_list_page(&key, task.page + 1) {
                Ok(url) => {
                    self.enqueue(FollowUp {
                        url,
                        kind: TaskKind::DetailListPage,
                        parent: TaskParent::Collection {
                            key: key.clone(),
                            item_count: declared,
                        },
                        page: task.page + 1,
                    });
                }
                Err(e) => tracing::error!("Cannot build item list page for {}: {}", key, e),
            }
        }

        self.listings.insert(key, progress);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskState;
    use crate::storage::{CollectionRecord, ItemRecord};
    use url::Url;

    fn config() -> CrawlerConfig {
        CrawlerConfig {
            concurrency: 4,
            request_delay_ms: 0,
            request_timeout_secs: 30,
            page_size: 2,
            page_cap: None,
            max_collections: None,
            max_items_per_collection: None,
        }
    }

    fn scheduler(config: CrawlerConfig) -> Scheduler {
        Scheduler::new(
            &config,
            PageTemplates::new(
                "https://example.com/list-{page}.html",
                "https://example.com/fy.php?page={page}&wjm={key}",
            ),
            Arc::new(Diagnostics::new()),
        )
    }

    fn collection_page(keys: &[&str]) -> Extraction {
        let mut extraction = Extraction::default();
        for key in keys {
            extraction.records.push(Record::Collection(CollectionRecord {
                key: key.to_string(),
                title: key.to_string(),
                source_url: format!("https://example.com/novel/{}.html", key),
                item_count_hint: Some(3),
                status: String::new(),
            }));
            extraction.follow_ups.push(FollowUp {
                url: Url::parse(&format!("https://example.com/fy.php?page=1&wjm={}", key)).unwrap(),
                kind: TaskKind::DetailListPage,
                parent: TaskParent::Collection {
                    key: key.to_string(),
                    item_count: Some(3),
                },
                page: 1,
            });
        }
        extraction
    }

    fn item_page(key: &str, sequences: &[i64]) -> Extraction {
        let mut extraction = Extraction::default();
        for &sequence in sequences {
            let url = format!("https://example.com/novel/{}_{}.html", key, sequence);
            extraction.records.push(Record::Item(ItemRecord {
                collection_key: key.to_string(),
                sequence,
                title: String::new(),
                source_url: url.clone(),
                published: String::new(),
            }));
            extraction.follow_ups.push(FollowUp {
                url: Url::parse(&url).unwrap(),
                kind: TaskKind::DetailContentPage,
                parent: TaskParent::Item {
                    collection_key: key.to_string(),
                    sequence,
                },
                page: 0,
            });
        }
        extraction
    }

    fn drain_kinds(s: &mut Scheduler) -> Vec<(TaskKind, String)> {
        let mut out = Vec::new();
        while let Some(task) = s.next_task() {
            out.push((task.kind, task.url.to_string()));
        }
        out
    }

    #[test]
    fn test_collection_pagination_stops_at_first_empty_page() {
        let mut s = scheduler(config());
        s.seed().unwrap();

        let page1 = s.next_task().unwrap();
        assert_eq!(page1.state, TaskState::Pending);
        s.complete(&page1, collection_page(&["a"]));

        let tasks = drain_kinds(&mut s);
        assert!(tasks.contains(&(
            TaskKind::CollectionPage,
            "https://example.com/list-2.html".to_string()
        )));

        let page2 = FetchTask::new(
            99,
            Url::parse("https://example.com/list-2.html").unwrap(),
            TaskKind::CollectionPage,
            TaskParent::None,
            2,
        );
        s.complete(&page2, Extraction::default());
        assert!(s.is_empty());
    }

    #[test]
    fn test_pages_are_never_enqueued_twice() {
        let mut s = scheduler(config());
        s.seed().unwrap();
        s.seed().unwrap();
        assert_eq!(s.pending_count(), 1);
    }

    #[test]
    fn test_page_cap() {
        let mut cfg = config();
        cfg.page_cap = Some(1);
        let mut s = scheduler(cfg);
        s.seed().unwrap();
        let page1 = s.next_task().unwrap();
        s.complete(&page1, collection_page(&["a", "b"]));

        let tasks = drain_kinds(&mut s);
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|(kind, _)| *kind == TaskKind::DetailListPage));
    }

    #[test]
    fn test_max_collections_cap() {
        let mut cfg = config();
        cfg.max_collections = Some(1);
        let mut s = scheduler(cfg);
        s.seed().unwrap();
        let page1 = s.next_task().unwrap();
        let records = s.complete(&page1, collection_page(&["a", "b"]));

        assert_eq!(records.len(), 1);
        let tasks = drain_kinds(&mut s);
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].1.ends_with("wjm=a"));
    }

    #[test]
    fn test_item_pagination_follows_declared_count() {
        let mut s = scheduler(config());
        let parent = TaskParent::Collection {
            key: "a".to_string(),
            item_count: Some(3),
        };
        let page1 = FetchTask::new(
            1,
            Url::parse("https://example.com/fy.php?page=1&wjm=a").unwrap(),
            TaskKind::DetailListPage,
            parent.clone(),
            1,
        );
        let records = s.complete(&page1, item_page("a", &[1, 2]));
        assert_eq!(records.len(), 2);

        let tasks = drain_kinds(&mut s);
        assert_eq!(tasks.len(), 3);
        assert!(tasks.contains(&(
            TaskKind::DetailListPage,
            "https://example.com/fy.php?page=2&wjm=a".to_string()
        )));

        // page 2 covers the declared three items
        let page2 = FetchTask::new(
            2,
            Url::parse("https://example.com/fy.php?page=2&wjm=a").unwrap(),
            TaskKind::DetailListPage,
            parent,
            2,
        );
        s.complete(&page2, item_page("a", &[3]));
        let tasks = drain_kinds(&mut s);
        assert_eq!(tasks, vec![(
            TaskKind::DetailContentPage,
            "https://example.com/novel/a_3.html".to_string()
        )]);
    }

    #[test]
    fn test_item_pagination_without_count_runs_until_empty() {
        let mut s = scheduler(config());
        let parent = TaskParent::Collection {
            key: "a".to_string(),
            item_count: None,
        };
        let page1 = FetchTask::new(
            1,
            Url::parse("https://example.com/fy.php?page=1&wjm=a").unwrap(),
            TaskKind::DetailListPage,
            parent.clone(),
            1,
        );
        s.complete(&page1, item_page("a", &[1, 2]));
        assert!(drain_kinds(&mut s)
            .iter()
            .any(|(kind, _)| *kind == TaskKind::DetailListPage));

        let page2 = FetchTask::new(
            2,
            Url::parse("https://example.com/fy.php?page=2&wjm=a").unwrap(),
            TaskKind::DetailListPage,
            parent,
            2,
        );
        s.complete(&page2, Extraction::default());
        assert!(s.is_empty());
    }

    #[test]
    fn test_max_items_cap_drops_items_and_their_content_tasks() {
        let mut cfg = config();
        cfg.max_items_per_collection = Some(1);
        let mut s = scheduler(cfg);
        let page1 = FetchTask::new(
            1,
            Url::parse("https://example.com/fy.php?page=1&wjm=a").unwrap(),
            TaskKind::DetailListPage,
            TaskParent::Collection {
                key: "a".to_string(),
                item_count: Some(10),
            },
            1,
        );
        let records = s.complete(&page1, item_page("a", &[1, 2]));
        assert_eq!(records.len(), 1);

        let tasks = drain_kinds(&mut s);
        assert_eq!(tasks, vec![(
            TaskKind::DetailContentPage,
            "https://example.com/novel/a_1.html".to_string()
        )]);
        assert_eq!(s.diagnostics.capped.get(), 1);
    }
}
