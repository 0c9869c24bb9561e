//! Fetch tasks and the page URLs they are built from

use crate::config::SiteConfig;
use crate::identity::Identity;
use crate::state::TaskState;
use std::fmt;
use url::Url;

/// What a fetched page is expected to contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// One page of the collection listing
    CollectionPage,
    /// One page of a collection's item listing
    DetailListPage,
    /// The body of a single item
    DetailContentPage,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectionPage => "collection-page",
            Self::DetailListPage => "detail-list-page",
            Self::DetailContentPage => "detail-content-page",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business-key linkage from a task to the record that spawned it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskParent {
    None,
    Collection {
        key: String,
        /// Declared number of items, when the source states one
        item_count: Option<u32>,
    },
    Item {
        collection_key: String,
        sequence: i64,
    },
}

impl TaskParent {
    pub fn collection_key(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Collection { key, .. } => Some(key),
            Self::Item { collection_key, .. } => Some(collection_key),
        }
    }
}

/// A page the extractor wants fetched next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUp {
    pub url: Url,
    pub kind: TaskKind,
    pub parent: TaskParent,
    /// 1-based page number for paginated kinds, 0 otherwise
    pub page: u32,
}

/// One unit of crawl work, alive until it reaches Success or Fatal
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub id: u64,
    pub url: Url,
    pub kind: TaskKind,
    pub parent: TaskParent,
    pub page: u32,
    pub state: TaskState,

    /// Fetch attempts started, all classifications
    pub attempts: u32,
    pub transient_attempts: u32,
    pub block_attempts: u32,

    /// Identity used by the most recent attempt
    pub last_identity: Option<Identity>,
    /// Proxy of the most recent attempt, if that attempt was Blocked
    pub last_blocked_proxy: Option<String>,
}

impl FetchTask {
    pub fn new(id: u64, url: Url, kind: TaskKind, parent: TaskParent, page: u32) -> Self {
        Self {
            id,
            url,
            kind,
            parent,
            page,
            state: TaskState::Pending,
            attempts: 0,
            transient_attempts: 0,
            block_attempts: 0,
            last_identity: None,
            last_blocked_proxy: None,
        }
    }

    pub fn from_follow_up(id: u64, follow_up: FollowUp) -> Self {
        Self::new(
            id,
            follow_up.url,
            follow_up.kind,
            follow_up.parent,
            follow_up.page,
        )
    }

    /// Moves the task to `next`, returning false (and leaving it unchanged)
    /// for a transition the task lifecycle does not allow
    pub fn transition(&mut self, next: TaskState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::error!(
                "Task {} ({}): illegal transition {} -> {}",
                self.id,
                self.url,
                self.state,
                next
            );
            return false;
        }
        self.state = next;
        true
    }
}

/// URL builders for the paginated listings
#[derive(Debug, Clone)]
pub struct PageTemplates {
    list_url: String,
    detail_list_url: String,
}

impl PageTemplates {
    pub fn new(list_url: impl Into<String>, detail_list_url: impl Into<String>) -> Self {
        Self {
            list_url: list_url.into(),
            detail_list_url: detail_list_url.into(),
        }
    }

    pub fn from_site(site: &SiteConfig) -> Self {
        Self::new(site.list_url.clone(), site.detail_list_url.clone())
    }

    /// URL of collection-list page `page`
    pub fn collection_page(&self, page: u32) -> Result<Url, url::ParseError> {
        Url::parse(&self.list_url.replace("{page}", &page.to_string()))
    }

    /// URL of page `page` of the item listing of collection `key`
    pub fn detail_list_page(&self, key: &str, page: u32) -> Result<Url, url::ParseError> {
        Url::parse(
            &self
                .detail_list_url
                .replace("{key}", key)
                .replace("{page}", &page.to_string()),
        )
    }
}
