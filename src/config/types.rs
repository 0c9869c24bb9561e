use serde::Deserialize;

/// Main configuration structure for Catalog-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    pub site: SiteConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Crawl traversal and concurrency configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of fetches in flight at once
    pub concurrency: u32,

    /// Minimum time between two fetch starts against the source (milliseconds)
    #[serde(rename = "request-delay-ms", default)]
    pub request_delay_ms: u64,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Number of items the source lists per detail-list page
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    /// Highest collection-list page that will be requested
    #[serde(rename = "page-cap", default)]
    pub page_cap: Option<u32>,

    /// Stop discovering collections after this many
    #[serde(rename = "max-collections", default)]
    pub max_collections: Option<u32>,

    /// Stop discovering items of a collection after this many
    #[serde(rename = "max-items-per-collection", default)]
    pub max_items_per_collection: Option<u32>,
}

/// Retry bounds and backoff timing
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(rename = "max-transient", default = "default_max_transient")]
    pub max_transient: u32,

    #[serde(rename = "max-blocked", default = "default_max_blocked")]
    pub max_blocked: u32,

    /// Fixed part of the Transient backoff (milliseconds)
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Lower bound of the uniform jitter added to the backoff (milliseconds)
    #[serde(rename = "jitter-min-ms", default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,

    /// Upper bound of the uniform jitter added to the backoff (milliseconds)
    #[serde(rename = "jitter-max-ms", default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,

    /// Pause before a Blocked retry with a fresh identity (milliseconds)
    #[serde(rename = "blocked-delay-ms", default)]
    pub blocked_delay_ms: u64,

    /// Whether a Transient retry may keep the identity it failed with
    #[serde(rename = "reuse-identity-on-transient", default = "default_true")]
    pub reuse_identity_on_transient: bool,
}

/// Proxy pool and client signature configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Newline-delimited `host:port` proxy list
    #[serde(rename = "proxy-file", default)]
    pub proxy_file: Option<String>,

    /// How long a failed proxy is excluded from selection (seconds)
    #[serde(rename = "cooldown-secs", default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Fall back to a direct connection when no proxy is eligible
    #[serde(rename = "allow-direct", default)]
    pub allow_direct: bool,

    /// Client signatures sent as the User-Agent header
    #[serde(rename = "user-agents", default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Body fragments (case-insensitive) that identify a bot challenge
    #[serde(rename = "challenge-markers", default = "default_challenge_markers")]
    pub challenge_markers: Vec<String>,

    /// Endpoint used by `--check-proxies`
    #[serde(rename = "probe-url", default = "default_probe_url")]
    pub probe_url: String,

    /// Where to save the best-performing proxies at the end of a run
    #[serde(rename = "best-proxies-file", default)]
    pub best_proxies_file: Option<String>,
}

/// Source site layout: URL templates and CSS selectors
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Collection-list page URL, `{page}` is replaced by the 1-based page number
    #[serde(rename = "list-url")]
    pub list_url: String,

    /// Detail-list page URL, with `{key}` and `{page}` placeholders
    #[serde(rename = "detail-list-url")]
    pub detail_list_url: String,

    #[serde(default)]
    pub selectors: SelectorConfig,
}

/// CSS selectors used by the reference extractor
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorConfig {
    #[serde(rename = "collection-item", default = "default_collection_item")]
    pub collection_item: String,

    #[serde(rename = "collection-title", default = "default_collection_title")]
    pub collection_title: String,

    #[serde(rename = "collection-count", default = "default_collection_count")]
    pub collection_count: String,

    #[serde(rename = "collection-status", default = "default_collection_status")]
    pub collection_status: String,

    #[serde(rename = "item-row", default = "default_item_row")]
    pub item_row: String,

    #[serde(rename = "item-date", default = "default_item_date")]
    pub item_date: String,

    #[serde(rename = "detail-body", default = "default_detail_body")]
    pub detail_body: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Persistence reconciler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Number of writer shards; records of one collection always share a shard
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Resolution attempts for a detail whose item row is still missing
    #[serde(rename = "detail-max-attempts", default = "default_detail_max_attempts")]
    pub detail_max_attempts: u32,

    /// Records processed by a shard between sweeps of the pending buffer
    #[serde(rename = "sweep-every", default = "default_sweep_every")]
    pub sweep_every: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_transient: default_max_transient(),
            max_blocked: default_max_blocked(),
            base_delay_ms: default_base_delay_ms(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
            blocked_delay_ms: 0,
            reuse_identity_on_transient: true,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            proxy_file: None,
            cooldown_secs: default_cooldown_secs(),
            allow_direct: false,
            user_agents: default_user_agents(),
            challenge_markers: default_challenge_markers(),
            probe_url: default_probe_url(),
            best_proxies_file: None,
        }
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            collection_item: default_collection_item(),
            collection_title: default_collection_title(),
            collection_count: default_collection_count(),
            collection_status: default_collection_status(),
            item_row: default_item_row(),
            item_date: default_item_date(),
            detail_body: default_detail_body(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            detail_max_attempts: default_detail_max_attempts(),
            sweep_every: default_sweep_every(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

fn default_max_transient() -> u32 {
    5
}

fn default_max_blocked() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_jitter_min_ms() -> u64 {
    1000
}

fn default_jitter_max_ms() -> u64 {
    3000
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_probe_url() -> String {
    "https://httpbin.org/ip".to_string()
}

fn default_challenge_markers() -> Vec<String> {
    ["cloudflare", "captcha", "cf-chl", "attention required"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_user_agents() -> Vec<String> {
    [
        // Chrome
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.107 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.114 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.159 Safari/537.36",
        // Firefox
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:90.0) Gecko/20100101 Firefox/90.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:90.0) Gecko/20100101 Firefox/90.0",
        "Mozilla/5.0 (X11; Linux i686; rv:89.0) Gecko/20100101 Firefox/89.0",
        "Mozilla/5.0 (Windows NT 6.1; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
        // Safari
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0.3 Safari/605.1.15",
        // Edge
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36 Edg/91.0.864.59",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.107 Safari/537.36 Edg/92.0.902.55",
        // Mobile
        "Mozilla/5.0 (iPhone; CPU iPhone OS 14_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Mobile/15E148 Safari/604.1",
        "Mozilla/5.0 (iPad; CPU OS 14_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Mobile/15E148 Safari/604.1",
        "Mozilla/5.0 (Linux; Android 11; SM-G991B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.120 Mobile Safari/537.36",
        "Mozilla/5.0 (Linux; Android 10; SM-G981B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.162 Mobile Safari/537.36",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_collection_item() -> String {
    "li.novel-item".to_string()
}

fn default_collection_title() -> String {
    "h4.novel-title".to_string()
}

fn default_collection_count() -> String {
    "span.chapter".to_string()
}

fn default_collection_status() -> String {
    "span.status".to_string()
}

fn default_item_row() -> String {
    "ul.chapter-list li".to_string()
}

fn default_item_date() -> String {
    "span.time".to_string()
}

fn default_detail_body() -> String {
    "div.chapter-content".to_string()
}

fn default_workers() -> u32 {
    4
}

fn default_detail_max_attempts() -> u32 {
    3
}

fn default_sweep_every() -> u32 {
    50
}
