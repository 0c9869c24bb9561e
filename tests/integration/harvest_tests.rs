//! Integration tests for the harvester
//!
//! The scripted fetcher drives whole runs through the retry state machine
//! without a network; the wiremock test exercises the reqwest fetcher
//! end-to-end through extraction and SQLite persistence.

use async_trait::async_trait;
use catalog_harvest::config::{
    Config, CrawlerConfig, IdentityConfig, OutputConfig, PersistenceConfig, RetryConfig,
    SelectorConfig, SiteConfig,
};
use catalog_harvest::crawler::{
    harvest, harvest_with, FetchOutcome, FetchResponse, Fetcher, SiteExtractor,
};
use catalog_harvest::identity::Identity;
use catalog_harvest::storage::{RunStatus, SqliteStorage, Store};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio::sync::watch;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE: &str = "https://catalog.test";

/// Serves canned responses per URL; the last response of a script repeats
#[derive(Default)]
struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<(u16, String)>>>,
    latency: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    fn script(self, url: &str, responses: &[(u16, &str)]) -> Self {
        self.scripts.lock().unwrap().insert(
            url.to_string(),
            responses.iter().map(|(s, b)| (*s, b.to_string())).collect(),
        );
        self
    }

    /// Holds every response for `url` back by `delay`
    fn slow(mut self, url: &str, delay: Duration) -> Self {
        self.latency.insert(url.to_string(), delay);
        self
    }

    fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url, _identity: &Identity) -> FetchResponse {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.latency.get(url.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        let mut scripts = self.scripts.lock().unwrap();
        let (status, body) = match scripts.get_mut(url.as_str()) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script.front().cloned().unwrap(),
            None => (404, "not found".to_string()),
        };
        Ok(FetchOutcome { status, body })
    }
}

/// Creates a test configuration against `base` with a zero-delay retry policy
fn create_test_config(base: &str, db_path: &str, proxy_file: Option<String>) -> Config {
    Config {
        crawler: CrawlerConfig {
            concurrency: 4,
            request_delay_ms: 0,
            request_timeout_secs: 5,
            page_size: 100,
            page_cap: None,
            max_collections: None,
            max_items_per_collection: None,
        },
        retry: RetryConfig {
            max_transient: 3,
            max_blocked: 3,
            base_delay_ms: 0,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            blocked_delay_ms: 0,
            reuse_identity_on_transient: true,
        },
        identity: IdentityConfig {
            proxy_file: proxy_file.clone(),
            allow_direct: proxy_file.is_none(),
            ..IdentityConfig::default()
        },
        site: SiteConfig {
            base_url: base.to_string(),
            list_url: format!("{}/list-{{page}}.html", base),
            detail_list_url: format!("{}/api/{{key}}/chapters?page={{page}}", base),
            selectors: SelectorConfig::default(),
        },
        output: OutputConfig {
            database_path: db_path.to_string(),
        },
        persistence: PersistenceConfig {
            workers: 2,
            detail_max_attempts: 3,
            sweep_every: 10,
        },
    }
}

fn proxy_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# test proxies\n10.0.0.1:8080\n10.0.0.2:8080\n10.0.0.3:8080").unwrap();
    file
}

fn single_proxy_file(address: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", address).unwrap();
    file
}

fn collection_list(entries: &[(&str, &str, u32)]) -> String {
    let items: String = entries
        .iter()
        .map(|(key, title, count)| {
            format!(
                r#"<li class="novel-item">
                    <h4 class="novel-title"><a href="/novel/{}.html">{}</a></h4>
                    <span class="chapter">{} Chapters</span>
                    <span class="status">Ongoing</span>
                </li>"#,
                key, title, count
            )
        })
        .collect();
    format!("<html><body><ul class=\"novel-list\">{}</ul></body></html>", items)
}

fn item_list(key: &str, count: u32) -> String {
    let data: Vec<String> = (1..=count)
        .map(|n| {
            format!(
                r#"{{"id": {n}, "title": "Chapter {n}", "url": "/novel/{key}/{n}.html", "date": "2024-01-0{n}"}}"#,
                n = n,
                key = key
            )
        })
        .collect();
    format!(r#"{{"total": {}, "data": [{}]}}"#, count, data.join(","))
}

fn content(text: &str) -> String {
    format!(
        "<html><body><div class=\"chapter-content\"><p>{}</p></div></body></html>",
        text
    )
}

const EMPTY_LIST: &str = "<html><body><ul class=\"novel-list\"></ul></body></html>";
const CHALLENGE: &str = "<html><title>Attention Required! | Cloudflare</title></html>";

fn url(path: &str) -> String {
    format!("{}{}", BASE, path)
}

#[tokio::test]
async fn test_full_harvest_with_retries_and_fatal_task() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let proxies = proxy_file();
    let config = create_test_config(
        BASE,
        db_path.to_str().unwrap(),
        Some(proxies.path().to_str().unwrap().to_string()),
    );

    let alpha_list = item_list("alpha", 2);
    let beta_list = item_list("beta", 1);
    let alpha_one = content("Alpha one");
    let alpha_two = content("Alpha two");
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .script(
                &url("/list-1.html"),
                &[(200, collection_list(&[("alpha", "Alpha", 2), ("beta", "Beta", 1)]).as_str())],
            )
            .script(&url("/list-2.html"), &[(200, EMPTY_LIST)])
            .script(&url("/api/alpha/chapters?page=1"), &[(200, alpha_list.as_str())])
            .script(&url("/api/beta/chapters?page=1"), &[(200, beta_list.as_str())])
            // blocked once, then served
            .script(&url("/novel/alpha/1.html"), &[(503, CHALLENGE), (200, alpha_one.as_str())])
            // two transient failures, then served
            .script(
                &url("/novel/alpha/2.html"),
                &[(502, "bad gateway"), (500, "oops"), (200, alpha_two.as_str())],
            )
            .script(&url("/novel/beta/1.html"), &[(404, "gone")]),
    );

    let extractor = SiteExtractor::new(&config.site).unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let report = harvest_with(config, "hash", fetcher.clone(), extractor, stop_rx)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.summary.fatal, 1);
    assert!(!report.summary.stopped);
    assert_eq!(report.diagnostics.attempts_blocked, 1);
    assert_eq!(report.diagnostics.attempts_transient, 2);
    assert_eq!(report.diagnostics.dropped_fatal_task, 1);

    // The collection listing stops at the first empty page
    assert_eq!(fetcher.calls_to(&url("/list-2.html")), 1);
    assert_eq!(fetcher.calls_to(&url("/list-3.html")), 0);
    // Listings covered by their declared total are not paged further
    assert_eq!(fetcher.calls_to(&url("/api/alpha/chapters?page=2")), 0);
    assert_eq!(fetcher.calls_to(&url("/novel/alpha/1.html")), 2);
    assert_eq!(fetcher.calls_to(&url("/novel/alpha/2.html")), 3);
    assert_eq!(fetcher.calls_to(&url("/novel/beta/1.html")), 1);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_collections().unwrap(), 2);
    assert_eq!(storage.count_items().unwrap(), 3);

    let alpha = storage.get_collection("alpha").unwrap().unwrap();
    assert_eq!(alpha.title, "Alpha");
    assert_eq!(alpha.item_count_hint, Some(2));
    assert_eq!(
        storage.get_item_detail("alpha", 1).unwrap().unwrap().body,
        "Alpha one"
    );
    assert_eq!(
        storage.get_item_detail("alpha", 2).unwrap().unwrap().body,
        "Alpha two"
    );
    assert!(storage.get_item("beta", 1).unwrap().is_some());
    assert!(storage.get_item_detail("beta", 1).unwrap().is_none());

    let failures = storage.count_failures_by_reason().unwrap();
    assert_eq!(failures.get("fatal_task"), Some(&1));

    let run = storage.get_run(report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "hash");
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn test_transient_retries_are_bounded() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let proxies = proxy_file();
    let mut config = create_test_config(
        BASE,
        db_path.to_str().unwrap(),
        Some(proxies.path().to_str().unwrap().to_string()),
    );
    config.retry.max_transient = 2;

    let fetcher = Arc::new(
        ScriptedFetcher::default().script(&url("/list-1.html"), &[(504, "gateway timeout")]),
    );

    let extractor = SiteExtractor::new(&config.site).unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let report = harvest_with(config, "hash", fetcher.clone(), extractor, stop_rx)
        .await
        .unwrap();

    // initial attempt plus max-transient retries
    assert_eq!(fetcher.calls_to(&url("/list-1.html")), 3);
    assert_eq!(report.summary.fatal, 1);
    assert_eq!(report.summary.succeeded, 0);
    assert_eq!(report.diagnostics.retries_scheduled, 2);
    assert_eq!(report.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_challenge_on_every_identity_is_bounded() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let proxies = proxy_file();
    let mut config = create_test_config(
        BASE,
        db_path.to_str().unwrap(),
        Some(proxies.path().to_str().unwrap().to_string()),
    );
    config.retry.max_blocked = 2;

    let fetcher = Arc::new(ScriptedFetcher::default().script(&url("/list-1.html"), &[(403, CHALLENGE)]));

    let extractor = SiteExtractor::new(&config.site).unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let report = harvest_with(config, "hash", fetcher.clone(), extractor, stop_rx)
        .await
        .unwrap();

    assert_eq!(fetcher.calls_to(&url("/list-1.html")), 3);
    assert_eq!(report.diagnostics.attempts_blocked, 3);
    assert_eq!(report.summary.fatal, 1);
}

#[tokio::test]
async fn test_collection_cap_limits_discovery() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let proxies = proxy_file();
    let mut config = create_test_config(
        BASE,
        db_path.to_str().unwrap(),
        Some(proxies.path().to_str().unwrap().to_string()),
    );
    config.crawler.max_collections = Some(1);

    let alpha_list = item_list("alpha", 1);
    let alpha_one = content("Alpha one");
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .script(
                &url("/list-1.html"),
                &[(200, collection_list(&[("alpha", "Alpha", 1), ("beta", "Beta", 1)]).as_str())],
            )
            .script(&url("/api/alpha/chapters?page=1"), &[(200, alpha_list.as_str())])
            .script(&url("/novel/alpha/1.html"), &[(200, alpha_one.as_str())]),
    );

    let extractor = SiteExtractor::new(&config.site).unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let report = harvest_with(config, "hash", fetcher.clone(), extractor, stop_rx)
        .await
        .unwrap();

    assert!(report.diagnostics.capped >= 1);
    assert_eq!(fetcher.calls_to(&url("/list-2.html")), 0);
    assert_eq!(fetcher.calls_to(&url("/api/beta/chapters?page=1")), 0);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_collections().unwrap(), 1);
    assert!(storage.get_collection("beta").unwrap().is_none());
    assert!(storage.get_item_detail("alpha", 1).unwrap().is_some());
}

#[tokio::test]
async fn test_stop_before_start_marks_run_interrupted() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let proxies = proxy_file();
    let config = create_test_config(
        BASE,
        db_path.to_str().unwrap(),
        Some(proxies.path().to_str().unwrap().to_string()),
    );

    let fetcher = Arc::new(ScriptedFetcher::default());
    let extractor = SiteExtractor::new(&config.site).unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    stop_tx.send(true).unwrap();

    let report = harvest_with(config, "hash", fetcher.clone(), extractor, stop_rx)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Interrupted);
    assert!(report.summary.stopped);
    assert_eq!(report.summary.interrupted, 1);
    assert!(fetcher.calls.lock().unwrap().is_empty());

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(
        storage.get_run(report.run_id).unwrap().status,
        RunStatus::Interrupted
    );
}

#[tokio::test]
async fn test_stop_after_start_persists_in_flight_records() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let proxies = proxy_file();
    let config = create_test_config(
        BASE,
        db_path.to_str().unwrap(),
        Some(proxies.path().to_str().unwrap().to_string()),
    );

    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .script(
                &url("/list-1.html"),
                &[(200, collection_list(&[("alpha", "Alpha", 1), ("beta", "Beta", 1)]).as_str())],
            )
            .slow(&url("/list-1.html"), Duration::from_millis(200)),
    );
    let extractor = SiteExtractor::new(&config.site).unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        stop_tx
    });

    let report = harvest_with(config, "hash", fetcher.clone(), extractor, stop_rx)
        .await
        .unwrap();
    let _stop_tx = stopper.await.unwrap();

    assert_eq!(report.status, RunStatus::Interrupted);
    assert!(report.summary.stopped);
    assert_eq!(report.summary.succeeded, 1);
    // the two item listings and the next collection page never started
    assert!(report.summary.interrupted > 0);
    assert_eq!(fetcher.calls.lock().unwrap().len(), 1);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_collections().unwrap(), 2);
    assert!(storage.get_collection("beta").unwrap().is_some());
    assert_eq!(
        storage.get_run(report.run_id).unwrap().status,
        RunStatus::Interrupted
    );
}

#[tokio::test]
async fn test_best_proxies_saved_after_run() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let best_path = dir.path().join("best_proxies.txt");
    let proxies = single_proxy_file("10.0.0.9:8080");
    let mut config = create_test_config(
        BASE,
        db_path.to_str().unwrap(),
        Some(proxies.path().to_str().unwrap().to_string()),
    );
    config.identity.best_proxies_file = Some(best_path.to_str().unwrap().to_string());

    let alpha_list = item_list("alpha", 2);
    let beta_list = item_list("beta", 2);
    let page = content("Body");
    let fetcher = Arc::new(
        ScriptedFetcher::default()
            .script(
                &url("/list-1.html"),
                &[(200, collection_list(&[("alpha", "Alpha", 2), ("beta", "Beta", 2)]).as_str())],
            )
            .script(&url("/list-2.html"), &[(200, EMPTY_LIST)])
            .script(&url("/api/alpha/chapters?page=1"), &[(200, alpha_list.as_str())])
            .script(&url("/api/beta/chapters?page=1"), &[(200, beta_list.as_str())])
            .script(&url("/novel/alpha/1.html"), &[(200, page.as_str())])
            .script(&url("/novel/alpha/2.html"), &[(200, page.as_str())])
            .script(&url("/novel/beta/1.html"), &[(200, page.as_str())])
            .script(&url("/novel/beta/2.html"), &[(200, page.as_str())]),
    );

    let extractor = SiteExtractor::new(&config.site).unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let report = harvest_with(config, "hash", fetcher.clone(), extractor, stop_rx)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.summary.succeeded, 8);
    assert_eq!(std::fs::read_to_string(&best_path).unwrap(), "10.0.0.9:8080\n");
}

#[tokio::test]
async fn test_no_identity_without_proxies_or_direct_fallback() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let mut config = create_test_config(BASE, db_path.to_str().unwrap(), None);
    config.identity.allow_direct = false;
    config.retry.max_transient = 1;

    let fetcher = Arc::new(ScriptedFetcher::default());
    let extractor = SiteExtractor::new(&config.site).unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let report = harvest_with(config, "hash", fetcher.clone(), extractor, stop_rx)
        .await
        .unwrap();

    assert!(fetcher.calls.lock().unwrap().is_empty());
    assert_eq!(report.diagnostics.identities_exhausted, 2);
    assert_eq!(report.summary.fatal, 1);
}

#[tokio::test]
async fn test_end_to_end_against_mock_server() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/list-1.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(collection_list(&[("gamma", "Gamma", 2)]))
                .insert_header("content-type", "text/html"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/list-2.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_LIST))
        .mount(&mock_server)
        .await;

    // HTML listing instead of the JSON payload
    Mock::given(method("GET"))
        .and(path("/api/gamma/chapters"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><ul class="chapter-list">
                <li><a href="/novel/gamma/1.html">Chapter 1</a><span class="time">Jan 1</span></li>
                <li><a href="/novel/gamma/2.html">Chapter 2</a><span class="time">Jan 2</span></li>
            </ul></body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/novel/gamma/1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(content("First")))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/novel/gamma/2.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><div class=\"chapter-content\">Line one<br>Line two</div></html>"),
        )
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let config = create_test_config(&base_url, db_path.to_str().unwrap(), None);

    let (_stop_tx, stop_rx) = watch::channel(false);
    let report = harvest(config, "hash", stop_rx).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.summary.fatal, 0);

    let storage = SqliteStorage::new(Path::new(&db_path)).unwrap();
    let item = storage.get_item("gamma", 2).unwrap().unwrap();
    assert_eq!(item.title, "Chapter 2");
    assert_eq!(item.published, "Jan 2");
    assert_eq!(item.source_url, format!("{}/novel/gamma/2.html", base_url));
    assert_eq!(storage.get_item_detail("gamma", 1).unwrap().unwrap().body, "First");
    assert_eq!(
        storage.get_item_detail("gamma", 2).unwrap().unwrap().body,
        "Line one\n\nLine two"
    );
}
