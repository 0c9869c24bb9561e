//! Crawler module for catalog harvesting
//!
//! This module contains the core crawling logic, including:
//! - Fetch tasks and the traversal scheduler
//! - HTTP fetching through rotating identities
//! - Outcome classification and bounded retries
//! - Page extraction into typed records
//! - Overall crawl coordination

mod classifier;
mod coordinator;
mod extractor;
mod fetcher;
mod retry;
mod scheduler;
mod task;

pub use classifier::{Classification, FailureClassifier, TransientCause};
pub use coordinator::{Coordinator, CrawlSummary};
pub use extractor::{ExtractError, Extraction, Extractor, SiteExtractor};
pub use fetcher::{build_http_client, FetchOutcome, FetchResponse, Fetcher, HttpFetcher, TransportError};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::Scheduler;
pub use task::{FetchTask, FollowUp, PageTemplates, TaskKind, TaskParent};

use crate::config::{load_proxy_file, Config};
use crate::identity::{IdentityRotator, ProxyPool};
use crate::output::{Diagnostics, DiagnosticsSnapshot};
use crate::persistence::{PersistenceWriter, Reconciler};
use crate::state::RequestPacer;
use crate::storage::{open_storage, RunStatus, Store};
use crate::HarvestError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Attempts a proxy needs before it is ranked
const BEST_MIN_REQUESTS: u64 = 5;
/// Success rate (percent) a proxy needs to be saved as one of the best
const BEST_MIN_SUCCESS_RATE: f64 = 70.0;
const HEALTH_REPORT_TOP: usize = 5;

/// Outcome of one harvest run
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub run_id: i64,
    pub status: RunStatus,
    pub summary: CrawlSummary,
    pub diagnostics: DiagnosticsSnapshot,
}

/// Builds the proxy pool from the configured proxy list
pub fn build_rotator(config: &Config) -> Result<Arc<IdentityRotator>, HarvestError> {
    let proxies = match &config.identity.proxy_file {
        Some(path) => load_proxy_file(Path::new(path))?,
        None => Vec::new(),
    };
    if proxies.is_empty() && !config.identity.allow_direct {
        tracing::warn!("No proxies configured and direct connections are disabled; every fetch will fail");
    }

    let pool = Arc::new(ProxyPool::new(
        proxies,
        Duration::from_secs(config.identity.cooldown_secs),
    ));
    Ok(Arc::new(IdentityRotator::new(
        pool,
        config.identity.user_agents.clone(),
        config.identity.allow_direct,
    )))
}

/// Logs the best and worst proxies and the most used client signatures
fn report_identity_health(rotator: &IdentityRotator) {
    let pool = rotator.pool();
    for proxy in pool.best(BEST_MIN_REQUESTS, HEALTH_REPORT_TOP) {
        tracing::info!(
            "Best proxy {}: {:.1}% success ({}/{} requests)",
            proxy.address,
            proxy.success_rate(),
            proxy.successes,
            proxy.requests
        );
    }
    for proxy in pool.worst(BEST_MIN_REQUESTS, HEALTH_REPORT_TOP) {
        tracing::info!(
            "Worst proxy {}: {:.1}% success ({}/{} requests)",
            proxy.address,
            proxy.success_rate(),
            proxy.successes,
            proxy.requests
        );
    }
    for (signature, uses) in rotator.most_used_signatures(HEALTH_REPORT_TOP) {
        let shown: String = signature.chars().take(50).collect();
        tracing::debug!("Client signature used {} times: {}", uses, shown);
    }
}

/// Runs a complete harvest against the live site
///
/// This is the main entry point for starting a harvest. It will:
/// 1. Load the proxy list and build the identity rotator
/// 2. Open the database and record a new run
/// 3. Spawn the persistence shards
/// 4. Crawl the catalog until done or stopped
/// 5. Drain persistence and write the failure ledger
/// 6. Mark the run completed or interrupted
///
/// # Arguments
///
/// * `config` - The harvester configuration
/// * `config_hash` - Hash recorded with the run
/// * `stop` - Flips to `true` when the harvest should wind down
pub async fn harvest(
    config: Config,
    config_hash: &str,
    stop: watch::Receiver<bool>,
) -> Result<HarvestReport, HarvestError> {
    let fetcher = HttpFetcher::new(Duration::from_secs(config.crawler.request_timeout_secs));
    let extractor = SiteExtractor::new(&config.site)?.with_page_size(config.crawler.page_size);
    harvest_with(config, config_hash, Arc::new(fetcher), extractor, stop).await
}

/// Runs a harvest with the given fetch and extraction collaborators
pub async fn harvest_with<F, E>(
    config: Config,
    config_hash: &str,
    fetcher: Arc<F>,
    extractor: E,
    stop: watch::Receiver<bool>,
) -> Result<HarvestReport, HarvestError>
where
    F: Fetcher + 'static,
    E: Extractor,
{
    let rotator = build_rotator(&config)?;
    let pool = Arc::clone(rotator.pool());

    let mut storage = open_storage(Path::new(&config.output.database_path))?;
    let run_id = storage.create_run(config_hash)?;
    tracing::info!("Started run {} ({})", run_id, config.output.database_path);

    let diagnostics = Arc::new(Diagnostics::new());
    let reconciler = Arc::new(Reconciler::new(
        storage,
        Arc::clone(&diagnostics),
        config.persistence.detail_max_attempts,
    ));
    let writer = PersistenceWriter::spawn(
        reconciler,
        config.persistence.workers as usize,
        config.persistence.sweep_every as usize,
    );

    let scheduler = Scheduler::new(
        &config.crawler,
        PageTemplates::from_site(&config.site),
        Arc::clone(&diagnostics),
    );
    let mut coordinator = Coordinator::new(
        scheduler,
        fetcher,
        extractor,
        Arc::clone(&rotator),
        FailureClassifier::new(&config.identity.challenge_markers),
        RetryPolicy::new(config.retry.clone(), Arc::clone(&pool), Arc::clone(&diagnostics)),
        Arc::new(RequestPacer::new(Duration::from_millis(config.crawler.request_delay_ms))),
        config.crawler.concurrency as usize,
        Arc::clone(&diagnostics),
        stop,
    );

    let crawl = coordinator.run(&writer).await;

    // Queued writes drain even when the crawl loop failed
    let reconciler = writer.shutdown().await?;

    let status = match &crawl {
        Ok(summary) if summary.stopped => RunStatus::Interrupted,
        Ok(_) => RunStatus::Completed,
        Err(_) => RunStatus::Failed,
    };

    let ledger = diagnostics.take_ledger();
    reconciler.with_store(|store| -> Result<(), HarvestError> {
        store.record_failures(run_id, &ledger)?;
        store.finish_run(run_id, status)?;
        Ok(())
    })?;

    let counts = pool.counts();
    tracing::info!(
        "Proxy pool at end of run: {} active, {} cooling, {} banned",
        counts.active,
        counts.cooling,
        counts.banned
    );
    report_identity_health(&rotator);
    if let Some(path) = &config.identity.best_proxies_file {
        if let Err(e) = pool.save_best(Path::new(path), BEST_MIN_REQUESTS, BEST_MIN_SUCCESS_RATE) {
            tracing::warn!("Could not save best proxies to {}: {}", path, e);
        }
    }

    let snapshot = diagnostics.snapshot();
    snapshot.log_summary();

    let summary = crawl?;
    tracing::info!("Run {} finished: {}", run_id, status.to_db_string());

    Ok(HarvestReport {
        run_id,
        status,
        summary,
        diagnostics: snapshot,
    })
}
