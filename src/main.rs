//! Catalog-Harvest main entry point
//!
//! This is the command-line interface for the catalog harvester.

use anyhow::Context;
use catalog_harvest::config::{load_config_with_hash, Config};
use catalog_harvest::crawler::{build_rotator, harvest};
use catalog_harvest::storage::RunStatus;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Catalog-Harvest: a resilient catalog harvester
///
/// Catalog-Harvest walks a paginated catalog of collections, their items and
/// each item's content through rotating proxies and client signatures, and
/// stores everything in SQLite.
#[derive(Parser, Debug)]
#[command(name = "catalog-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resilient catalog harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and proxy list and show what would be harvested
    #[arg(long, conflicts_with_all = ["stats", "check_proxies"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "check_proxies"])]
    stats: bool,

    /// Probe every proxy in the list and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    check_proxies: bool,

    /// Stop discovering collections after this many (overrides the config)
    #[arg(long, value_name = "N")]
    max_collections: Option<u32>,

    /// Stop discovering items of a collection after this many (overrides the config)
    #[arg(long, value_name = "N")]
    max_items: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if let Some(max) = cli.max_collections {
        config.crawler.max_collections = Some(max);
    }
    if let Some(max) = cli.max_items {
        config.crawler.max_items_per_collection = Some(max);
    }

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else if cli.check_proxies {
        handle_check_proxies(&config).await
    } else {
        handle_harvest(config, &config_hash).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("catalog_harvest=info,warn"),
            1 => EnvFilter::new("catalog_harvest=debug,info"),
            2 => EnvFilter::new("catalog_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn describe_cap(cap: Option<u32>) -> String {
    cap.map(|n| n.to_string()).unwrap_or_else(|| "none".to_string())
}

/// Handles the --dry-run mode: validates config and proxies, shows what would be harvested
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Catalog-Harvest Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!("  Request delay: {}ms", config.crawler.request_delay_ms);
    println!("  Request timeout: {}s", config.crawler.request_timeout_secs);
    println!("  Page size: {}", config.crawler.page_size);
    println!("  Page cap: {}", describe_cap(config.crawler.page_cap));
    println!("  Max collections: {}", describe_cap(config.crawler.max_collections));
    println!(
        "  Max items per collection: {}",
        describe_cap(config.crawler.max_items_per_collection)
    );

    println!("\nRetry:");
    println!("  Max transient retries: {}", config.retry.max_transient);
    println!("  Max blocked retries: {}", config.retry.max_blocked);
    println!(
        "  Backoff: {}ms + {}..{}ms jitter",
        config.retry.base_delay_ms, config.retry.jitter_min_ms, config.retry.jitter_max_ms
    );

    println!("\nSite:");
    println!("  Base URL: {}", config.site.base_url);
    println!("  Collection list: {}", config.site.list_url);
    println!("  Detail list: {}", config.site.detail_list_url);

    let rotator = build_rotator(config).context("Failed to load the proxy list")?;
    println!("\nIdentity:");
    println!("  Proxies: {}", rotator.pool().len());
    println!("  Client signatures: {}", rotator.signatures().len());
    println!("  Direct fallback: {}", config.identity.allow_direct);
    println!("  Proxy cooldown: {}s", config.identity.cooldown_secs);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!(
        "  Writer shards: {}, detail attempts: {}",
        config.persistence.workers, config.persistence.detail_max_attempts
    );

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start harvesting from {}",
        config.site.list_url.replace("{page}", "1")
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use catalog_harvest::output::{load_statistics, print_statistics};
    use catalog_harvest::storage::SqliteStorage;
    use std::path::Path;

    println!("Database: {}\n", config.output.database_path);

    // Open the database
    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;

    // Load statistics
    let stats = load_statistics(&storage)?;

    // Print statistics
    print_statistics(&stats);

    Ok(())
}

/// Handles the --check-proxies mode: probes every proxy once
async fn handle_check_proxies(config: &Config) -> anyhow::Result<()> {
    use catalog_harvest::identity::probe_proxies;

    let rotator = build_rotator(config).context("Failed to load the proxy list")?;
    if rotator.pool().is_empty() {
        anyhow::bail!("No proxies to check: set identity.proxy-file");
    }

    println!("Testing {} proxies against {}\n", rotator.pool().len(), config.identity.probe_url);

    let results = probe_proxies(
        &rotator,
        &config.identity.probe_url,
        config.crawler.concurrency as usize,
        Duration::from_secs(config.crawler.request_timeout_secs),
    )
    .await;

    let mut working = 0usize;
    for result in &results {
        if result.ok {
            working += 1;
            println!("✓ {} ({}ms)", result.address, result.elapsed.as_millis());
        } else {
            let reason = match (&result.error, result.status) {
                (Some(e), _) => e.clone(),
                (None, Some(status)) => format!("HTTP {}", status),
                (None, None) => "no response".to_string(),
            };
            println!("✗ {}: {}", result.address, reason);
        }
    }

    println!("\nWorking proxies: {}/{}", working, results.len());
    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, config_hash: &str) -> anyhow::Result<()> {
    tracing::info!(
        "Harvesting {} with concurrency {}",
        config.site.base_url,
        config.crawler.concurrency
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work...");
            let _ = stop_tx.send(true);
        }
    });

    match harvest(config, config_hash, stop_rx).await {
        Ok(report) => {
            match report.status {
                RunStatus::Interrupted => tracing::warn!(
                    "Run {} interrupted: {} tasks left unfinished",
                    report.run_id,
                    report.summary.interrupted
                ),
                _ => tracing::info!("Harvest completed successfully (run {})", report.run_id),
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}
