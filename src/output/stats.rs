//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics from the storage layer.

use crate::output::DropReason;
use crate::storage::{RunRecord, Store};
use crate::HarvestError;
use std::collections::HashMap;

/// Number of runs shown by `--stats`
const RECENT_RUNS: usize = 10;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    pub collections: u64,
    pub items: u64,
    pub item_details: u64,

    /// Ledger entries per drop reason, across all runs
    pub failures_by_reason: HashMap<String, u64>,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

impl HarvestStatistics {
    /// Share of stored items that have a body
    pub fn detail_coverage(&self) -> f64 {
        if self.items == 0 {
            0.0
        } else {
            (self.item_details as f64 / self.items as f64) * 100.0
        }
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Store) -> Result<HarvestStatistics, HarvestError> {
    Ok(HarvestStatistics {
        collections: storage.count_collections()?,
        items: storage.count_items()?,
        item_details: storage.count_item_details()?,
        failures_by_reason: storage.count_failures_by_reason()?,
        recent_runs: storage.list_runs(RECENT_RUNS)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Collections: {}", stats.collections);
    println!("  Items: {}", stats.items);
    println!(
        "  Item details: {} ({:.1}% of items)",
        stats.item_details,
        stats.detail_coverage()
    );
    println!();

    if !stats.failures_by_reason.is_empty() {
        println!("Failure Ledger:");
        let mut counts: Vec<_> = stats.failures_by_reason.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));

        for (reason, count) in counts {
            let label = DropReason::from_db_string(reason)
                .map(|r| r.to_db_string())
                .unwrap_or("unknown");
            println!("  {}: {}", label, count);
        }
        println!();
    }

    if !stats.recent_runs.is_empty() {
        println!("Recent Runs:");
        for run in &stats.recent_runs {
            println!(
                "  #{} {} started {} finished {}",
                run.id,
                run.status.to_db_string(),
                run.started_at,
                run.finished_at.as_deref().unwrap_or("-")
            );
        }
    }
}
