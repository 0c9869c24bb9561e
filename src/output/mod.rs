//! Output module for run diagnostics and harvest reports
//!
//! This module handles:
//! - The shared diagnostics sink (outcome counters and failure ledger)
//! - Reading harvest statistics back from the database

mod diagnostics;
pub mod stats;

pub use diagnostics::{Counter, Diagnostics, DiagnosticsSnapshot, DropReason};
pub use stats::{load_statistics, print_statistics, HarvestStatistics};
