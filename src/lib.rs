//! Catalog-Harvest: a resilient catalog harvester
//!
//! This crate walks a paginated, hierarchical catalog (collection → items →
//! item detail) behind rotating proxies and client signatures, classifies
//! every fetch outcome, retries within fixed bounds, and reconciles the
//! extracted records into SQLite with referential integrity.

pub mod config;
pub mod crawler;
pub mod identity;
pub mod output;
pub mod persistence;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Catalog-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Identity error: {0}")]
    Identity(#[from] identity::IdentityError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extractor error: {0}")]
    Extract(#[from] crawler::ExtractError),

    #[error("Persistence worker failed: {0}")]
    Worker(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid proxy entry on line {line}: '{entry}'")]
    InvalidProxy { line: usize, entry: String },
}

/// Result type alias for Catalog-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{harvest, harvest_with, Coordinator, HarvestReport};
pub use output::{Diagnostics, DiagnosticsSnapshot};
pub use persistence::Reconciler;
pub use state::{ProxyState, TaskState};
