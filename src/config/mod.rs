//! Configuration module for Catalog-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, and loading the proxy list they point at.
//!
//! # Example
//!
//! ```no_run
//! use catalog_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Fetch concurrency: {}", config.crawler.concurrency);
//! ```

mod parser;
mod proxies;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, IdentityConfig, OutputConfig, PersistenceConfig, RetryConfig,
    SelectorConfig, SiteConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use proxies::{load_proxy_file, parse_proxy_list};
