//! Proxy list loading
//!
//! The list is newline-delimited `host:port`, one proxy per line. Blank
//! lines and `#` comments are skipped.

use crate::ConfigError;
use std::path::Path;

/// Reads and parses a proxy list file
pub fn load_proxy_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let proxies = parse_proxy_list(&content)?;
    tracing::info!("Loaded {} proxies from {}", proxies.len(), path.display());
    Ok(proxies)
}

/// Parses proxy list content, preserving order and dropping duplicates
pub fn parse_proxy_list(content: &str) -> Result<Vec<String>, ConfigError> {
    let mut proxies: Vec<String> = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if !is_host_port(line) {
            return Err(ConfigError::InvalidProxy {
                line: idx + 1,
                entry: line.to_string(),
            });
        }

        if !proxies.iter().any(|p| p == line) {
            proxies.push(line.to_string());
        }
    }

    Ok(proxies)
}

fn is_host_port(entry: &str) -> bool {
    let Some((host, port)) = entry.rsplit_once(':') else {
        return false;
    };

    !host.is_empty()
        && !host.contains(char::is_whitespace)
        && port.parse::<u16>().map(|p| p > 0).unwrap_or(false)
}
