use crate::config::types::{
    Config, CrawlerConfig, IdentityConfig, OutputConfig, PersistenceConfig, RetryConfig,
    SiteConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_retry_config(&config.retry)?;
    validate_identity_config(&config.identity)?;
    validate_site_config(&config.site)?;
    validate_output_config(&config.output)?;
    validate_persistence_config(&config.persistence)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.page_size == 0 {
        return Err(ConfigError::Validation(
            "page_size must be >= 1".to_string(),
        ));
    }

    if config.page_cap == Some(0) {
        return Err(ConfigError::Validation(
            "page_cap must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates retry bounds and backoff timing
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.jitter_min_ms > config.jitter_max_ms {
        return Err(ConfigError::Validation(format!(
            "jitter_min_ms ({}) must not exceed jitter_max_ms ({})",
            config.jitter_min_ms, config.jitter_max_ms
        )));
    }

    Ok(())
}

/// Validates identity configuration
fn validate_identity_config(config: &IdentityConfig) -> Result<(), ConfigError> {
    if config.user_agents.is_empty() {
        return Err(ConfigError::Validation(
            "user_agents must contain at least one signature".to_string(),
        ));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents cannot contain empty entries".to_string(),
        ));
    }

    if config.challenge_markers.iter().any(|m| m.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "challenge_markers cannot contain empty entries".to_string(),
        ));
    }

    if config.proxy_file.is_none() && !config.allow_direct {
        return Err(ConfigError::Validation(
            "either proxy_file must be set or allow_direct must be true".to_string(),
        ));
    }

    Url::parse(&config.probe_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid probe_url: {}", e)))?;

    Ok(())
}

/// Validates the site layout configuration
fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    validate_template("list_url", &config.list_url, &["{page}"])?;
    validate_template(
        "detail_list_url",
        &config.detail_list_url,
        &["{page}", "{key}"],
    )?;

    let selectors = [
        &config.selectors.collection_item,
        &config.selectors.collection_title,
        &config.selectors.collection_count,
        &config.selectors.collection_status,
        &config.selectors.item_row,
        &config.selectors.item_date,
        &config.selectors.detail_body,
    ];
    for selector in selectors {
        if scraper::Selector::parse(selector).is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid CSS selector: '{}'",
                selector
            )));
        }
    }

    Ok(())
}

/// Checks that a URL template carries its placeholders and parses once filled in
fn validate_template(name: &str, template: &str, placeholders: &[&str]) -> Result<(), ConfigError> {
    for placeholder in placeholders {
        if !template.contains(placeholder) {
            return Err(ConfigError::Validation(format!(
                "{} must contain the {} placeholder, got '{}'",
                name, placeholder, template
            )));
        }
    }

    let filled = template.replace("{page}", "1").replace("{key}", "key");
    Url::parse(&filled)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", name, e)))?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates persistence configuration
fn validate_persistence_config(config: &PersistenceConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 64 {
        return Err(ConfigError::Validation(format!(
            "persistence workers must be between 1 and 64, got {}",
            config.workers
        )));
    }

    if config.detail_max_attempts < 1 {
        return Err(ConfigError::Validation(
            "detail_max_attempts must be >= 1".to_string(),
        ));
    }

    if config.sweep_every < 1 {
        return Err(ConfigError::Validation(
            "sweep_every must be >= 1".to_string(),
        ));
    }

    Ok(())
}
