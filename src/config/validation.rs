use crate::config::types::{
    AdaptiveConfig, CheckpointConfig, Config, CrawlerConfig, PipelineConfig, SiteConfig,
    UserAgentConfig,
};
use crate::rules::PathPattern;
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_name(&config.name)?;
    validate_site_config(&config.site)?;
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_checkpoint_config(&config.checkpoint)?;
    validate_pipeline_config(&config.pipeline)?;
    Ok(())
}

/// Crawl names end up in checkpoint metadata and log lines
fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation("name cannot be empty".to_string()));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "name must contain only alphanumeric characters, hyphens and underscores, got '{}'",
            name
        )));
    }

    Ok(())
}

fn validate_site_config(site: &SiteConfig) -> Result<(), ConfigError> {
    if site.start_urls.is_empty() {
        return Err(ConfigError::Validation(
            "at least one start URL is required".to_string(),
        ));
    }

    for start in &site.start_urls {
        let url = Url::parse(start).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", start, e))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Start URL '{}' must use http or https",
                start
            )));
        }
    }

    if site.allowed_domains.is_empty() {
        return Err(ConfigError::Validation(
            "at least one allowed domain is required".to_string(),
        ));
    }

    for domain in &site.allowed_domains {
        validate_domain_string(domain)?;
    }

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.global_concurrency < 1 {
        return Err(ConfigError::Validation(format!(
            "global_concurrency must be >= 1, got {}",
            config.global_concurrency
        )));
    }

    if config.per_host_concurrency < 1 || config.per_host_concurrency > config.global_concurrency
    {
        return Err(ConfigError::Validation(format!(
            "per_host_concurrency must be between 1 and global_concurrency ({}), got {}",
            config.global_concurrency, config.per_host_concurrency
        )));
    }

    if !(config.requests_per_second > 0.0) {
        return Err(ConfigError::Validation(format!(
            "requests_per_second must be > 0, got {}",
            config.requests_per_second
        )));
    }

    if config.burst < 1 {
        return Err(ConfigError::Validation("burst must be >= 1".to_string()));
    }

    if config.retry_backoff < 1.0 {
        return Err(ConfigError::Validation(format!(
            "retry_backoff must be >= 1.0, got {}",
            config.retry_backoff
        )));
    }

    if !(0.0..1.0).contains(&config.retry_jitter) {
        return Err(ConfigError::Validation(format!(
            "retry_jitter must be in [0, 1), got {}",
            config.retry_jitter
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation("max_pages must be >= 1".to_string()));
    }

    if config.link_selectors.is_empty() {
        return Err(ConfigError::Validation(
            "at least one link selector is required".to_string(),
        ));
    }

    for selector in &config.link_selectors {
        Selector::parse(selector).map_err(|e| {
            ConfigError::InvalidPattern(format!("Invalid link selector '{}': {:?}", selector, e))
        })?;
    }

    for pattern in config.include.iter().chain(&config.exclude) {
        PathPattern::compile(pattern)?;
    }

    validate_adaptive_config(&config.adaptive)?;

    if config.renderer.pool_size < 1 {
        return Err(ConfigError::Validation(
            "renderer pool_size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_adaptive_config(config: &AdaptiveConfig) -> Result<(), ConfigError> {
    if !config.enabled {
        return Ok(());
    }

    if !(config.min_rate > 0.0) || config.min_rate > config.max_rate {
        return Err(ConfigError::Validation(format!(
            "adaptive rate bounds must satisfy 0 < min_rate <= max_rate, got {}..{}",
            config.min_rate, config.max_rate
        )));
    }

    if config.increase_factor < 1.0 {
        return Err(ConfigError::Validation(format!(
            "adaptive increase_factor must be >= 1.0, got {}",
            config.increase_factor
        )));
    }

    if !(config.decrease_factor > 0.0 && config.decrease_factor < 1.0) {
        return Err(ConfigError::Validation(format!(
            "adaptive decrease_factor must be in (0, 1), got {}",
            config.decrease_factor
        )));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    if let Some(contact_url) = &config.contact_url {
        Url::parse(contact_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;
    }

    if let Some(email) = &config.contact_email {
        validate_email(email)?;
    }

    Ok(())
}

fn validate_checkpoint_config(config: &CheckpointConfig) -> Result<(), ConfigError> {
    if config.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint path cannot be empty".to_string(),
        ));
    }

    if config.interval_pages < 1 {
        return Err(ConfigError::Validation(
            "checkpoint interval_pages must be >= 1".to_string(),
        ));
    }

    if let Some(days) = config.max_age_days {
        if !(days >= 0.0) {
            return Err(ConfigError::Validation(format!(
                "checkpoint max_age_days must be >= 0, got {}",
                days
            )));
        }
    }

    Ok(())
}

fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 50 {
        return Err(ConfigError::Validation(format!(
            "pipeline workers must be between 1 and 50, got {}",
            config.workers
        )));
    }

    if config.queue_max_items < 1 {
        return Err(ConfigError::Validation(
            "queue_max_items must be >= 1".to_string(),
        ));
    }

    if config.queue_max_memory_mb < 1 {
        return Err(ConfigError::Validation(
            "queue_max_memory_mb must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates a domain string
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
