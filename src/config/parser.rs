use crate::config::types::{Config, PathPatternConfig};
use crate::config::validation::validate;
use crate::ConfigError;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_tide::config::load_config;
///
/// let config = load_config(Path::new("crawl.toml")).unwrap();
/// println!("Global concurrency: {}", config.crawler.global_concurrency);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// The part of the configuration that defines which pages a crawl covers
#[derive(Serialize)]
struct FingerprintInput<'a> {
    name: &'a str,
    start_urls: Vec<&'a str>,
    allowed_domains: Vec<&'a str>,
    include: &'a [PathPatternConfig],
    exclude: &'a [PathPatternConfig],
    depth_limit: Option<u32>,
    link_selectors: &'a [String],
}

/// Computes a SHA-256 fingerprint of the crawl's identity
///
/// Only the fields that change which pages are crawled contribute: the crawl
/// name, start URLs, allowed domains, include/exclude rules, depth limit and
/// link selectors. Output location and performance tuning are ignored, so
/// editing them does not invalidate an existing checkpoint.
///
/// # Returns
///
/// Hex-encoded SHA-256 digest (64 characters)
pub fn compute_config_fingerprint(config: &Config) -> String {
    let mut start_urls: Vec<&str> = config.site.start_urls.iter().map(String::as_str).collect();
    start_urls.sort_unstable();
    let mut allowed_domains: Vec<&str> = config
        .site
        .allowed_domains
        .iter()
        .map(String::as_str)
        .collect();
    allowed_domains.sort_unstable();

    let input = FingerprintInput {
        name: &config.name,
        start_urls,
        allowed_domains,
        include: &config.crawler.include,
        exclude: &config.crawler.exclude,
        depth_limit: config.crawler.depth_limit,
        link_selectors: &config.crawler.link_selectors,
    };

    // Serializing plain strings, options and vectors cannot fail
    let encoded = serde_json::to_vec(&input).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    hex::encode(hasher.finalize())
}

/// Loads a configuration and returns both the config and its fingerprint
pub fn load_config_with_fingerprint(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let fingerprint = compute_config_fingerprint(&config);
    Ok((config, fingerprint))
}
