//! Sumi-Tide: a polite, resumable site crawler
//!
//! This crate implements the crawl engine of an offline site mirror: it decides
//! what to fetch next, bounds concurrency globally and per host, throttles with a
//! token bucket, retries failures, persists progress to a checkpoint so a crawl
//! survives a crash, and hands fetched pages to a memory-bounded processing
//! pipeline.

pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod output;
pub mod pipeline;
pub mod robots;
pub mod rules;
pub mod runner;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Tide operations
///
/// Only failures to set up a required resource surface here. Per-URL fetch
/// failures are absorbed by the crawler and counted in its statistics.
#[derive(Debug, Error)]
pub enum TideError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Renderer error: {0}")]
    Renderer(#[from] crawler::RenderError),
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

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Sumi-Tide operations
pub type Result<T> = std::result::Result<T, TideError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use checkpoint::{CheckpointManager, CrawlTask, PageRecord, StartMode};
pub use config::Config;
pub use crawler::{CrawlStats, Crawler, FetchResult};
pub use pipeline::{MemoryAwareQueue, Pipeline};
pub use runner::{run, RunOptions, RunSummary};
pub use url::{is_safe_scheme, normalize_url};
