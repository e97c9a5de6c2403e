//! Configuration module for Sumi-Tide
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_tide::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl.toml")).unwrap();
//! println!("Crawling {} start URLs", config.site.start_urls.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AdaptiveConfig, BackendKind, CheckpointConfig, Config, CrawlerConfig, FetchStrategy,
    FingerprintPolicy, OutputConfig, PathPatternConfig, PatternKind, PipelineConfig,
    RendererConfig, SiteConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_fingerprint, load_config, load_config_with_fingerprint, parse_config};
pub use validation::validate;
