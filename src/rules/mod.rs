//! Crawl scope rules
//!
//! Decides which discovered URLs are worth fetching (allowed domains, depth
//! limit, include/exclude path patterns) and extracts links and assets from
//! fetched HTML.

mod extract;
mod patterns;

pub use extract::{extract_assets, LinkExtractor, SelectorLinkExtractor};
pub use patterns::PathPattern;

use crate::config::Config;
use crate::url::{extract_host, matches_domain};
use crate::ConfigError;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use url::Url;

/// Decides whether a discovered URL should be crawled
pub trait Rules: Send + Sync {
    /// `parent` is the page the URL was found on; `None` for start URLs
    fn should_follow(&self, url: &Url, parent: Option<&Url>) -> bool;
}

/// Rules built from the crawl configuration
///
/// Checks run in order: allowed domain, depth limit, exclude patterns, include
/// patterns. An empty include list admits every path that was not excluded.
#[derive(Debug)]
pub struct RulesEngine {
    allowed_domains: Vec<String>,
    depth_limit: Option<u32>,
    include: Vec<PathPattern>,
    exclude: Vec<PathPattern>,
    /// Shortest known link distance of every accepted URL
    depths: Mutex<HashMap<String, u32>>,
}

impl RulesEngine {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let compile = |patterns: &[crate::config::PathPatternConfig]| {
            patterns
                .iter()
                .map(PathPattern::compile)
                .collect::<Result<Vec<_>, _>>()
        };

        Ok(Self {
            allowed_domains: config.site.allowed_domains.clone(),
            depth_limit: config.crawler.depth_limit,
            include: compile(&config.crawler.include)?,
            exclude: compile(&config.crawler.exclude)?,
            depths: Mutex::new(HashMap::new()),
        })
    }

    fn is_allowed_domain(&self, url: &Url) -> bool {
        match extract_host(url) {
            Some(host) => self
                .allowed_domains
                .iter()
                .any(|allowed| matches_domain(allowed, &host)),
            None => false,
        }
    }

    /// Depth is 0 for a URL without a parent, otherwise one more than the
    /// parent's recorded depth. A shallower recorded depth wins.
    fn depth_of(&self, url: &Url, parent: Option<&Url>) -> u32 {
        let depths = self.depths.lock().unwrap_or_else(PoisonError::into_inner);
        let depth = match parent {
            None => 0,
            Some(parent) => depths.get(parent.as_str()).copied().unwrap_or(0) + 1,
        };
        match depths.get(url.as_str()) {
            Some(&recorded) => recorded.min(depth),
            None => depth,
        }
    }

    /// Only accepted URLs are recorded, so a rejection never pins a depth
    fn record_depth(&self, url: &Url, depth: u32) {
        let mut depths = self.depths.lock().unwrap_or_else(PoisonError::into_inner);
        depths
            .entry(url.to_string())
            .and_modify(|recorded| *recorded = (*recorded).min(depth))
            .or_insert(depth);
    }
}

impl Rules for RulesEngine {
    fn should_follow(&self, url: &Url, parent: Option<&Url>) -> bool {
        if !self.is_allowed_domain(url) {
            return false;
        }

        let depth = match self.depth_limit {
            Some(limit) => {
                let depth = self.depth_of(url, parent);
                if depth > limit {
                    return false;
                }
                Some(depth)
            }
            None => None,
        };

        let path = url.path();
        if self.exclude.iter().any(|p| p.matches(path)) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(path)) {
            return false;
        }

        if let Some(depth) = depth {
            self.record_depth(url, depth);
        }
        true
    }
}
