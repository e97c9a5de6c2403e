//! Crawl counters, stored in checkpoint metadata on every save

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlStats {
    /// Pages fetched and yielded
    pub pages_crawled: u64,
    /// Pages that ended in a terminal error
    pub pages_failed: u64,
    /// Pages skipped because the checkpoint copy is still fresh
    pub pages_skipped_fresh: u64,
    /// Pages the server confirmed unchanged with a 304
    pub pages_not_modified: u64,
    /// Non-HTML responses that were skipped
    pub pages_not_html: u64,
    pub robots_denied: u64,
    /// Body bytes of all crawled pages
    pub total_bytes: u64,
    pub assets_discovered: u64,
    /// Terminal failures by error kind
    pub error_counts: BTreeMap<String, u64>,
}

impl CrawlStats {
    pub fn record_error(&mut self, kind: impl Into<String>) {
        self.pages_failed += 1;
        *self.error_counts.entry(kind.into()).or_insert(0) += 1;
    }

    /// JSON form for checkpoint metadata
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
