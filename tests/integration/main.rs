//! Integration tests for Sumi-Tide
//!
//! These tests run against wiremock servers and temporary directories.

mod checkpoint_tests;
mod crawl_tests;
mod fetch_tests;
mod pipeline_tests;

use std::path::Path;
use sumi_tide::config::Config;
use wiremock::ResponseTemplate;

/// Creates a test configuration scoped to the mock server
///
/// Retries and throttling are tuned down so tests finish quickly. The
/// checkpoint and snapshots go under `dir`.
pub fn test_config(base_url: &str, dir: &Path) -> Config {
    let host = url::Url::parse(base_url)
        .expect("Failed to parse base URL")
        .host_str()
        .expect("Failed to extract host")
        .to_string();

    let mut config = Config::new("integration", vec![format!("{}/", base_url)], vec![host]);
    config.crawler.global_concurrency = 4;
    config.crawler.per_host_concurrency = 2;
    config.crawler.requests_per_second = 200.0;
    config.crawler.burst = 20;
    config.crawler.max_retries = 2;
    config.crawler.retry_base_delay_ms = 10;
    config.crawler.retry_jitter = 0.0;
    config.crawler.respect_robots_txt = false;
    config.checkpoint.path = dir.join("checkpoint.json");
    config.output.directory = dir.join("site");
    config
}

/// An HTML response linking to each of `links`
pub fn html_page(title: &str, links: &[String]) -> ResponseTemplate {
    let anchors: String = links
        .iter()
        .map(|link| format!(r#"<a href="{}">{}</a>"#, link, link))
        .collect();
    let body = format!(
        "<html><head><title>{}</title></head><body>{}</body></html>",
        title, anchors
    );
    ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
}

/// Snapshot directory name for the mock server's host and port
pub fn host_dir(base_url: &str) -> String {
    let url = url::Url::parse(base_url).expect("Failed to parse base URL");
    format!(
        "{}_{}",
        url.host_str().expect("Failed to extract host"),
        url.port().expect("mock server has an explicit port")
    )
}
