//! End-to-end crawl tests
//!
//! These tests use wiremock to serve small sites and drive the full crawl
//! cycle, including checkpoint resume.

use crate::{host_dir, html_page, test_config};
use std::collections::HashSet;
use std::sync::Arc;
use sumi_tide::checkpoint::{
    inspect_checkpoint, CheckpointManager, CrawlTask, PageRecord, StartMode,
};
use sumi_tide::crawler::{Crawler, StopReason};
use sumi_tide::output::relative_output_path;
use sumi_tide::runner::{run, RunOptions};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn resume() -> RunOptions {
    RunOptions::default()
}

fn fresh() -> RunOptions {
    RunOptions {
        start_mode: StartMode::Fresh,
        ..RunOptions::default()
    }
}

#[tokio::test]
async fn test_full_crawl_writes_snapshots() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            "Home",
            &[
                format!("{}/a", base_url),
                format!("{}/b", base_url),
                "https://elsewhere.example/page".to_string(),
            ],
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html_page(
            "A",
            &[format!("{}/b", base_url), format!("{}/", base_url)],
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html_page("B", &[]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&base_url, dir.path());
    let summary = run(config.clone(), resume()).await.expect("Crawl failed");

    assert_eq!(summary.stop_reason, StopReason::Completed);
    assert_eq!(summary.crawl.pages_crawled, 3);
    // The off-site link is never attempted
    assert_eq!(summary.crawl.pages_failed, 0);
    assert_eq!(summary.pipeline.items_processed, 3);
    assert_eq!(summary.queue_remaining, 0);
    assert!(!summary.resumed);

    let site = dir.path().join("site").join(host_dir(&base_url));
    let home = std::fs::read_to_string(site.join("index.html")).unwrap();
    assert!(home.contains("<title>Home</title>"));
    assert!(site.join("a.html").exists());
    assert!(site.join("b.html").exists());

    let (metadata, page_count) = inspect_checkpoint(&config).unwrap().unwrap();
    assert_eq!(page_count, 3);
    assert_eq!(metadata.config_name, "integration");
    assert_eq!(metadata.stats["pages_crawled"], 3);
}

#[tokio::test]
async fn test_resume_continues_saved_queue() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    // Fetched once across both runs
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            "Home",
            &[format!("{}/a", base_url), format!("{}/b", base_url)],
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html_page("A", &[format!("{}/", base_url)]))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html_page("B", &[]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = test_config(&base_url, dir.path());
    config.crawler.max_pages = Some(1);
    let first = run(config.clone(), resume()).await.expect("First run failed");
    assert_eq!(first.stop_reason, StopReason::PageLimit);
    assert_eq!(first.crawl.pages_crawled, 1);
    assert_eq!(first.queue_remaining, 2);

    // Tuning changes keep the checkpoint valid
    config.crawler.max_pages = None;
    let second = run(config, resume()).await.expect("Second run failed");
    assert!(second.resumed);
    assert_eq!(second.stop_reason, StopReason::Completed);
    assert_eq!(second.crawl.pages_crawled, 2);
    assert_eq!(second.queue_remaining, 0);
}

#[tokio::test]
async fn test_completed_crawl_resumes_to_nothing_and_fresh_recrawls() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", &[]))
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = test_config(&base_url, dir.path());

    let first = run(config.clone(), resume()).await.unwrap();
    assert_eq!(first.crawl.pages_crawled, 1);

    let resumed = run(config.clone(), resume()).await.unwrap();
    assert!(resumed.resumed);
    assert_eq!(resumed.crawl.pages_crawled, 0);
    assert_eq!(resumed.stop_reason, StopReason::Completed);

    let restarted = run(config, fresh()).await.unwrap();
    assert!(!restarted.resumed);
    assert_eq!(restarted.crawl.pages_crawled, 1);
}

#[tokio::test]
async fn test_max_pages_caps_results() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    let links: Vec<String> = (1..=5).map(|i| format!("{}/p{}", base_url, i)).collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", &links))
        .mount(&mock_server)
        .await;
    for i in 1..=5 {
        Mock::given(method("GET"))
            .and(path(format!("/p{}", i)))
            .respond_with(html_page("Leaf", &[]))
            .mount(&mock_server)
            .await;
    }

    let mut config = test_config(&base_url, dir.path());
    config.crawler.max_pages = Some(3);
    config.crawler.global_concurrency = 2;

    let mut crawler = Crawler::new(config, None).unwrap();
    let mut results = Vec::new();
    while let Some(result) = crawler.next_result().await {
        results.push(result);
    }

    assert_eq!(results.len(), 3);
    assert_eq!(crawler.stop_reason(), Some(StopReason::PageLimit));
    assert_eq!(crawler.in_flight(), 0);
    assert_eq!(results[0].url, format!("{}/", base_url));
    assert_eq!(results[0].links.len(), 5);
}

#[tokio::test]
async fn test_robots_txt_respect() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            "Home",
            &[
                format!("{}/private", base_url),
                format!("{}/public", base_url),
            ],
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(html_page("Public", &[]))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(html_page("Private", &[]))
        .expect(0) // Should never be called
        .mount(&mock_server)
        .await;

    let mut config = test_config(&base_url, dir.path());
    config.crawler.respect_robots_txt = true;

    let summary = run(config, resume()).await.expect("Crawl failed");
    assert_eq!(summary.crawl.pages_crawled, 2);
    assert_eq!(summary.crawl.robots_denied, 1);
}

#[tokio::test]
async fn test_missing_robots_txt_allows_everything() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", &[format!("{}/next", base_url)]))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/next"))
        .respond_with(html_page("Next", &[]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = test_config(&base_url, dir.path());
    config.crawler.respect_robots_txt = true;

    let summary = run(config, resume()).await.expect("Crawl failed");
    assert_eq!(summary.crawl.pages_crawled, 2);
    assert_eq!(summary.crawl.robots_denied, 0);
}

#[tokio::test]
async fn test_crawl_with_depth_limit() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", &[format!("{}/level1", base_url)]))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/level1"))
        .respond_with(html_page("Level 1", &[format!("{}/level2", base_url)]))
        .expect(1)
        .mount(&mock_server)
        .await;

    // Wiremock will automatically verify expect(0) when the mock server drops
    Mock::given(method("GET"))
        .and(path("/level2"))
        .respond_with(html_page("Level 2", &[]))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = test_config(&base_url, dir.path());
    config.crawler.depth_limit = Some(1);

    let summary = run(config, resume()).await.expect("Crawl failed");
    assert_eq!(summary.crawl.pages_crawled, 2);
}

#[tokio::test]
async fn test_content_type_handling() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            "Home",
            &[format!("{}/manual.pdf", base_url)],
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/manual.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x25, 0x50, 0x44, 0x46], "application/pdf"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&base_url, dir.path());
    let summary = run(config, resume()).await.expect("Crawl failed");

    assert_eq!(summary.crawl.pages_crawled, 1);
    assert_eq!(summary.crawl.pages_not_html, 1);
    assert_eq!(summary.crawl.pages_failed, 0);
    assert!(!dir
        .path()
        .join("site")
        .join(host_dir(&base_url))
        .join("manual.pdf")
        .exists());
}

#[tokio::test]
async fn test_zero_time_limit_admits_nothing() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", &[]))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = test_config(&base_url, dir.path());
    config.crawler.max_duration_secs = Some(0);

    let summary = run(config, resume()).await.expect("Crawl failed");
    assert_eq!(summary.stop_reason, StopReason::TimeLimit);
    assert_eq!(summary.queue_remaining, 1);
}

#[tokio::test]
async fn test_each_page_fetched_once_with_limited_concurrency() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    let home = format!("{}/", base_url);
    let b = format!("{}/b", base_url);
    let c = format!("{}/c", base_url);

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("A", &[b.clone(), c.clone()]))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html_page("B", &[home.clone(), c.clone()]))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(html_page("C", &[home.clone(), b.clone()]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = test_config(&base_url, dir.path());
    config.crawler.global_concurrency = 2;
    config.crawler.per_host_concurrency = 2;

    let mut crawler = Crawler::new(config, None).unwrap();
    let mut urls = Vec::new();
    while let Some(result) = crawler.next_result().await {
        urls.push(result.url);
    }

    assert_eq!(urls.len(), 3);
    let unique: HashSet<String> = urls.into_iter().collect();
    let expected: HashSet<String> = [home, b, c].into_iter().collect();
    assert_eq!(unique, expected);
    assert_eq!(crawler.visited(), &expected);
    assert_eq!(crawler.stop_reason(), Some(StopReason::Completed));
}

#[tokio::test]
async fn test_unchanged_page_still_yields_its_links() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();
    let home = format!("{}/", base_url);
    let child = format!("{}/child", base_url);

    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/child"))
        .respond_with(html_page("Child", &[]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = test_config(&base_url, dir.path());
    config.checkpoint.max_age_days = Some(1.0);

    // A stale record and snapshot of the home page from an earlier run
    let output_path = relative_output_path(&Url::parse(&home).unwrap());
    let snapshot = config.output.directory.join(&output_path);
    std::fs::create_dir_all(snapshot.parent().unwrap()).unwrap();
    std::fs::write(
        &snapshot,
        format!(r#"<html><body><a href="{}">child</a></body></html>"#, child),
    )
    .unwrap();

    let checkpoint = CheckpointManager::open(&config, StartMode::Resume).unwrap();
    checkpoint
        .add_page(PageRecord {
            url: home.clone(),
            content_hash: "00".repeat(32),
            last_fetched_at: "2001-01-01T00:00:00+00:00".to_string(),
            status_code: 200,
            output_path,
            etag: Some("\"v1\"".to_string()),
            last_modified: None,
        })
        .unwrap();
    checkpoint
        .save(&[CrawlTask::root(home.clone())], serde_json::json!({}))
        .unwrap();

    let mut crawler = Crawler::new(config, Some(Arc::new(checkpoint))).unwrap();
    let mut urls = Vec::new();
    while let Some(result) = crawler.next_result().await {
        urls.push(result.url);
    }

    assert_eq!(urls, vec![child]);
    let stats = crawler.stats();
    assert_eq!(stats.pages_not_modified, 1);
    assert_eq!(stats.pages_crawled, 1);
}
