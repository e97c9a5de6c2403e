//! Fetching, redirect and retry behavior against a mock server

use crate::{html_page, test_config};
use std::time::{Duration, Instant};
use sumi_tide::checkpoint::ConditionalHeaders;
use sumi_tide::config::Config;
use sumi_tide::crawler::{build_http_client, Crawler, FetchError, HttpFetcher};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(config: &Config) -> HttpFetcher {
    let client = build_http_client(config).expect("Failed to build client");
    HttpFetcher::new(client, &config.crawler)
}

fn redirect(to: &str) -> ResponseTemplate {
    ResponseTemplate::new(302).insert_header("Location", to)
}

fn page_url(base_url: &str, page: &str) -> Url {
    Url::parse(&format!("{}{}", base_url, page)).unwrap()
}

/// Crawls until the stream ends and returns the crawler for inspection
async fn crawl_to_end(config: Config) -> (Crawler, usize) {
    let mut crawler = Crawler::new(config, None).expect("Failed to build crawler");
    let mut yielded = 0;
    while crawler.next_result().await.is_some() {
        yielded += 1;
    }
    (crawler, yielded)
}

#[tokio::test]
async fn test_redirect_is_followed() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(redirect("/new"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(html_page("New", &[]))
        .mount(&mock_server)
        .await;

    let config = test_config(&base_url, dir.path());
    let page = fetcher(&config)
        .fetch(&page_url(&base_url, "/old"), &ConditionalHeaders::default())
        .await
        .unwrap();

    assert_eq!(page.status, 200);
    assert_eq!(page.final_url.path(), "/new");
    assert!(String::from_utf8_lossy(&page.body).contains("<title>New</title>"));
}

#[tokio::test]
async fn test_redirect_loop_is_detected() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(redirect("/b"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(redirect("/a"))
        .mount(&mock_server)
        .await;

    let config = test_config(&base_url, dir.path());
    let err = fetcher(&config)
        .fetch(&page_url(&base_url, "/a"), &ConditionalHeaders::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::RedirectLoop { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_redirect_limit() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    for i in 1..=4 {
        Mock::given(method("GET"))
            .and(path(format!("/r{}", i)))
            .respond_with(redirect(&format!("/r{}", i + 1)))
            .mount(&mock_server)
            .await;
    }

    let mut config = test_config(&base_url, dir.path());
    config.crawler.max_redirects = 2;
    let err = fetcher(&config)
        .fetch(&page_url(&base_url, "/r1"), &ConditionalHeaders::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::TooManyRedirects { limit: 2 }));
}

#[tokio::test]
async fn test_conditional_request_not_modified() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(&base_url, dir.path());
    let conditional = ConditionalHeaders {
        if_none_match: Some("\"v1\"".to_string()),
        if_modified_since: None,
    };
    let err = fetcher(&config)
        .fetch(&page_url(&base_url, "/"), &conditional)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::NotModified));
}

#[tokio::test]
async fn test_validators_are_captured() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            html_page("Home", &[])
                .insert_header("ETag", "\"v2\"")
                .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
        )
        .mount(&mock_server)
        .await;

    let config = test_config(&base_url, dir.path());
    let page = fetcher(&config)
        .fetch(&page_url(&base_url, "/"), &ConditionalHeaders::default())
        .await
        .unwrap();

    assert_eq!(page.etag.as_deref(), Some("\"v2\""));
    assert_eq!(
        page.last_modified.as_deref(),
        Some("Wed, 21 Oct 2015 07:28:00 GMT")
    );
}

#[tokio::test]
async fn test_oversized_page_is_rejected() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    let body = format!("<html><body>{}</body></html>", "x".repeat(1000));
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .mount(&mock_server)
        .await;

    let config = test_config(&base_url, dir.path());
    let err = fetcher(&config)
        .with_max_body_bytes(Some(100))
        .fetch(&page_url(&base_url, "/big"), &ConditionalHeaders::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::TooLarge { limit: 100, .. }));
}

#[tokio::test]
async fn test_non_html_is_rejected() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
        .mount(&mock_server)
        .await;

    let config = test_config(&base_url, dir.path());
    let err = fetcher(&config)
        .fetch(&page_url(&base_url, "/data.json"), &ConditionalHeaders::default())
        .await
        .unwrap_err();

    match err {
        FetchError::NotHtml { content_type } => assert!(content_type.starts_with("application/json")),
        other => panic!("expected NotHtml, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    // Mounted first, so it answers the first request only
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", &[]))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (crawler, yielded) = crawl_to_end(test_config(&base_url, dir.path())).await;
    assert_eq!(yielded, 1);
    assert_eq!(crawler.stats().pages_failed, 0);
}

#[tokio::test]
async fn test_persistent_server_error_gives_up() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    // One attempt plus two retries
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let (crawler, yielded) = crawl_to_end(test_config(&base_url, dir.path())).await;
    assert_eq!(yielded, 0);
    let stats = crawler.stats();
    assert_eq!(stats.pages_failed, 1);
    assert_eq!(stats.error_counts.get("http_500"), Some(&1));
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (crawler, yielded) = crawl_to_end(test_config(&base_url, dir.path())).await;
    assert_eq!(yielded, 0);
    assert_eq!(crawler.stats().error_counts.get("http_404"), Some(&1));
}

#[tokio::test]
async fn test_retry_after_is_honored() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", &[]))
        .mount(&mock_server)
        .await;

    let started = Instant::now();
    let (_, yielded) = crawl_to_end(test_config(&base_url, dir.path())).await;
    assert_eq!(yielded, 1);
    assert!(started.elapsed() >= Duration::from_millis(950));
}
