//! Per-URL fetch work
//!
//! [`FetchContext::process`] handles one admitted URL from start to finish:
//! freshness check, robots.txt, admission permits, rate limiting, fetching
//! with retries, link and asset extraction, and the checkpoint record. Every
//! failure is absorbed here and turned into statistics.

use crate::checkpoint::{
    compute_content_hash, CheckpointManager, ConditionalHeaders, CrawlTask, PageRecord,
};
use crate::config::FetchStrategy;
use crate::crawler::fetcher::{FetchError, FetchedPage, HttpFetcher, RetryPolicy};
use crate::crawler::governor::Governor;
use crate::crawler::rate_limiter::RateLimiter;
use crate::crawler::renderer::RendererPool;
use crate::crawler::stats::CrawlStats;
use crate::output::relative_output_path;
use crate::robots::RobotsChecker;
use crate::rules::{extract_assets, LinkExtractor, Rules};
use crate::url::{host_key, normalize_url};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use url::Url;

/// A fetched HTML page on its way to the processing pipeline
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Normalized URL that was admitted
    pub url: String,
    /// URL the content was served from after redirects
    pub final_url: String,
    pub html: String,
    pub status_code: u16,
    pub content_type: String,
    /// Links found on the page, resolved to absolute URLs
    pub links: Vec<String>,
    pub assets: Vec<String>,
    /// SHA-256 of the raw body
    pub content_hash: String,
    /// Snapshot location relative to the output directory
    pub output_path: String,
    /// Pending queue length when the result was yielded
    pub queue_size: usize,
}

/// What one fetch task hands back to the orchestrator
#[derive(Debug)]
pub(crate) struct FetchOutcome {
    pub task: CrawlTask,
    pub result: Option<FetchResult>,
    pub discovered: Vec<CrawlTask>,
}

impl FetchOutcome {
    pub fn empty(task: CrawlTask) -> Self {
        Self {
            task,
            result: None,
            discovered: Vec::new(),
        }
    }
}

/// Shared collaborators for all fetch tasks of one crawl
pub(crate) struct FetchContext {
    pub fetcher: HttpFetcher,
    pub renderer: Option<Arc<RendererPool>>,
    pub strategy: FetchStrategy,
    pub robots: Option<RobotsChecker>,
    pub governor: Governor,
    pub rate_limiter: RateLimiter,
    pub retry: RetryPolicy,
    pub rules: Arc<dyn Rules>,
    pub extractor: Arc<dyn LinkExtractor>,
    pub checkpoint: Option<Arc<CheckpointManager>>,
    pub conditional_requests: bool,
    /// Output directory holding earlier snapshots
    pub snapshot_root: PathBuf,
    pub stats: Mutex<CrawlStats>,
}

/// Status reported to the adaptive rate limiter for one attempt
///
/// `None` means no response arrived. Size and content-type rejections follow a
/// successful response.
fn feedback_status(outcome: &Result<FetchedPage, FetchError>) -> Option<u16> {
    match outcome {
        Ok(page) => Some(page.status),
        Err(FetchError::Status { status, .. }) => Some(*status),
        Err(FetchError::NotModified) => Some(304),
        Err(error) if error.is_transport() => None,
        Err(_) => Some(200),
    }
}

impl FetchContext {
    pub fn stats(&self) -> MutexGuard<'_, CrawlStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn process(&self, task: CrawlTask) -> FetchOutcome {
        let url = match Url::parse(&task.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("Skipping unparsable URL {}: {}", task.url, e);
                self.stats().record_error("invalid_url");
                return FetchOutcome::empty(task);
            }
        };

        if let Some(checkpoint) = &self.checkpoint {
            if !checkpoint.should_redownload(&task.url) {
                tracing::debug!("Skipping fresh page {}", task.url);
                self.stats().pages_skipped_fresh += 1;
                return FetchOutcome::empty(task);
            }
        }

        if let Some(robots) = &self.robots {
            if !robots.is_allowed(&url).await {
                tracing::info!("URL {} disallowed by robots.txt", task.url);
                self.stats().robots_denied += 1;
                return FetchOutcome::empty(task);
            }
        }

        let host = host_key(&url).unwrap_or_default();
        let _permit = match self.governor.acquire(&host).await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!("Admission closed for {}: {}", task.url, e);
                self.stats().record_error("admission");
                return FetchOutcome::empty(task);
            }
        };

        let page = match self.fetch_with_retry(&url).await {
            Ok(page) => page,
            Err(FetchError::NotModified) => {
                tracing::debug!("{} not modified", task.url);
                if let Some(checkpoint) = &self.checkpoint {
                    if let Err(e) = checkpoint.touch_page(&task.url) {
                        tracing::warn!("Failed to refresh record for {}: {}", task.url, e);
                    }
                }
                self.stats().pages_not_modified += 1;
                let discovered = self.links_from_snapshot(&task, &url).await;
                return FetchOutcome {
                    task,
                    result: None,
                    discovered,
                };
            }
            Err(FetchError::NotHtml { content_type }) => {
                tracing::debug!("Skipping {} ({})", task.url, content_type);
                self.stats().pages_not_html += 1;
                return FetchOutcome::empty(task);
            }
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", task.url, e);
                self.stats().record_error(e.kind());
                return FetchOutcome::empty(task);
            }
        };

        self.complete(task, &url, page)
    }

    async fn fetch_with_retry(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let conditional = match (&self.checkpoint, self.conditional_requests) {
            (Some(checkpoint), true) => checkpoint.conditional_headers(url.as_str()),
            _ => ConditionalHeaders::default(),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.acquire().await;

            let started = Instant::now();
            let outcome = self.fetch_once(url, &conditional).await;
            self.rate_limiter
                .record_response(started.elapsed(), feedback_status(&outcome))
                .await;

            match outcome {
                Err(e) if e.is_retryable() && attempt <= self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt, &e);
                    tracing::debug!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempt,
                        url,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn fetch_once(
        &self,
        url: &Url,
        conditional: &ConditionalHeaders,
    ) -> Result<FetchedPage, FetchError> {
        match (self.strategy, &self.renderer) {
            (FetchStrategy::Rendered, Some(renderer)) => {
                let rendered = renderer.render(url).await?;
                if rendered.status >= 400 {
                    return Err(FetchError::Status {
                        status: rendered.status,
                        retry_after: None,
                    });
                }
                Ok(FetchedPage {
                    final_url: rendered.final_url,
                    status: rendered.status,
                    content_type: "text/html".to_string(),
                    body: rendered.html.into_bytes(),
                    etag: None,
                    last_modified: None,
                })
            }
            _ => self.fetcher.fetch(url, conditional).await,
        }
    }

    /// Normalizes `links` and keeps those the rules accept
    fn follow_links<'a>(
        &self,
        task: &CrawlTask,
        url: &Url,
        links: impl IntoIterator<Item = &'a String>,
    ) -> Vec<CrawlTask> {
        let mut discovered = Vec::new();
        for link in links {
            let normalized = match normalize_url(link) {
                Ok(normalized) => normalized,
                Err(e) => {
                    tracing::trace!("Dropping link {}: {}", link, e);
                    continue;
                }
            };
            if self.rules.should_follow(&normalized, Some(url)) {
                discovered.push(CrawlTask::new(normalized.to_string(), Some(task.url.clone())));
            }
        }
        discovered
    }

    /// Links of an unchanged page, read back from its stored snapshot
    ///
    /// A missing record or snapshot yields no links.
    async fn links_from_snapshot(&self, task: &CrawlTask, url: &Url) -> Vec<CrawlTask> {
        let record = match &self.checkpoint {
            Some(checkpoint) => match checkpoint.get_page(&task.url) {
                Ok(Some(record)) => record,
                Ok(None) => return Vec::new(),
                Err(e) => {
                    tracing::warn!("Failed to read record for {}: {}", task.url, e);
                    return Vec::new();
                }
            },
            None => return Vec::new(),
        };

        let path = self.snapshot_root.join(&record.output_path);
        let html = match tokio::fs::read_to_string(&path).await {
            Ok(html) => html,
            Err(e) => {
                tracing::debug!(
                    "No snapshot for unchanged page {} at {}: {}",
                    task.url,
                    path.display(),
                    e
                );
                return Vec::new();
            }
        };

        let links = self.extractor.extract_links(&html, url);
        self.follow_links(task, url, &links)
    }

    /// Extracts links and assets, records the page and builds the result
    fn complete(&self, task: CrawlTask, url: &Url, page: FetchedPage) -> FetchOutcome {
        let content_hash = compute_content_hash(&page.body);
        let html = String::from_utf8_lossy(&page.body).into_owned();

        let links = self.extractor.extract_links(&html, &page.final_url);
        let assets = extract_assets(&html, &page.final_url);
        let discovered = self.follow_links(&task, url, &links);

        let output_path = relative_output_path(url);

        if let Some(checkpoint) = &self.checkpoint {
            let record = PageRecord {
                url: task.url.clone(),
                content_hash: content_hash.clone(),
                last_fetched_at: Utc::now().to_rfc3339(),
                status_code: page.status,
                output_path: output_path.clone(),
                etag: page.etag.clone(),
                last_modified: page.last_modified.clone(),
            };
            if let Err(e) = checkpoint.add_page(record) {
                tracing::warn!("Failed to record {} in checkpoint: {}", task.url, e);
            }
        }

        {
            let mut stats = self.stats();
            stats.pages_crawled += 1;
            stats.total_bytes += page.body.len() as u64;
            stats.assets_discovered += assets.len() as u64;
        }

        tracing::debug!(
            "Fetched {} ({} bytes, {} links, {} followed)",
            task.url,
            page.body.len(),
            links.len(),
            discovered.len()
        );

        let result = FetchResult {
            url: task.url.clone(),
            final_url: page.final_url.to_string(),
            html,
            status_code: page.status,
            content_type: page.content_type,
            links: links.into_iter().collect(),
            assets,
            content_hash,
            output_path,
            queue_size: 0,
        };

        FetchOutcome {
            task,
            result: Some(result),
            discovered,
        }
    }
}
