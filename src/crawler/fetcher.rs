//! HTTP fetcher implementation
//!
//! This module performs single fetch attempts for the crawler:
//! - Building the HTTP client with the configured user agent and timeouts
//! - Following redirects manually with loop and hop-count detection
//! - Attaching conditional request headers
//! - Rejecting oversized and non-HTML responses
//! - Classifying failures so the caller can decide whether to retry

use crate::checkpoint::ConditionalHeaders;
use crate::config::{Config, CrawlerConfig};
use crate::crawler::RenderError;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{
    HeaderMap, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, LOCATION,
    RETRY_AFTER,
};
use reqwest::{redirect::Policy, Client, Response, StatusCode};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Why a single fetch attempt produced no page
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}")]
    Status {
        status: u16,
        /// Delay requested by the server through `Retry-After`
        retry_after: Option<Duration>,
    },

    #[error("not modified")]
    NotModified,

    #[error("redirect loop at {url}")]
    RedirectLoop { url: String },

    #[error("more than {limit} redirects")]
    TooManyRedirects { limit: usize },

    #[error("invalid redirect: {0}")]
    BadRedirect(String),

    #[error("response of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("not HTML: {content_type}")]
    NotHtml { content_type: String },

    #[error("render failed: {0}")]
    Render(#[from] RenderError),
}

impl FetchError {
    /// Short stable label used as the key in error statistics
    pub fn kind(&self) -> String {
        match self {
            FetchError::Timeout => "timeout".to_string(),
            FetchError::Connect(_) => "connect".to_string(),
            FetchError::Network(_) => "network".to_string(),
            FetchError::Status { status, .. } => format!("http_{}", status),
            FetchError::NotModified => "not_modified".to_string(),
            FetchError::RedirectLoop { .. } => "redirect_loop".to_string(),
            FetchError::TooManyRedirects { .. } => "too_many_redirects".to_string(),
            FetchError::BadRedirect(_) => "bad_redirect".to_string(),
            FetchError::TooLarge { .. } => "too_large".to_string(),
            FetchError::NotHtml { .. } => "not_html".to_string(),
            FetchError::Render(_) => "render".to_string(),
        }
    }

    /// Transient failures: throttling, server errors, timeouts and connection failures
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connect(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Render(RenderError::Timeout { .. }) => true,
            _ => false,
        }
    }

    /// True when no HTTP response was received
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout
                | FetchError::Connect(_)
                | FetchError::Network(_)
                | FetchError::Render(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if error.is_connect() {
        FetchError::Connect(error.to_string())
    } else {
        FetchError::Network(error.to_string())
    }
}

/// A successfully retrieved HTML response
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after following redirects
    pub final_url: Url,
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Builds an HTTP client with proper configuration
///
/// Redirects are disabled at the client level and followed by
/// [`HttpFetcher`] so loops and hop counts can be reported.
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.header_value())
        .timeout(Duration::from_secs(config.crawler.request_timeout_secs))
        .connect_timeout(Duration::from_secs(config.crawler.connect_timeout_secs))
        .redirect(Policy::none())
        .gzip(true)
        .brotli(true)
        .build()
}

/// Retry timing for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff: f64,
    pub jitter: f64,
    pub max_retry_after: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            backoff: config.retry_backoff,
            jitter: config.retry_jitter,
            max_retry_after: Duration::from_secs(config.max_retry_after_secs),
        }
    }

    /// Exponential backoff for the given 1-based attempt, with random jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.base_delay.as_secs_f64() * self.backoff.powi(exponent);
        let spread = if self.jitter > 0.0 {
            rand::rng().random_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        Duration::try_from_secs_f64((base * (1.0 + spread)).max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Delay before retrying after `error`
    ///
    /// A server-provided `Retry-After` wins over backoff, capped at
    /// `max_retry_after`.
    pub fn delay_for(&self, attempt: u32, error: &FetchError) -> Duration {
        match error.retry_after() {
            Some(requested) => requested.min(self.max_retry_after),
            None => self.backoff_delay(attempt),
        }
    }
}

/// Parses a `Retry-After` value in delta-seconds or HTTP-date form
///
/// A date in the past yields a zero delay.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc).signed_duration_since(Utc::now());
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// True for content types the crawler converts
pub fn is_html_content_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("text/html") || content_type.contains("application/xhtml+xml")
}

/// Single-attempt HTTP GET with manual redirect handling
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_redirects: usize,
    max_body_bytes: Option<u64>,
}

impl HttpFetcher {
    pub fn new(client: Client, config: &CrawlerConfig) -> Self {
        Self {
            client,
            max_redirects: config.max_redirects,
            max_body_bytes: config.max_page_size_mb.map(|mb| mb * 1024 * 1024),
        }
    }

    /// Overrides the body size limit in bytes
    pub fn with_max_body_bytes(mut self, limit: Option<u64>) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetches `url` once, following redirects
    ///
    /// Conditional headers are sent on the first request only; a redirect
    /// target is a different resource.
    pub async fn fetch(
        &self,
        url: &Url,
        conditional: &ConditionalHeaders,
    ) -> Result<FetchedPage, FetchError> {
        let mut current = url.clone();
        let mut seen = HashSet::from([current.to_string()]);

        for hop in 0..=self.max_redirects {
            let mut request = self.client.get(current.clone());
            if hop == 0 {
                if let Some(etag) = &conditional.if_none_match {
                    request = request.header(IF_NONE_MATCH, etag.as_str());
                }
                if let Some(modified) = &conditional.if_modified_since {
                    request = request.header(IF_MODIFIED_SINCE, modified.as_str());
                }
            }

            let response = request.send().await.map_err(classify_reqwest_error)?;
            let status = response.status();

            if status == StatusCode::NOT_MODIFIED {
                return Err(FetchError::NotModified);
            }

            if status.is_redirection() {
                let next = self.redirect_target(&current, &response)?;
                tracing::debug!("Redirect {} -> {}", current, next);
                if !seen.insert(next.to_string()) {
                    return Err(FetchError::RedirectLoop {
                        url: next.to_string(),
                    });
                }
                current = next;
                continue;
            }

            if !status.is_success() {
                let retry_after =
                    header_string(response.headers(), RETRY_AFTER).and_then(|v| parse_retry_after(&v));
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    retry_after,
                });
            }

            return self.read_page(current, response).await;
        }

        Err(FetchError::TooManyRedirects {
            limit: self.max_redirects,
        })
    }

    fn redirect_target(&self, current: &Url, response: &Response) -> Result<Url, FetchError> {
        let location = header_string(response.headers(), LOCATION).ok_or_else(|| {
            FetchError::BadRedirect(format!(
                "{} without Location header",
                response.status().as_u16()
            ))
        })?;

        let next = current
            .join(&location)
            .map_err(|e| FetchError::BadRedirect(format!("{}: {}", location, e)))?;

        match next.scheme() {
            "http" | "https" => Ok(next),
            other => Err(FetchError::BadRedirect(format!(
                "unsupported scheme {}",
                other
            ))),
        }
    }

    async fn read_page(&self, final_url: Url, mut response: Response) -> Result<FetchedPage, FetchError> {
        let headers = response.headers();
        let content_type = header_string(headers, CONTENT_TYPE).unwrap_or_default();
        let etag = header_string(headers, ETAG);
        let last_modified = header_string(headers, LAST_MODIFIED);

        if !is_html_content_type(&content_type) {
            return Err(FetchError::NotHtml { content_type });
        }

        if let (Some(limit), Some(declared)) = (self.max_body_bytes, response.content_length()) {
            if declared > limit {
                return Err(FetchError::TooLarge {
                    size: declared,
                    limit,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify_reqwest_error)? {
            body.extend_from_slice(&chunk);
            if let Some(limit) = self.max_body_bytes {
                if body.len() as u64 > limit {
                    return Err(FetchError::TooLarge {
                        size: body.len() as u64,
                        limit,
                    });
                }
            }
        }

        Ok(FetchedPage {
            final_url,
            status: response.status().as_u16(),
            content_type,
            body,
            etag,
            last_modified,
        })
    }
}
