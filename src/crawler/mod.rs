//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - Token-bucket rate limiting, optionally adaptive
//! - Global and per-host admission control
//! - HTTP fetching with retry and redirect handling
//! - Pooled rendering for script-heavy pages
//! - Per-URL fetch work and overall crawl orchestration

mod fetcher;
mod governor;
mod orchestrator;
mod rate_limiter;
mod renderer;
mod stats;
mod worker;

pub use fetcher::{
    build_http_client, is_html_content_type, parse_retry_after, FetchError, FetchedPage,
    HttpFetcher, RetryPolicy,
};
pub use governor::{Governor, GovernorPermit};
pub use orchestrator::{Crawler, StopHandle, StopReason};
pub use rate_limiter::RateLimiter;
pub use renderer::{
    PooledContext, RenderContext, RenderContextFactory, RenderError, RenderedPage, RendererPool,
};
pub use stats::CrawlStats;
pub use worker::FetchResult;
