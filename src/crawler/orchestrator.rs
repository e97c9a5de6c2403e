//! Crawl orchestration
//!
//! The [`Crawler`] owns the FIFO pending queue and the visited set. It admits
//! fetch tasks up to the global concurrency cap, reaps finished ones, and
//! yields their results in completion order. A page limit, time limit or stop
//! request halts admission; fetches already running are drained so their
//! results and checkpoint records are not lost.

use crate::checkpoint::{CheckpointManager, CrawlTask, ResumeState};
use crate::config::{Config, FetchStrategy};
use crate::crawler::fetcher::{build_http_client, HttpFetcher, RetryPolicy};
use crate::crawler::governor::Governor;
use crate::crawler::rate_limiter::RateLimiter;
use crate::crawler::renderer::{RenderError, RendererPool};
use crate::crawler::stats::CrawlStats;
use crate::crawler::worker::{FetchContext, FetchOutcome, FetchResult};
use crate::robots::RobotsChecker;
use crate::rules::{LinkExtractor, Rules, RulesEngine, SelectorLinkExtractor};
use crate::url::normalize_url;
use crate::TideError;
use futures::{FutureExt, Stream};
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Results between progress log lines
const PROGRESS_INTERVAL: usize = 10;

/// Why a crawl stopped admitting work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Queue drained with nothing in flight
    Completed,
    PageLimit,
    TimeLimit,
    /// Stopped through a [`StopHandle`]
    Interrupted,
    /// Downstream storage ran out of space
    StorageExhausted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StopReason::Completed => "completed",
            StopReason::PageLimit => "page limit reached",
            StopReason::TimeLimit => "time limit reached",
            StopReason::Interrupted => "interrupted",
            StopReason::StorageExhausted => "storage exhausted",
        };
        f.write_str(text)
    }
}

/// Cloneable handle that asks a running crawl to stop admitting work
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives one crawl run
pub struct Crawler {
    context: Arc<FetchContext>,
    checkpoint: Option<Arc<CheckpointManager>>,
    global_concurrency: usize,
    max_pages: Option<usize>,
    max_duration: Option<Duration>,
    checkpoint_interval: usize,

    queue: VecDeque<CrawlTask>,
    /// URLs currently in `queue`
    queued: HashSet<String>,
    visited: HashSet<String>,
    in_flight: HashMap<String, CrawlTask>,
    tasks: JoinSet<FetchOutcome>,

    stop: StopHandle,
    stop_reason: Option<StopReason>,
    started: Option<Instant>,
    yielded: usize,
    since_save: usize,
    finished: bool,
}

impl Crawler {
    /// Builds a crawler for the plain HTTP fetch strategy
    ///
    /// With a checkpoint, the visited set and queue are restored from it;
    /// start URLs are seeded only when it holds no page records.
    pub fn new(config: Config, checkpoint: Option<Arc<CheckpointManager>>) -> Result<Self, TideError> {
        if config.crawler.fetch_strategy == FetchStrategy::Rendered {
            return Err(RenderError::Startup(
                "the rendered fetch strategy needs a renderer pool".to_string(),
            )
            .into());
        }
        Self::build(config, checkpoint, None)
    }

    /// Builds a crawler that fetches through `renderer` when the configured
    /// strategy is `rendered`
    pub fn with_renderer(
        config: Config,
        checkpoint: Option<Arc<CheckpointManager>>,
        renderer: Arc<RendererPool>,
    ) -> Result<Self, TideError> {
        Self::build(config, checkpoint, Some(renderer))
    }

    fn build(
        config: Config,
        checkpoint: Option<Arc<CheckpointManager>>,
        renderer: Option<Arc<RendererPool>>,
    ) -> Result<Self, TideError> {
        let client = build_http_client(&config)?;
        let crawler = &config.crawler;

        let robots = crawler
            .respect_robots_txt
            .then(|| RobotsChecker::new(client.clone(), config.user_agent.crawler_name.clone()));
        let rules: Arc<dyn Rules> = Arc::new(RulesEngine::from_config(&config)?);
        let extractor: Arc<dyn LinkExtractor> =
            Arc::new(SelectorLinkExtractor::new(&crawler.link_selectors)?);

        let context = FetchContext {
            fetcher: HttpFetcher::new(client, crawler),
            renderer,
            strategy: crawler.fetch_strategy,
            robots,
            governor: Governor::new(crawler.global_concurrency, crawler.per_host_concurrency),
            rate_limiter: RateLimiter::from_config(crawler),
            retry: RetryPolicy::from_config(crawler),
            rules,
            extractor,
            checkpoint: checkpoint.clone(),
            conditional_requests: crawler.conditional_requests,
            snapshot_root: config.output.directory.clone(),
            stats: Mutex::new(CrawlStats::default()),
        };

        let resume = match &checkpoint {
            Some(checkpoint) => checkpoint.resume_state()?,
            None => ResumeState::default(),
        };

        let mut seeds = Vec::new();
        if resume.is_cold_start() {
            for start_url in &config.site.start_urls {
                seeds.push(CrawlTask::root(normalize_url(start_url)?.to_string()));
            }
        } else {
            tracing::info!(
                "Resuming with {} recorded pages and {} queued URLs",
                resume.page_count,
                resume.queue.len()
            );
        }
        seeds.extend(resume.queue);

        let mut crawler = Self {
            context: Arc::new(context),
            checkpoint,
            global_concurrency: config.crawler.global_concurrency.max(1),
            max_pages: config.crawler.max_pages,
            max_duration: config.crawler.max_duration_secs.map(Duration::from_secs),
            checkpoint_interval: config.checkpoint.interval_pages.max(1),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            visited: resume.visited,
            in_flight: HashMap::new(),
            tasks: JoinSet::new(),
            stop: StopHandle::default(),
            stop_reason: None,
            started: None,
            yielded: 0,
            since_save: 0,
            finished: false,
        };
        for task in seeds {
            crawler.enqueue(task);
        }

        Ok(crawler)
    }

    fn enqueue(&mut self, task: CrawlTask) {
        if self.visited.contains(&task.url) || !self.queued.insert(task.url.clone()) {
            return;
        }
        self.queue.push_back(task);
    }

    /// Handle for stopping admission from another task
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Makes the crawl obey a handle created elsewhere
    pub fn with_stop_handle(mut self, handle: StopHandle) -> Self {
        self.stop = handle;
        self
    }

    /// URLs admitted so far, including those restored from a checkpoint
    pub fn visited(&self) -> &HashSet<String> {
        &self.visited
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn stats(&self) -> CrawlStats {
        self.context.stats().clone()
    }

    /// Why admission stopped; `None` while the crawl is still running
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Pending work in resume order: running fetches first, then the queue
    pub fn queue_snapshot(&self) -> Vec<CrawlTask> {
        let mut snapshot: Vec<CrawlTask> = self.in_flight.values().cloned().collect();
        snapshot.sort_by(|a, b| a.url.cmp(&b.url));
        snapshot.extend(self.queue.iter().cloned());
        snapshot
    }

    /// Checks the stop conditions, recording the first one that fires
    fn should_stop(&mut self) -> bool {
        if self.stop_reason.is_some() {
            return true;
        }

        let reason = if self.stop.is_stopped() {
            Some(StopReason::Interrupted)
        } else if self
            .max_duration
            .zip(self.started)
            .is_some_and(|(limit, started)| started.elapsed() >= limit)
        {
            Some(StopReason::TimeLimit)
        } else if self
            .max_pages
            .is_some_and(|limit| self.context.stats().pages_crawled as usize >= limit)
        {
            Some(StopReason::PageLimit)
        } else {
            None
        };

        if let Some(reason) = reason {
            tracing::info!(
                "Stopping admission ({}), draining {} in-flight fetches",
                reason,
                self.tasks.len()
            );
            self.stop_reason = Some(reason);
            return true;
        }
        false
    }

    /// Number of new fetches that may start now
    fn admission_capacity(&self) -> usize {
        let slots = self.global_concurrency.saturating_sub(self.tasks.len());
        match self.max_pages {
            Some(limit) => {
                let crawled = self.context.stats().pages_crawled as usize;
                slots.min(limit.saturating_sub(crawled + self.tasks.len()))
            }
            None => slots,
        }
    }

    fn admit(&mut self) {
        let mut capacity = self.admission_capacity();
        while capacity > 0 {
            let Some(task) = self.queue.pop_front() else {
                break;
            };
            self.queued.remove(&task.url);
            if !self.visited.insert(task.url.clone()) {
                continue;
            }

            self.in_flight.insert(task.url.clone(), task.clone());
            let context = self.context.clone();
            self.tasks.spawn(async move {
                let fallback = task.clone();
                match AssertUnwindSafe(context.process(task)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::error!("Fetch task for {} panicked", fallback.url);
                        context.stats().record_error("panic");
                        FetchOutcome::empty(fallback)
                    }
                }
            });
            capacity -= 1;
        }
    }

    /// Folds a finished task back into the traversal state
    fn reap(&mut self, outcome: FetchOutcome) -> Option<FetchResult> {
        self.in_flight.remove(&outcome.task.url);
        for task in outcome.discovered {
            self.enqueue(task);
        }

        let mut result = outcome.result?;
        result.queue_size = self.queue.len();
        self.yielded += 1;
        self.since_save += 1;

        if self.yielded % PROGRESS_INTERVAL == 0 {
            let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
            let rate = self.yielded as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
            tracing::info!(
                "Progress: {} pages crawled, {} queued, {} in flight, {:.2} pages/sec",
                self.yielded,
                self.queue.len(),
                self.tasks.len(),
                rate
            );
        }

        if self.since_save >= self.checkpoint_interval {
            self.save_checkpoint();
        }

        Some(result)
    }

    fn save_checkpoint(&mut self) {
        self.since_save = 0;
        let Some(checkpoint) = &self.checkpoint else {
            return;
        };
        let snapshot = self.queue_snapshot();
        let stats = self.context.stats().to_json();
        if let Err(e) = checkpoint.save(&snapshot, stats) {
            tracing::error!("Failed to save checkpoint: {}", e);
        }
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let reason = *self.stop_reason.get_or_insert(StopReason::Completed);
        self.save_checkpoint();

        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        tracing::info!(
            "Crawl {}: {} pages crawled in {:?}, {} left in queue",
            reason,
            self.yielded,
            elapsed,
            self.queue.len()
        );
    }

    /// Runs the crawl until the next page is fetched
    ///
    /// Returns `None` once the queue is drained and nothing is in flight, or
    /// once a stop condition fired and every in-flight fetch has finished.
    pub async fn next_result(&mut self) -> Option<FetchResult> {
        if self.finished {
            return None;
        }
        self.started.get_or_insert_with(Instant::now);

        loop {
            if !self.should_stop() {
                self.admit();
            }

            if self.tasks.is_empty() {
                self.finish();
                return None;
            }

            match self.tasks.join_next().await {
                Some(Ok(outcome)) => {
                    if let Some(result) = self.reap(outcome) {
                        return Some(result);
                    }
                }
                Some(Err(e)) => tracing::error!("Fetch task failed to complete: {}", e),
                None => {}
            }
        }
    }

    /// Consumes the crawler into a stream of results
    pub fn crawl(self) -> impl Stream<Item = FetchResult> {
        futures::stream::unfold(self, |mut crawler| async move {
            crawler
                .next_result()
                .await
                .map(|result| (result, crawler))
        })
    }
}
