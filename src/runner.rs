//! Run driver: wires the checkpoint, crawler, pipeline and snapshot writer
//!
//! [`run`] is what the binary calls. It opens the checkpoint, builds the
//! crawler (and the renderer pool when the fetch strategy needs one), feeds
//! each fetched page into the pipeline, and stops the crawl when storage runs
//! out or the operator interrupts.

use crate::checkpoint::{CheckpointManager, StartMode};
use crate::config::{Config, FetchStrategy};
use crate::crawler::{
    CrawlStats, Crawler, RenderContextFactory, RenderError, RendererPool, StopHandle, StopReason,
};
use crate::output::HtmlWriter;
use crate::pipeline::{Pipeline, PipelineStats, StorageFailure};
use crate::{FetchResult, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options that are not part of the configuration file
#[derive(Default, Clone)]
pub struct RunOptions {
    pub start_mode: StartMode,
    /// Stop the crawl gracefully on Ctrl-C
    pub handle_interrupt: bool,
    /// Source of rendering contexts for the `rendered` fetch strategy
    pub renderer_factory: Option<Arc<dyn RenderContextFactory>>,
    /// Externally owned stop handle; one is created when absent
    pub stop: Option<StopHandle>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("start_mode", &self.start_mode)
            .field("handle_interrupt", &self.handle_interrupt)
            .field("renderer_factory", &self.renderer_factory.is_some())
            .finish()
    }
}

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub crawl: CrawlStats,
    pub pipeline: PipelineStats,
    pub elapsed: Duration,
    /// True when the run continued an earlier checkpoint
    pub resumed: bool,
    pub queue_remaining: usize,
}

/// Crawls the configured site and writes every page under the output directory
pub async fn run(config: Config, options: RunOptions) -> Result<RunSummary> {
    let started = Instant::now();

    let checkpoint = if config.checkpoint.enabled {
        Some(Arc::new(CheckpointManager::open(&config, options.start_mode)?))
    } else {
        tracing::info!("Checkpointing disabled; progress will not survive a restart");
        None
    };
    let resumed = checkpoint.as_ref().is_some_and(|c| c.is_resumed());

    let renderer = start_renderer(&config, options.renderer_factory.as_deref()).await?;
    let mut crawler = match renderer {
        Some(pool) => Crawler::with_renderer(config.clone(), checkpoint.clone(), pool)?,
        None => Crawler::new(config.clone(), checkpoint.clone())?,
    };
    if let Some(stop) = options.stop {
        crawler = crawler.with_stop_handle(stop);
    }

    let writer = HtmlWriter::new(&config.output.directory);
    let pipeline: Pipeline<FetchResult> = Pipeline::start(&config.pipeline, Arc::new(writer));

    let (crawl_stats, stop_reason, queue_remaining) =
        drive(crawler, &pipeline, options.handle_interrupt).await;

    let pipeline_stats = pipeline.shutdown().await;
    // Exhaustion can surface while the last pages drain after the crawl ended
    let stop_reason = if pipeline_stats
        .storage_failures
        .contains_key(&StorageFailure::Exhausted)
    {
        StopReason::StorageExhausted
    } else {
        stop_reason
    };

    if let Some(checkpoint) = &checkpoint {
        if let Err(e) = checkpoint.close() {
            tracing::error!("Failed to close checkpoint: {}", e);
        }
    }

    let summary = RunSummary {
        stop_reason,
        crawl: crawl_stats,
        pipeline: pipeline_stats,
        elapsed: started.elapsed(),
        resumed,
        queue_remaining,
    };
    tracing::info!(
        "Run finished ({}): {} pages crawled, {} written, {} failed",
        summary.stop_reason,
        summary.crawl.pages_crawled,
        summary.pipeline.items_processed,
        summary.crawl.pages_failed + summary.pipeline.items_failed
    );
    Ok(summary)
}

async fn start_renderer(
    config: &Config,
    factory: Option<&dyn RenderContextFactory>,
) -> Result<Option<Arc<RendererPool>>> {
    if config.crawler.fetch_strategy != FetchStrategy::Rendered {
        return Ok(None);
    }
    let factory = factory.ok_or_else(|| {
        RenderError::Startup("no rendering backend configured for this build".to_string())
    })?;
    let pool = RendererPool::start(
        factory,
        config.crawler.renderer.pool_size,
        Duration::from_millis(config.crawler.renderer.navigation_timeout_ms),
    )
    .await?;
    Ok(Some(Arc::new(pool)))
}

/// Feeds crawl results into the pipeline until the crawl stops
async fn drive(
    mut crawler: Crawler,
    pipeline: &Pipeline<FetchResult>,
    handle_interrupt: bool,
) -> (CrawlStats, StopReason, usize) {
    let interrupt = handle_interrupt.then(|| {
        let handle = crawler.stop_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing in-flight pages");
                handle.stop();
            }
        })
    });

    let stop = crawler.stop_handle();
    while let Some(result) = crawler.next_result().await {
        pipeline.submit(result).await;
        if pipeline.should_abort() && !stop.is_stopped() {
            tracing::error!("Output storage exhausted, stopping the crawl");
            stop.stop();
        }
    }

    if let Some(interrupt) = interrupt {
        interrupt.abort();
    }

    let reason = crawler.stop_reason().unwrap_or(StopReason::Completed);
    (crawler.stats(), reason, crawler.queue_len())
}
