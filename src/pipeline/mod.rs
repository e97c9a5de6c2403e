//! Producer/consumer handoff between the crawler and page processing
//!
//! The crawler submits each [`FetchResult`] into a [`MemoryAwareQueue`]; a
//! fixed pool of workers drains it through a [`Processor`]. A failing or
//! panicking processor call is counted and the worker moves on. Storage
//! failures are classified, and an exhausted disk raises the abort flag so the
//! run driver can stop the crawl.

mod queue;

pub use queue::{MemoryAwareQueue, SizeEstimate};

use crate::config::PipelineConfig;
use crate::crawler::FetchResult;
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinSet;

/// Overhead applied to the HTML length for the other fields of a result
const RESULT_OVERHEAD_FACTOR: f64 = 1.05;

/// Keeps only the most recent worker error messages
const MAX_WORKER_ERRORS: usize = 100;

/// ENOSPC on Linux and macOS
const ENOSPC: i32 = 28;
/// EDQUOT on Linux
const EDQUOT: i32 = 122;

impl SizeEstimate for FetchResult {
    fn estimated_size(&self) -> usize {
        (self.html.len() as f64 * RESULT_OVERHEAD_FACTOR) as usize
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Class of a storage failure reported by a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFailure {
    /// Disk full or quota exceeded; the run should stop
    Exhausted,
    PermissionDenied,
    Io,
}

impl StorageFailure {
    pub fn classify(error: &std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::StorageFull
            || matches!(error.raw_os_error(), Some(ENOSPC) | Some(EDQUOT))
        {
            StorageFailure::Exhausted
        } else if error.kind() == std::io::ErrorKind::PermissionDenied {
            StorageFailure::PermissionDenied
        } else {
            StorageFailure::Io
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageFailure::Exhausted => "exhausted",
            StorageFailure::PermissionDenied => "permission_denied",
            StorageFailure::Io => "io",
        }
    }
}

/// Downstream work performed on each item
#[async_trait]
pub trait Processor<T>: Send + Sync {
    async fn process(&self, item: T) -> Result<(), ProcessError>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub items_queued: u64,
    pub items_processed: u64,
    pub items_failed: u64,
    pub max_queue_depth: usize,
    pub current_queue_bytes: usize,
    pub max_queue_bytes: usize,
    /// Most recent failures, prefixed with the worker number
    pub worker_errors: Vec<String>,
    pub storage_failures: BTreeMap<StorageFailure, u64>,
}

impl PipelineStats {
    fn record_failure(&mut self, worker: usize, message: String) {
        self.items_failed += 1;
        if self.worker_errors.len() >= MAX_WORKER_ERRORS {
            self.worker_errors.remove(0);
        }
        self.worker_errors.push(format!("worker {}: {}", worker, message));
    }
}

struct Shared<T> {
    queue: MemoryAwareQueue<T>,
    processor: Arc<dyn Processor<T>>,
    stats: Mutex<PipelineStats>,
    abort: AtomicBool,
}

impl<T> Shared<T> {
    fn stats(&self) -> MutexGuard<'_, PipelineStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded queue plus a fixed pool of processing workers
pub struct Pipeline<T> {
    shared: Arc<Shared<T>>,
    workers: JoinSet<()>,
    worker_count: usize,
}

impl<T: SizeEstimate + Send + 'static> Pipeline<T> {
    /// Starts `config.workers` workers draining a queue bounded by the config
    pub fn start(config: &PipelineConfig, processor: Arc<dyn Processor<T>>) -> Self {
        let max_bytes = (config.queue_max_memory_mb as usize).saturating_mul(1024 * 1024);
        let shared = Arc::new(Shared {
            queue: MemoryAwareQueue::new(config.queue_max_items, max_bytes),
            processor,
            stats: Mutex::new(PipelineStats::default()),
            abort: AtomicBool::new(false),
        });

        let worker_count = config.workers.max(1);
        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            workers.spawn(run_worker(id, shared.clone()));
        }
        tracing::debug!("Started {} pipeline workers", worker_count);

        Self {
            shared,
            workers,
            worker_count,
        }
    }

    /// Queues an item, waiting while the queue is full
    pub async fn submit(&self, item: T) {
        self.shared.queue.put(item).await;
        let depth = self.shared.queue.len();
        let mut stats = self.shared.stats();
        stats.items_queued += 1;
        stats.max_queue_depth = stats.max_queue_depth.max(depth);
    }

    /// True once a worker hit exhausted storage
    pub fn should_abort(&self) -> bool {
        self.shared.abort.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PipelineStats {
        let mut stats = self.shared.stats().clone();
        stats.current_queue_bytes = self.shared.queue.current_bytes();
        stats.max_queue_bytes = self.shared.queue.peak_bytes();
        stats.max_queue_depth = stats.max_queue_depth.max(self.shared.queue.peak_items());
        stats
    }

    /// Sends one poison pill per worker and waits for all of them to exit
    ///
    /// Items queued before the call are still processed.
    pub async fn shutdown(mut self) -> PipelineStats {
        for _ in 0..self.worker_count {
            self.shared.queue.put_poison_pill();
        }
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Pipeline worker ended abnormally: {}", e);
            }
        }
        let stats = self.stats();
        tracing::debug!(
            "Pipeline shut down: {} processed, {} failed",
            stats.items_processed,
            stats.items_failed
        );
        stats
    }
}

async fn run_worker<T: SizeEstimate + Send + 'static>(id: usize, shared: Arc<Shared<T>>) {
    while let Some(item) = shared.queue.get().await {
        let outcome = AssertUnwindSafe(shared.processor.process(item))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => shared.stats().items_processed += 1,
            Ok(Err(ProcessError::Io(e))) => {
                let class = StorageFailure::classify(&e);
                if class == StorageFailure::Exhausted {
                    tracing::error!("Storage exhausted: {}", e);
                    shared.abort.store(true, Ordering::SeqCst);
                } else {
                    tracing::warn!("Worker {} failed to process item: {}", id, e);
                }
                let mut stats = shared.stats();
                *stats.storage_failures.entry(class).or_insert(0) += 1;
                stats.record_failure(id, format!("{} ({})", e, class.as_str()));
            }
            Ok(Err(e)) => {
                tracing::warn!("Worker {} failed to process item: {}", id, e);
                shared.stats().record_failure(id, e.to_string());
            }
            Err(_) => {
                tracing::error!("Worker {} panicked while processing an item", id);
                shared.stats().record_failure(id, "panicked".to_string());
            }
        }
    }
    tracing::trace!("Worker {} stopped", id);
}
