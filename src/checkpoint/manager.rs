//! Checkpoint lifecycle: open, resume decision, periodic saves, close

use crate::checkpoint::{
    create_backend, is_due, CheckpointMetadata, CheckpointResult, CrawlTask, PageRecord, StateBackend,
    CHECKPOINT_VERSION,
};
use crate::config::{compute_config_fingerprint, Config, FingerprintPolicy};
use chrono::Utc;
use std::collections::HashSet;

/// How a run treats an existing checkpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartMode {
    /// Continue from a compatible checkpoint, or start cold when there is none
    #[default]
    Resume,
    /// Discard any existing checkpoint
    Fresh,
}

/// Validators to attach to a request so an unchanged page can answer 304
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalHeaders {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

impl ConditionalHeaders {
    pub fn is_empty(&self) -> bool {
        self.if_none_match.is_none() && self.if_modified_since.is_none()
    }
}

/// Traversal state handed to the crawler when a run starts
#[derive(Debug, Clone, Default)]
pub struct ResumeState {
    /// URLs that must not be fetched again this run
    pub visited: HashSet<String>,
    /// Saved pending queue, in order
    pub queue: Vec<CrawlTask>,
    /// Number of page records in the checkpoint
    pub page_count: usize,
}

impl ResumeState {
    /// A checkpoint without page records is a cold start
    pub fn is_cold_start(&self) -> bool {
        self.page_count == 0
    }
}

/// Owns a checkpoint backend for the duration of one crawl run
pub struct CheckpointManager {
    backend: Box<dyn StateBackend>,
    config_name: String,
    config_fingerprint: String,
    created_at: String,
    max_age_days: Option<f64>,
    resumed: bool,
}

impl CheckpointManager {
    /// Opens the checkpoint configured in `config`
    ///
    /// A missing, corrupt or incompatible checkpoint starts a new crawl. When
    /// the stored configuration fingerprint differs from the current one, the
    /// `on-fingerprint-mismatch` policy decides between discarding the
    /// checkpoint and resuming with a warning.
    pub fn open(config: &Config, mode: StartMode) -> CheckpointResult<Self> {
        let backend = create_backend(config.checkpoint.backend_kind(), &config.checkpoint.path);
        Self::with_backend(backend, config, mode)
    }

    /// Opens a checkpoint on an explicitly constructed backend
    pub fn with_backend(
        backend: Box<dyn StateBackend>,
        config: &Config,
        mode: StartMode,
    ) -> CheckpointResult<Self> {
        backend.initialize()?;

        let fingerprint = compute_config_fingerprint(config);
        let existing = backend.load_metadata()?;

        let resumed_from = match (mode, existing) {
            (StartMode::Fresh, existing) => {
                if existing.is_some() {
                    tracing::info!("Discarding existing checkpoint for a fresh crawl");
                }
                None
            }
            (StartMode::Resume, None) => None,
            (StartMode::Resume, Some(metadata)) if metadata.config_fingerprint == fingerprint => {
                Some(metadata)
            }
            (StartMode::Resume, Some(metadata)) => match config.checkpoint.on_fingerprint_mismatch {
                FingerprintPolicy::Restart => {
                    tracing::warn!(
                        "Configuration changed since the checkpoint was written, starting a new crawl"
                    );
                    None
                }
                FingerprintPolicy::Advisory => {
                    tracing::warn!(
                        "Configuration changed since the checkpoint was written, resuming anyway"
                    );
                    Some(metadata)
                }
            },
        };

        let resumed = resumed_from.is_some();
        let created_at = match resumed_from {
            Some(metadata) => {
                tracing::info!(
                    "Resuming crawl '{}' started at {}",
                    metadata.config_name,
                    metadata.created_at
                );
                metadata.created_at
            }
            None => {
                backend.clear()?;
                Utc::now().to_rfc3339()
            }
        };

        let manager = Self {
            backend,
            config_name: config.name.clone(),
            config_fingerprint: fingerprint,
            created_at,
            max_age_days: config.checkpoint.max_age_days,
            resumed,
        };

        if !resumed {
            manager.write_metadata(serde_json::Value::Object(Default::default()))?;
            manager.backend.commit()?;
        }

        Ok(manager)
    }

    /// True when this run continues an earlier one
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn config_fingerprint(&self) -> &str {
        &self.config_fingerprint
    }

    /// Builds the crawler's starting traversal state
    ///
    /// Every recorded page that is not yet due for a refetch counts as visited.
    pub fn resume_state(&self) -> CheckpointResult<ResumeState> {
        let mut visited = HashSet::new();
        let mut page_count = 0;

        for page in self.backend.iter_pages()? {
            let page = page?;
            page_count += 1;
            if !is_due(&page, self.max_age_days) {
                visited.insert(page.url);
            }
        }

        Ok(ResumeState {
            visited,
            queue: self.backend.get_queue()?,
            page_count,
        })
    }

    pub fn add_page(&self, page: PageRecord) -> CheckpointResult<()> {
        self.backend.add_page(page)
    }

    pub fn get_page(&self, url: &str) -> CheckpointResult<Option<PageRecord>> {
        self.backend.get_page(url)
    }

    /// Records that a page was confirmed unchanged just now
    pub fn touch_page(&self, url: &str) -> CheckpointResult<()> {
        if let Some(mut page) = self.backend.get_page(url)? {
            page.last_fetched_at = Utc::now().to_rfc3339();
            self.backend.add_page(page)?;
        }
        Ok(())
    }

    /// Whether `url` must be fetched, applying the configured maximum age
    ///
    /// A storage error answers "yes" so the page is fetched rather than lost.
    pub fn should_redownload(&self, url: &str) -> bool {
        self.backend
            .should_redownload(url, self.max_age_days)
            .unwrap_or_else(|e| {
                tracing::warn!("Freshness check failed for {}: {}", url, e);
                true
            })
    }

    /// Conditional request headers derived from the stored validators
    pub fn conditional_headers(&self, url: &str) -> ConditionalHeaders {
        match self.backend.get_page(url) {
            Ok(Some(page)) => ConditionalHeaders {
                if_none_match: page.etag,
                if_modified_since: page.last_modified,
            },
            Ok(None) => ConditionalHeaders::default(),
            Err(e) => {
                tracing::warn!("Could not read validators for {}: {}", url, e);
                ConditionalHeaders::default()
            }
        }
    }

    pub fn page_count(&self) -> CheckpointResult<usize> {
        self.backend.page_count()
    }

    /// Persists the pending queue and metadata, then commits buffered pages
    pub fn save(&self, queue: &[CrawlTask], stats: serde_json::Value) -> CheckpointResult<()> {
        self.backend.save_queue(queue)?;
        self.write_metadata(stats)?;
        self.backend.commit()?;
        tracing::debug!("Checkpoint saved ({} queued URLs)", queue.len());
        Ok(())
    }

    pub fn metadata(&self) -> CheckpointResult<Option<CheckpointMetadata>> {
        self.backend.load_metadata()
    }

    pub fn close(&self) -> CheckpointResult<()> {
        self.backend.commit()?;
        self.backend.close()
    }

    fn write_metadata(&self, stats: serde_json::Value) -> CheckpointResult<()> {
        self.backend.save_metadata(&CheckpointMetadata {
            version: CHECKPOINT_VERSION,
            config_name: self.config_name.clone(),
            config_fingerprint: self.config_fingerprint.clone(),
            created_at: self.created_at.clone(),
            last_updated_at: Utc::now().to_rfc3339(),
            stats,
        })
    }
}

/// Reads the stored metadata and page count without modifying the checkpoint
///
/// Returns `None` when no usable checkpoint exists.
pub fn inspect_checkpoint(config: &Config) -> CheckpointResult<Option<(CheckpointMetadata, usize)>> {
    if !config.checkpoint.path.exists() {
        return Ok(None);
    }

    let backend = create_backend(config.checkpoint.backend_kind(), &config.checkpoint.path);
    backend.initialize()?;
    let result = match backend.load_metadata()? {
        Some(metadata) => Some((metadata, backend.page_count()?)),
        None => None,
    };
    backend.close()?;
    Ok(result)
}
