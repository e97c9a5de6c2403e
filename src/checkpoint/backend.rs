//! Storage backend trait for checkpoints

use crate::checkpoint::{CheckpointMetadata, CheckpointResult, CrawlTask, PageRecord};
use chrono::{DateTime, Utc};

/// Number of page records fetched per round trip while iterating
pub const PAGE_BATCH_SIZE: usize = 1000;

/// Persistence interface shared by every checkpoint backend
///
/// Methods take `&self`; implementations guard their state internally so a
/// backend can be shared by concurrent fetch tasks. Loading never fails on a
/// corrupt or incompatible checkpoint: such state is discarded during
/// [`initialize`](StateBackend::initialize) and the backend starts empty.
pub trait StateBackend: Send + Sync {
    /// Opens or loads the underlying storage. Calling it again is a no-op.
    fn initialize(&self) -> CheckpointResult<()>;

    /// Flushes pending writes and releases the storage. Calling it again is a no-op.
    fn close(&self) -> CheckpointResult<()>;

    /// Discards all metadata, page records and queue entries
    fn clear(&self) -> CheckpointResult<()>;

    fn load_metadata(&self) -> CheckpointResult<Option<CheckpointMetadata>>;

    fn save_metadata(&self, metadata: &CheckpointMetadata) -> CheckpointResult<()>;

    fn get_page(&self, url: &str) -> CheckpointResult<Option<PageRecord>>;

    /// Inserts or replaces the record for `page.url`
    fn add_page(&self, page: PageRecord) -> CheckpointResult<()>;

    fn has_page(&self, url: &str) -> CheckpointResult<bool>;

    fn page_count(&self) -> CheckpointResult<usize>;

    /// Streams every page record in URL order, [`PAGE_BATCH_SIZE`] at a time
    fn iter_pages(&self) -> CheckpointResult<PageIter<'_>>;

    fn get_queue(&self) -> CheckpointResult<Vec<CrawlTask>>;

    /// Replaces the whole pending queue
    fn save_queue(&self, queue: &[CrawlTask]) -> CheckpointResult<()>;

    /// Makes buffered page writes durable
    fn commit(&self) -> CheckpointResult<()> {
        Ok(())
    }

    /// Decides whether a page must be fetched again
    ///
    /// * unknown URL: yes
    /// * known URL, no maximum age: no
    /// * known URL fetched longer ago than `max_age_days`: yes
    /// * known URL with an unparsable timestamp: yes
    fn should_redownload(&self, url: &str, max_age_days: Option<f64>) -> CheckpointResult<bool> {
        Ok(match self.get_page(url)? {
            Some(page) => is_due(&page, max_age_days),
            None => true,
        })
    }
}

/// Whether a known page is old enough to be fetched again
pub fn is_due(page: &PageRecord, max_age_days: Option<f64>) -> bool {
    let Some(max_age_days) = max_age_days else {
        return false;
    };

    match DateTime::parse_from_rfc3339(&page.last_fetched_at) {
        Ok(fetched_at) => {
            let age = Utc::now().signed_duration_since(fetched_at.with_timezone(&Utc));
            let age_days = age.num_milliseconds() as f64 / 86_400_000.0;
            age_days > max_age_days
        }
        Err(e) => {
            tracing::debug!(
                "Unparsable fetch time '{}' for {}: {}",
                page.last_fetched_at,
                page.url,
                e
            );
            true
        }
    }
}

type BatchFn<'a> = dyn FnMut(Option<&str>) -> CheckpointResult<Vec<PageRecord>> + Send + 'a;

/// Keyset-paginated iterator over page records
///
/// Each batch is requested with the URL of the last record seen, so only one
/// batch is held in memory at a time.
pub struct PageIter<'a> {
    fetch_batch: Box<BatchFn<'a>>,
    buffer: std::vec::IntoIter<PageRecord>,
    cursor: Option<String>,
    exhausted: bool,
}

impl<'a> PageIter<'a> {
    /// `fetch_batch(after)` returns up to [`PAGE_BATCH_SIZE`] records with URLs
    /// strictly greater than `after`, in ascending URL order
    pub fn new(
        fetch_batch: impl FnMut(Option<&str>) -> CheckpointResult<Vec<PageRecord>> + Send + 'a,
    ) -> Self {
        Self {
            fetch_batch: Box::new(fetch_batch),
            buffer: Vec::new().into_iter(),
            cursor: None,
            exhausted: false,
        }
    }
}

impl Iterator for PageIter<'_> {
    type Item = CheckpointResult<PageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(page) = self.buffer.next() {
                self.cursor = Some(page.url.clone());
                return Some(Ok(page));
            }

            if self.exhausted {
                return None;
            }

            match (self.fetch_batch)(self.cursor.as_deref()) {
                Ok(batch) => {
                    if batch.len() < PAGE_BATCH_SIZE {
                        self.exhausted = true;
                    }
                    if batch.is_empty() {
                        return None;
                    }
                    self.buffer = batch.into_iter();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
