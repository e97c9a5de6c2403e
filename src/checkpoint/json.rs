//! JSON document checkpoint backend
//!
//! All state lives in memory. The whole document is written on each
//! `save_metadata` through a temporary file in the same directory followed by
//! an atomic rename, so a crash mid-write leaves the previous checkpoint intact.
//! Suitable for crawls up to roughly ten thousand pages.

use crate::checkpoint::{
    CheckpointError, CheckpointMetadata, CheckpointResult, CrawlTask, PageIter, PageRecord,
    StateBackend, CHECKPOINT_VERSION, PAGE_BATCH_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;

/// On-disk layout. Every metadata field is required; a document missing one
/// is treated as corrupt.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    version: u32,
    config_name: String,
    config_fingerprint: String,
    created_at: String,
    last_updated_at: String,
    #[serde(default)]
    pages: BTreeMap<String, PageRecord>,
    #[serde(default)]
    queue: Vec<CrawlTask>,
    #[serde(default)]
    stats: serde_json::Value,
}

#[derive(Debug, Default)]
struct JsonState {
    initialized: bool,
    metadata: Option<CheckpointMetadata>,
    pages: BTreeMap<String, PageRecord>,
    queue: Vec<CrawlTask>,
}

/// Flush-on-save checkpoint stored as a single JSON document
#[derive(Debug)]
pub struct JsonBackend {
    path: PathBuf,
    state: Mutex<JsonState>,
}

impl JsonBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(JsonState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, JsonState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_initialized(&self) -> CheckpointResult<MutexGuard<'_, JsonState>> {
        let state = self.lock();
        if state.initialized {
            Ok(state)
        } else {
            Err(CheckpointError::NotInitialized)
        }
    }

    /// Reads the document, or `None` when it is absent, corrupt or from another version
    fn read_document(&self) -> CheckpointResult<Option<CheckpointDocument>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!("Checkpoint {} is not UTF-8, ignoring it", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let document: CheckpointDocument = match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(
                    "Checkpoint {} is corrupt ({}), starting without it",
                    self.path.display(),
                    e
                );
                return Ok(None);
            }
        };

        if document.version != CHECKPOINT_VERSION {
            tracing::warn!(
                "Checkpoint {} has version {} (expected {}), starting without it",
                self.path.display(),
                document.version,
                CHECKPOINT_VERSION
            );
            return Ok(None);
        }

        Ok(Some(document))
    }

    fn write_document(&self, document: &CheckpointDocument) -> CheckpointResult<()> {
        let parent = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let mut temp = NamedTempFile::new_in(&parent)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer(&mut writer, document)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl StateBackend for JsonBackend {
    fn initialize(&self) -> CheckpointResult<()> {
        if self.lock().initialized {
            return Ok(());
        }

        let document = self.read_document()?;

        let mut state = self.lock();
        if state.initialized {
            return Ok(());
        }
        if let Some(document) = document {
            tracing::debug!(
                "Loaded checkpoint {} with {} pages and {} queued URLs",
                self.path.display(),
                document.pages.len(),
                document.queue.len()
            );
            state.metadata = Some(CheckpointMetadata {
                version: document.version,
                config_name: document.config_name,
                config_fingerprint: document.config_fingerprint,
                created_at: document.created_at,
                last_updated_at: document.last_updated_at,
                stats: document.stats,
            });
            state.pages = document.pages;
            state.queue = document.queue;
        }
        state.initialized = true;
        Ok(())
    }

    fn close(&self) -> CheckpointResult<()> {
        let mut state = self.lock();
        *state = JsonState::default();
        Ok(())
    }

    fn clear(&self) -> CheckpointResult<()> {
        let mut state = self.lock_initialized()?;
        state.metadata = None;
        state.pages.clear();
        state.queue.clear();
        Ok(())
    }

    fn load_metadata(&self) -> CheckpointResult<Option<CheckpointMetadata>> {
        Ok(self.lock_initialized()?.metadata.clone())
    }

    fn save_metadata(&self, metadata: &CheckpointMetadata) -> CheckpointResult<()> {
        let mut state = self.lock_initialized()?;
        state.metadata = Some(metadata.clone());

        let document = CheckpointDocument {
            version: metadata.version,
            config_name: metadata.config_name.clone(),
            config_fingerprint: metadata.config_fingerprint.clone(),
            created_at: metadata.created_at.clone(),
            last_updated_at: metadata.last_updated_at.clone(),
            pages: state.pages.clone(),
            queue: state.queue.clone(),
            stats: metadata.stats.clone(),
        };
        drop(state);

        self.write_document(&document)
    }

    fn get_page(&self, url: &str) -> CheckpointResult<Option<PageRecord>> {
        Ok(self.lock_initialized()?.pages.get(url).cloned())
    }

    fn add_page(&self, page: PageRecord) -> CheckpointResult<()> {
        self.lock_initialized()?.pages.insert(page.url.clone(), page);
        Ok(())
    }

    fn has_page(&self, url: &str) -> CheckpointResult<bool> {
        Ok(self.lock_initialized()?.pages.contains_key(url))
    }

    fn page_count(&self) -> CheckpointResult<usize> {
        Ok(self.lock_initialized()?.pages.len())
    }

    fn iter_pages(&self) -> CheckpointResult<PageIter<'_>> {
        drop(self.lock_initialized()?);

        Ok(PageIter::new(move |after: Option<&str>| {
            let state = self.lock_initialized()?;
            let lower = match after {
                Some(url) => Bound::Excluded(url),
                None => Bound::Unbounded,
            };
            Ok(state
                .pages
                .range::<str, _>((lower, Bound::Unbounded))
                .take(PAGE_BATCH_SIZE)
                .map(|(_, page)| page.clone())
                .collect())
        }))
    }

    fn get_queue(&self) -> CheckpointResult<Vec<CrawlTask>> {
        Ok(self.lock_initialized()?.queue.clone())
    }

    fn save_queue(&self, queue: &[CrawlTask]) -> CheckpointResult<()> {
        self.lock_initialized()?.queue = queue.to_vec();
        Ok(())
    }
}
