//! Checkpoint module for resumable crawls
//!
//! This module persists crawl progress so an interrupted crawl can pick up
//! where it left off:
//! - Crawl metadata (name, configuration fingerprint, timestamps, statistics)
//! - One record per fetched page (content hash, status, validators)
//! - The pending URL queue
//!
//! Two backends implement [`StateBackend`]: a JSON document rewritten
//! atomically on every metadata save, and an SQLite database for large crawls.

mod backend;
mod json;
mod manager;
mod schema;
mod sqlite;

pub use backend::{is_due, PageIter, StateBackend, PAGE_BATCH_SIZE};
pub use json::JsonBackend;
pub use manager::{inspect_checkpoint, CheckpointManager, ConditionalHeaders, ResumeState, StartMode};
pub use sqlite::SqliteBackend;

use crate::config::BackendKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

/// Format version written into every checkpoint
pub const CHECKPOINT_VERSION: u32 = 1;

/// Errors that can occur during checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint backend used before initialize()")]
    NotInitialized,
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// What is known about one fetched page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Normalized URL
    pub url: String,

    /// SHA-256 of the raw response body
    pub content_hash: String,

    /// RFC 3339 timestamp of the last successful fetch
    pub last_fetched_at: String,

    pub status_code: u16,

    /// Snapshot location relative to the output directory
    pub output_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// Singleton describing the crawl a checkpoint belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub version: u32,
    pub config_name: String,
    pub config_fingerprint: String,
    pub created_at: String,
    pub last_updated_at: String,
    #[serde(default)]
    pub stats: serde_json::Value,
}

/// A URL waiting to be fetched, with the page it was discovered on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrawlTask {
    pub url: String,
    #[serde(default)]
    pub parent_url: Option<String>,
}

impl CrawlTask {
    pub fn new(url: impl Into<String>, parent_url: Option<String>) -> Self {
        Self {
            url: url.into(),
            parent_url,
        }
    }

    /// A task without a parent, used for start URLs
    pub fn root(url: impl Into<String>) -> Self {
        Self::new(url, None)
    }
}

/// Creates an uninitialized backend of the given kind
pub fn create_backend(kind: BackendKind, path: &Path) -> Box<dyn StateBackend> {
    match kind {
        BackendKind::Json => Box::new(JsonBackend::new(path)),
        BackendKind::Sqlite => Box::new(SqliteBackend::new(path)),
    }
}

/// Hex-encoded SHA-256 of a response body
///
/// # Examples
///
/// ```
/// use sumi_tide::checkpoint::compute_content_hash;
///
/// assert_eq!(
///     compute_content_hash(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
pub fn compute_content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
