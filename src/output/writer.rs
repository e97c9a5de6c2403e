//! HTML snapshot writer

use crate::crawler::FetchResult;
use crate::pipeline::{ProcessError, Processor};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Writes each page's HTML under the output directory
///
/// The file location is the result's `output_path`, the same path recorded in
/// the checkpoint.
#[derive(Debug, Clone)]
pub struct HtmlWriter {
    root: PathBuf,
}

impl HtmlWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a snapshot
    pub fn target_path(&self, result: &FetchResult) -> PathBuf {
        self.root.join(&result.output_path)
    }
}

#[async_trait]
impl Processor<FetchResult> for HtmlWriter {
    async fn process(&self, item: FetchResult) -> Result<(), ProcessError> {
        let target = self.target_path(&item);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, item.html.as_bytes()).await?;
        tracing::trace!("Wrote {} to {}", item.url, target.display());
        Ok(())
    }
}
