//! Pooled rendering contexts for pages that need script execution
//!
//! A [`RendererPool`] owns a fixed number of [`RenderContext`]s created at
//! startup. A fetch checks one out, navigates, and the guard puts it back when
//! dropped, including when navigation fails or times out.

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use url::Url;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to start renderer: {0}")]
    Startup(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("navigation to {url} timed out")]
    Timeout { url: String },

    #[error("renderer pool is closed")]
    PoolClosed,
}

/// HTML produced by rendering a page
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: Url,
    pub status: u16,
    pub html: String,
}

/// One reusable rendering context, such as a browser tab
#[async_trait]
pub trait RenderContext: Send {
    async fn navigate(&mut self, url: &Url) -> Result<RenderedPage, RenderError>;
}

/// Creates the contexts a [`RendererPool`] holds
#[async_trait]
pub trait RenderContextFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn RenderContext>, RenderError>;
}

/// Fixed-size pool of rendering contexts
pub struct RendererPool {
    contexts: Mutex<Vec<Box<dyn RenderContext>>>,
    available: Semaphore,
    size: usize,
    navigation_timeout: Duration,
}

impl std::fmt::Debug for RendererPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererPool")
            .field("size", &self.size)
            .field("idle", &self.idle())
            .finish()
    }
}

impl RendererPool {
    /// Creates all `size` contexts up front; any failure aborts startup
    pub async fn start(
        factory: &dyn RenderContextFactory,
        size: usize,
        navigation_timeout: Duration,
    ) -> Result<Self, RenderError> {
        let mut contexts = Vec::with_capacity(size);
        for _ in 0..size {
            contexts.push(factory.create().await?);
        }
        tracing::info!("Started renderer pool with {} contexts", size);

        Ok(Self {
            contexts: Mutex::new(contexts),
            available: Semaphore::new(size),
            size,
            navigation_timeout,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Contexts not currently checked out
    pub fn idle(&self) -> usize {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits for a free context
    pub async fn checkout(&self) -> Result<PooledContext<'_>, RenderError> {
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| RenderError::PoolClosed)?;

        let context = self
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(RenderError::PoolClosed)?;

        Ok(PooledContext {
            pool: self,
            context: Some(context),
            _permit: permit,
        })
    }

    /// Checks out a context and navigates to `url` within the navigation timeout
    pub async fn render(&self, url: &Url) -> Result<RenderedPage, RenderError> {
        let mut context = self.checkout().await?;
        match tokio::time::timeout(self.navigation_timeout, context.navigate(url)).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::Timeout {
                url: url.to_string(),
            }),
        }
    }
}

/// A checked-out context, returned to its pool on drop
pub struct PooledContext<'a> {
    pool: &'a RendererPool,
    context: Option<Box<dyn RenderContext>>,
    _permit: SemaphorePermit<'a>,
}

impl PooledContext<'_> {
    pub async fn navigate(&mut self, url: &Url) -> Result<RenderedPage, RenderError> {
        match self.context.as_mut() {
            Some(context) => context.navigate(url).await,
            None => Err(RenderError::PoolClosed),
        }
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool
                .contexts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(context);
        }
    }
}
