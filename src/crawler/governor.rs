//! Global and per-host admission control
//!
//! Every fetch holds two permits for its whole duration: one from the host's
//! semaphore and one from the crawl-wide semaphore. Host semaphores are created
//! the first time a host is seen. Both permits are released when the returned
//! [`GovernorPermit`] is dropped, whichever way the fetch ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Permits held while one fetch runs
#[derive(Debug)]
pub struct GovernorPermit {
    _host: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub struct Governor {
    global: Arc<Semaphore>,
    per_host_limit: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Governor {
    pub fn new(global_limit: usize, per_host_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            per_host_limit,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    /// Waits for the host permit, then the global permit
    pub async fn acquire(&self, host: &str) -> Result<GovernorPermit, AcquireError> {
        let host_permit = self.host_semaphore(host).acquire_owned().await?;
        let global_permit = self.global.clone().acquire_owned().await?;
        Ok(GovernorPermit {
            _host: host_permit,
            _global: global_permit,
        })
    }

    /// Free global permits
    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }

    /// Free permits for `host`; a host never seen has the full limit
    pub fn available_for(&self, host: &str) -> usize {
        let hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        hosts
            .get(host)
            .map(|semaphore| semaphore.available_permits())
            .unwrap_or(self.per_host_limit)
    }

    /// Number of hosts seen so far
    pub fn host_count(&self) -> usize {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
