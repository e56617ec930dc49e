//! Registry of self-hosted workers

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{AppError, Result};

/// One self-hosted worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backend {
    pub url: String,
    pub in_use: bool,
    /// Failures the worker may still absorb before eviction
    pub remaining_capacity: u32,
}

/// Workers in registration order.
///
/// Every operation is one critical section on the registry lock, so two
/// dispatches can never both acquire the same worker.
#[derive(Debug, Default)]
pub struct BackendPool {
    backends: Mutex<Vec<Backend>>,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the pool from configuration
    pub fn from_config(workers: &[WorkerConfig]) -> Result<Self> {
        let pool = Self::new();
        for worker in workers {
            pool.register(&worker.url, worker.capacity)?;
        }
        Ok(pool)
    }

    /// Add a worker, or refresh the capacity of one already registered
    pub fn register(&self, url: &str, capacity: u32) -> Result<()> {
        if url.is_empty() {
            return Err(AppError::InvalidRequest("Worker url cannot be empty".to_string()));
        }
        if capacity == 0 {
            return Err(AppError::InvalidRequest(format!(
                "Worker '{}' must have a capacity of at least 1",
                url
            )));
        }

        let mut backends = self.backends.lock();
        match backends.iter_mut().find(|b| b.url == url) {
            Some(existing) => {
                existing.remaining_capacity = capacity;
                debug!(url = %url, capacity = capacity, "Refreshed worker capacity");
            }
            None => {
                backends.push(Backend {
                    url: url.to_string(),
                    in_use: false,
                    remaining_capacity: capacity,
                });
                info!(url = %url, capacity = capacity, "Registered worker");
            }
        }
        Ok(())
    }

    /// Idle workers, in registration order
    pub fn list_available(&self) -> Vec<Backend> {
        self.backends
            .lock()
            .iter()
            .filter(|b| !b.in_use)
            .cloned()
            .collect()
    }

    /// Every registered worker
    pub fn snapshot(&self) -> Vec<Backend> {
        self.backends.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.backends.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.lock().is_empty()
    }

    /// Mark a worker busy; false if it is gone or already busy
    pub fn acquire(&self, url: &str) -> bool {
        let mut backends = self.backends.lock();
        match backends.iter_mut().find(|b| b.url == url) {
            Some(backend) if !backend.in_use => {
                backend.in_use = true;
                true
            }
            _ => false,
        }
    }

    /// Scoped acquire; see [`PoolLease`]
    pub fn lease(&self, url: &str) -> Option<PoolLease<'_>> {
        self.acquire(url).then(|| PoolLease {
            pool: self,
            url: url.to_string(),
            resolved: false,
        })
    }

    /// Mark a worker idle without touching its capacity
    pub fn release(&self, url: &str) {
        if let Some(backend) = self.backends.lock().iter_mut().find(|b| b.url == url) {
            backend.in_use = false;
        }
    }

    pub fn record_success(&self, url: &str) {
        self.release(url);
    }

    /// Charge a failure; the worker is removed once its capacity is spent
    pub fn record_failure(&self, url: &str) {
        let mut backends = self.backends.lock();
        let Some(index) = backends.iter().position(|b| b.url == url) else {
            return;
        };

        let backend = &mut backends[index];
        backend.remaining_capacity = backend.remaining_capacity.saturating_sub(1);
        if backend.remaining_capacity == 0 {
            backends.remove(index);
            warn!(url = %url, "Evicted worker after exhausting its capacity");
        } else {
            backend.in_use = false;
            debug!(
                url = %url,
                remaining_capacity = backend.remaining_capacity,
                "Recorded worker failure"
            );
        }
    }

    /// Remove a worker immediately; returns whether it was registered
    pub fn evict(&self, url: &str) -> bool {
        let mut backends = self.backends.lock();
        let before = backends.len();
        backends.retain(|b| b.url != url);
        let evicted = backends.len() != before;
        if evicted {
            warn!(url = %url, "Evicted worker");
        }
        evicted
    }
}

/// A worker held busy for one dispatch.
///
/// Resolve it with [`PoolLease::succeed`], [`PoolLease::fail`] or
/// [`PoolLease::evict`]; dropping it unresolved releases the worker.
#[derive(Debug)]
pub struct PoolLease<'a> {
    pool: &'a BackendPool,
    url: String,
    resolved: bool,
}

impl PoolLease<'_> {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.pool.record_success(&self.url);
    }

    pub fn fail(mut self) {
        self.resolved = true;
        self.pool.record_failure(&self.url);
    }

    pub fn evict(mut self) {
        self.resolved = true;
        self.pool.evict(&self.url);
    }
}

impl Drop for PoolLease<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.pool.release(&self.url);
        }
    }
}
