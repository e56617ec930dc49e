//! Background prober that drains dead workers from the pool

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::WorkerConnector;
use crate::gateway::pool::BackendPool;

/// Outcome of one probe sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub failed: usize,
}

/// Periodically probes idle workers.
///
/// A worker that fails its probe is charged like a failed dispatch, so it is
/// evicted once its capacity runs out.
pub struct PoolHealthChecker {
    pool: Arc<BackendPool>,
    connector: Arc<dyn WorkerConnector>,
    check_task: RwLock<Option<JoinHandle<()>>>,
}

impl PoolHealthChecker {
    pub fn new(pool: Arc<BackendPool>, connector: Arc<dyn WorkerConnector>) -> Self {
        Self {
            pool,
            connector,
            check_task: RwLock::new(None),
        }
    }

    /// Probe every idle worker once
    pub async fn sweep(&self) -> SweepReport {
        sweep(&self.pool, self.connector.as_ref()).await
    }

    /// Start the background task; an interval of zero leaves probing off
    pub async fn start(&self, interval_secs: u64) {
        if interval_secs == 0 {
            debug!("Pool health checks disabled");
            return;
        }

        let pool = self.pool.clone();
        let connector = self.connector.clone();

        let handle = tokio::spawn(async move {
            let interval = Duration::from_secs(interval_secs);
            loop {
                tokio::time::sleep(interval).await;
                let report = sweep(&pool, connector.as_ref()).await;
                debug!(
                    probed = report.probed,
                    failed = report.failed,
                    pool_size = pool.len(),
                    "Pool health sweep completed"
                );
            }
        });

        *self.check_task.write().await = Some(handle);
        info!(interval_secs = interval_secs, "Started pool health check task");
    }

    /// Stop the background task
    pub async fn stop(&self) {
        if let Some(handle) = self.check_task.write().await.take() {
            handle.abort();
            info!("Stopped pool health check task");
        }
    }
}

async fn sweep(pool: &BackendPool, connector: &dyn WorkerConnector) -> SweepReport {
    let mut report = SweepReport::default();

    for candidate in pool.list_available() {
        // Busy workers are being exercised by real traffic already
        let Some(lease) = pool.lease(&candidate.url) else {
            continue;
        };
        report.probed += 1;

        if connector.connect(&candidate.url).health_check().await {
            lease.succeed();
        } else {
            report.failed += 1;
            warn!(backend = %candidate.url, "Worker failed health probe");
            lease.fail();
        }
    }

    report
}
