//! Failover dispatch engine
//!
//! A request walks `fast path -> pool -> cloud -> placeholder`, strictly
//! forward. Each stage either produces an image or hands over to the next one;
//! the placeholder stage cannot fail, so [`DispatchEngine::generate`] always
//! resolves to something the caller can serve.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::cloud_backend::CloudBackend;
use crate::backend::http_backend::{HttpBackend, HttpConnector};
use crate::backend::{DispatchOutcome, FailureKind, GenerationRequest, ImageBackend, WorkerConnector};
use crate::config::{PendingBackoffMode, Settings};
use crate::error::Result;
use crate::gateway::admission::AdmissionController;
use crate::gateway::pool::BackendPool;
use crate::response::ImageLocator;
use crate::storage::{ImageFormat, ResultStore};

/// Wait policy for `Pending` answers from the cloud provider
#[derive(Debug, Clone, Copy)]
pub struct PendingBackoff {
    pub mode: PendingBackoffMode,
    pub default_delay: Duration,
    pub max_delay: Duration,
}

impl PendingBackoff {
    pub fn delay(&self, retry_after: Option<Duration>) -> Duration {
        let delay = match (self.mode, retry_after) {
            (PendingBackoffMode::ProviderEta, Some(eta)) => eta,
            _ => self.default_delay,
        };
        delay.min(self.max_delay)
    }
}

/// Timeouts and budgets of the failover chain
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub fast_path_timeout: Duration,
    pub pool_timeout: Duration,
    pub cloud_timeout: Duration,
    pub cloud_max_attempts: u32,
    pub pending_backoff: PendingBackoff,
    /// Base pause after a failed cloud attempt; up to half again is added as jitter
    pub retry_backoff: Duration,
    pub placeholder_url: String,
    /// Budget for the whole chain, storage included
    pub deadline: Duration,
}

impl DispatchSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        let dispatch = &settings.dispatch;
        let defaults = Self::default();

        let (cloud_timeout, cloud_max_attempts, pending_backoff, retry_backoff) =
            match &dispatch.cloud {
                Some(cloud) => (
                    Duration::from_millis(cloud.timeout_ms),
                    cloud.max_attempts,
                    PendingBackoff {
                        mode: cloud.pending_backoff,
                        default_delay: Duration::from_millis(cloud.pending_delay_ms),
                        max_delay: Duration::from_millis(cloud.max_pending_delay_ms),
                    },
                    Duration::from_millis(cloud.retry_backoff_ms),
                ),
                None => (
                    defaults.cloud_timeout,
                    defaults.cloud_max_attempts,
                    defaults.pending_backoff,
                    defaults.retry_backoff,
                ),
            };

        Self {
            fast_path_timeout: dispatch.fast_path_timeout(),
            pool_timeout: Duration::from_millis(settings.pool.timeout_ms),
            cloud_timeout,
            cloud_max_attempts,
            pending_backoff,
            retry_backoff,
            placeholder_url: dispatch.placeholder_url.clone(),
            deadline: dispatch.deadline(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            fast_path_timeout: Duration::from_secs(10),
            pool_timeout: Duration::from_secs(60),
            cloud_timeout: Duration::from_secs(60),
            cloud_max_attempts: 3,
            pending_backoff: PendingBackoff {
                mode: PendingBackoffMode::ProviderEta,
                default_delay: Duration::from_secs(3),
                max_delay: Duration::from_secs(30),
            },
            retry_backoff: Duration::from_millis(500),
            placeholder_url: "https://i.imgur.com/tdGdu9l.png".to_string(),
            deadline: Duration::from_secs(150),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    FastPath,
    Pool,
    Cloud,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::FastPath => "fast_path",
            Stage::Pool => "pool",
            Stage::Cloud => "cloud",
        }
    }
}

struct Generated {
    bytes: Vec<u8>,
    format: ImageFormat,
    stage: Stage,
}

/// Orchestrates backends, admission and storage for generation requests
pub struct DispatchEngine {
    admission: Arc<AdmissionController>,
    pool: Arc<BackendPool>,
    connector: Arc<dyn WorkerConnector>,
    fast_path: Option<Arc<dyn ImageBackend>>,
    cloud: Option<Arc<dyn ImageBackend>>,
    store: Arc<ResultStore>,
    settings: DispatchSettings,
}

impl DispatchEngine {
    /// Engine with the pool stage only; add the other stages with the builders
    pub fn new(
        admission: Arc<AdmissionController>,
        pool: Arc<BackendPool>,
        connector: Arc<dyn WorkerConnector>,
        store: Arc<ResultStore>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            admission,
            pool,
            connector,
            fast_path: None,
            cloud: None,
            store,
            settings,
        }
    }

    pub fn with_fast_path(mut self, backend: Arc<dyn ImageBackend>) -> Self {
        self.fast_path = Some(backend);
        self
    }

    pub fn with_cloud(mut self, backend: Arc<dyn ImageBackend>) -> Self {
        self.cloud = Some(backend);
        self
    }

    /// Wire up HTTP backends as described by configuration
    pub fn from_settings(
        settings: &Settings,
        admission: Arc<AdmissionController>,
        pool: Arc<BackendPool>,
        store: Arc<ResultStore>,
    ) -> Result<Self> {
        let dispatch_settings = DispatchSettings::from_settings(settings);
        let connector = HttpConnector::new(
            dispatch_settings.pool_timeout,
            &settings.pool.generate_path,
            &settings.pool.health_check_path,
        )?;

        let mut engine = Self::new(
            admission,
            pool,
            Arc::new(connector),
            store,
            dispatch_settings,
        );

        if let Some(url) = &settings.dispatch.fast_path_url {
            let backend = HttpBackend::fast_path(url, engine.settings.fast_path_timeout)?;
            engine = engine.with_fast_path(Arc::new(backend));
        }
        if let Some(cloud) = &settings.dispatch.cloud {
            engine = engine.with_cloud(Arc::new(CloudBackend::new(cloud)?));
        }

        info!(
            fast_path = engine.fast_path.is_some(),
            cloud = engine.cloud.is_some(),
            admission_limit = engine.admission.limit(),
            "Dispatch engine ready"
        );
        Ok(engine)
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn connector(&self) -> Arc<dyn WorkerConnector> {
        self.connector.clone()
    }

    /// Produce an image for the request. Never fails.
    ///
    /// Once `deadline` has elapsed the chain is abandoned wherever it is and the
    /// placeholder is returned. Admission permits and pool leases are released by
    /// their guards when the in-flight stage is dropped.
    pub async fn generate(&self, request: &GenerationRequest) -> ImageLocator {
        let span = info_span!("generate", request_id = %Uuid::new_v4());
        let deadline = self.settings.deadline;

        async {
            match tokio::time::timeout(deadline, self.generate_inner(request)).await {
                Ok(locator) => locator,
                Err(_) => {
                    warn!(deadline = ?deadline, "Dispatch deadline exceeded, returning placeholder");
                    self.placeholder()
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn generate_inner(&self, request: &GenerationRequest) -> ImageLocator {
        let generated = match self.try_fast_path(request).await {
            Some(image) => Some(image),
            None => match self.try_pool(request).await {
                Some(image) => Some(image),
                None => self.try_cloud(request).await,
            },
        };

        let Some(generated) = generated else {
            warn!("All backends failed, returning placeholder");
            return self.placeholder();
        };

        match self.store.put(generated.bytes, generated.format).await {
            Ok(key) => {
                info!(stage = generated.stage.as_str(), key = %key, "Generated image");
                ImageLocator::Stored(key)
            }
            Err(e) => {
                error!(stage = generated.stage.as_str(), error = %e, "Failed to store generated image");
                self.placeholder()
            }
        }
    }

    fn placeholder(&self) -> ImageLocator {
        ImageLocator::Placeholder(self.settings.placeholder_url.clone())
    }

    async fn try_fast_path(&self, request: &GenerationRequest) -> Option<Generated> {
        let backend = self.fast_path.as_ref()?;

        let Some(_permit) = self.admission.try_acquire() else {
            info!(
                limit = self.admission.limit(),
                "Fast path at capacity, redirecting"
            );
            return None;
        };

        let outcome = timed(
            Stage::FastPath,
            self.settings.fast_path_timeout,
            backend.generate(request),
        )
        .await;

        match outcome {
            DispatchOutcome::Success { bytes, format } => Some(Generated {
                bytes,
                format,
                stage: Stage::FastPath,
            }),
            DispatchOutcome::Pending { .. } => {
                warn!(backend = backend.name(), "Fast path answered pending, falling through");
                None
            }
            DispatchOutcome::Failure { kind, reason } => {
                warn!(backend = backend.name(), kind = %kind, reason = %reason, "Fast path failed");
                None
            }
        }
    }

    async fn try_pool(&self, request: &GenerationRequest) -> Option<Generated> {
        let candidates = self.pool.list_available();
        if candidates.is_empty() {
            debug!("No idle pool workers");
            return None;
        }

        for candidate in candidates {
            // Another dispatch may have taken it since the listing
            let Some(lease) = self.pool.lease(&candidate.url) else {
                continue;
            };

            let worker = self.connector.connect(&candidate.url);
            let outcome = timed(Stage::Pool, self.settings.pool_timeout, worker.generate(request)).await;

            match outcome {
                DispatchOutcome::Success { bytes, format } => {
                    lease.succeed();
                    return Some(Generated {
                        bytes,
                        format,
                        stage: Stage::Pool,
                    });
                }
                DispatchOutcome::Failure {
                    kind: FailureKind::Protocol,
                    reason,
                } => {
                    warn!(backend = %candidate.url, reason = %reason, "Worker broke protocol");
                    lease.evict();
                }
                DispatchOutcome::Failure { kind, reason } => {
                    warn!(backend = %candidate.url, kind = %kind, reason = %reason, "Worker failed");
                    lease.fail();
                }
                DispatchOutcome::Pending { .. } => {
                    warn!(backend = %candidate.url, "Worker answered pending");
                    lease.fail();
                }
            }
        }

        None
    }

    async fn try_cloud(&self, request: &GenerationRequest) -> Option<Generated> {
        let cloud = self.cloud.as_ref()?;
        let max_attempts = self.settings.cloud_max_attempts;
        let mut ticket: Option<String> = None;

        for attempt in 1..=max_attempts {
            let call = async {
                match &ticket {
                    Some(ticket) => cloud.fetch(ticket).await,
                    None => cloud.generate(request).await,
                }
            };
            let outcome = timed(Stage::Cloud, self.settings.cloud_timeout, call).await;
            let last = attempt == max_attempts;

            match outcome {
                DispatchOutcome::Success { bytes, format } => {
                    return Some(Generated {
                        bytes,
                        format,
                        stage: Stage::Cloud,
                    });
                }
                DispatchOutcome::Pending {
                    retry_after,
                    ticket: next,
                } => {
                    if next.is_some() {
                        ticket = next;
                    }
                    let delay = self.settings.pending_backoff.delay(retry_after);
                    info!(attempt = attempt, delay = ?delay, "Cloud job pending");
                    if !last {
                        tokio::time::sleep(delay).await;
                    }
                }
                DispatchOutcome::Failure { kind, reason } => {
                    warn!(attempt = attempt, kind = %kind, reason = %reason, "Cloud attempt failed");
                    if kind == FailureKind::Protocol {
                        ticket = None;
                    }
                    if !last {
                        tokio::time::sleep(jittered(self.settings.retry_backoff)).await;
                    }
                }
            }
        }

        warn!(attempts = max_attempts, "Cloud retry budget exhausted");
        None
    }
}

async fn timed<F>(stage: Stage, limit: Duration, call: F) -> DispatchOutcome
where
    F: Future<Output = DispatchOutcome>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(outcome) => outcome,
        Err(_) => DispatchOutcome::transient(format!(
            "{} call timed out after {:?}",
            stage.as_str(),
            limit
        )),
    }
}

fn jittered(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms == 0 {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 2);
    Duration::from_millis(base_ms + jitter)
}
