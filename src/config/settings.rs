//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on a whole HTTP request, failover chain included
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_request_timeout() -> u64 {
    180
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Rate limiting configuration for the generation route
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst_size: u32,
}

fn default_rps() -> u32 {
    10
}

fn default_burst() -> u32 {
    20
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: default_rps(),
            burst_size: default_burst(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Failover chain configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Low-latency tunnel endpoint; the fast path is skipped when unset
    #[serde(default)]
    pub fast_path_url: Option<String>,
    #[serde(default = "default_fast_path_timeout")]
    pub fast_path_timeout_ms: u64,
    /// Maximum concurrent in-flight fast path calls
    #[serde(default = "default_admission_limit")]
    pub admission_limit: usize,
    /// Image reference returned when every backend failed
    #[serde(default = "default_placeholder_url")]
    pub placeholder_url: String,
    #[serde(default)]
    pub cloud: Option<CloudConfig>,
    /// Budget for the whole failover chain; the placeholder is returned once it runs out.
    /// Must stay below `server.request_timeout_secs`.
    #[serde(default = "default_deadline")]
    pub deadline_ms: u64,
}

fn default_fast_path_timeout() -> u64 {
    10_000
}

fn default_deadline() -> u64 {
    150_000
}

fn default_admission_limit() -> usize {
    2
}

fn default_placeholder_url() -> String {
    "https://i.imgur.com/tdGdu9l.png".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            fast_path_url: None,
            fast_path_timeout_ms: default_fast_path_timeout(),
            admission_limit: default_admission_limit(),
            placeholder_url: default_placeholder_url(),
            cloud: None,
            deadline_ms: default_deadline(),
        }
    }
}

impl DispatchConfig {
    pub fn fast_path_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_path_timeout_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// How long to wait when the cloud provider reports a job still processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingBackoffMode {
    /// Use the provider-supplied ETA, falling back to the fixed delay
    ProviderEta,
    /// Always wait the fixed delay
    Fixed,
}

impl Default for PendingBackoffMode {
    fn default() -> Self {
        Self::ProviderEta
    }
}

/// Paid cloud provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudConfig {
    pub endpoint: String,
    pub api_key: String,
    #[serde(default = "default_cloud_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_cloud_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub pending_backoff: PendingBackoffMode,
    #[serde(default = "default_pending_delay")]
    pub pending_delay_ms: u64,
    #[serde(default = "default_max_pending_delay")]
    pub max_pending_delay_ms: u64,
    /// Pause between attempts after an outright failure
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_embeddings_model")]
    pub embeddings_model: String,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,
}

fn default_cloud_attempts() -> u32 {
    3
}

fn default_cloud_timeout() -> u64 {
    60_000
}

fn default_pending_delay() -> u64 {
    3_000
}

fn default_max_pending_delay() -> u64 {
    30_000
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_embeddings_model() -> String {
    "rev-animated".to_string()
}

fn default_guidance_scale() -> f32 {
    7.5
}

impl CloudConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            max_attempts: default_cloud_attempts(),
            timeout_ms: default_cloud_timeout(),
            pending_backoff: PendingBackoffMode::default(),
            pending_delay_ms: default_pending_delay(),
            max_pending_delay_ms: default_max_pending_delay(),
            retry_backoff_ms: default_retry_backoff(),
            embeddings_model: default_embeddings_model(),
            guidance_scale: default_guidance_scale(),
        }
    }
}

/// Static prompt policy applied to every request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    #[serde(default = "default_enhance_prefix")]
    pub enhance_prefix: String,
    #[serde(default = "default_negative_prompt")]
    pub negative_prompt: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_dimension")]
    pub default_width: u32,
    #[serde(default = "default_dimension")]
    pub default_height: u32,
}

fn default_enhance_prefix() -> String {
    "((best quality)), ((masterpiece)), (detailed),".to_string()
}

fn default_negative_prompt() -> String {
    "(worst quality:1.2), (low quality:1.2), (lowres:1.1), multiple views, comic, sketch, \
     (((bad anatomy))), (((deformed))), (((disfigured))), watermark, multiple_views, \
     mutation hands, mutation fingers, extra fingers, missing fingers, watermark"
        .to_string()
}

fn default_steps() -> u32 {
    20
}

fn default_dimension() -> u32 {
    512
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            enhance_prefix: default_enhance_prefix(),
            negative_prompt: default_negative_prompt(),
            steps: default_steps(),
            default_width: default_dimension(),
            default_height: default_dimension(),
        }
    }
}

/// Self-hosted worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Workers registered at startup
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
    #[serde(default = "default_generate_path")]
    pub generate_path: String,
    #[serde(default = "default_pool_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    /// Idle worker probe interval; 0 disables probing
    #[serde(default)]
    pub health_check_interval_secs: u64,
}

/// A worker seeded from configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    pub url: String,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

fn default_generate_path() -> String {
    "/sdapi/v1/txt2img".to_string()
}

fn default_pool_timeout() -> u64 {
    60_000
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_capacity() -> u32 {
    1
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: vec![],
            generate_path: default_generate_path(),
            timeout_ms: default_pool_timeout(),
            health_check_path: default_health_check_path(),
            health_check_interval_secs: 0,
        }
    }
}

/// Result storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Local filesystem substrate; consulted first
    #[serde(default)]
    pub filesystem: Option<FilesystemConfig>,
    /// Document store substrate; consulted after the filesystem
    #[serde(default)]
    pub document: Option<DocumentConfig>,
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
    /// Write transcoded variants back so later reads skip the conversion
    #[serde(default = "default_true")]
    pub persist_transcoded: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_storage_path")]
    pub base_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentConfig {
    pub endpoint: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_document_timeout")]
    pub timeout_ms: u64,
}

fn default_storage_path() -> String {
    "./generated_images".to_string()
}

fn default_url_prefix() -> String {
    "http://localhost:5000/images".to_string()
}

fn default_collection() -> String {
    "images".to_string()
}

fn default_document_timeout() -> u64 {
    10_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            filesystem: Some(FilesystemConfig {
                base_path: default_storage_path(),
            }),
            document: None,
            url_prefix: default_url_prefix(),
            persist_transcoded: true,
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            .set_default("dispatch.admission_limit", default_admission_limit() as i64)?
            .set_default("dispatch.fast_path_timeout_ms", default_fast_path_timeout() as i64)?
            .set_default("dispatch.deadline_ms", default_deadline() as i64)?
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with IMAGEGEN_)
            .add_source(
                Environment::with_prefix("IMAGEGEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }

        if self.dispatch.admission_limit == 0 && self.dispatch.fast_path_url.is_some() {
            return Err(invalid(
                "dispatch.admission_limit must be at least 1 when a fast path is configured",
            ));
        }

        if self.dispatch.deadline_ms == 0 {
            return Err(invalid("dispatch.deadline_ms must be positive"));
        }

        // The HTTP timeout must never cut the chain off before it can fall back
        let request_timeout = Duration::from_secs(self.server.request_timeout_secs);
        if request_timeout <= self.dispatch.deadline() {
            return Err(invalid(&format!(
                "server.request_timeout_secs ({}s) must exceed dispatch.deadline_ms ({}ms)",
                self.server.request_timeout_secs, self.dispatch.deadline_ms
            )));
        }

        if let Some(cloud) = &self.dispatch.cloud {
            if cloud.max_attempts == 0 {
                return Err(invalid("dispatch.cloud.max_attempts must be at least 1"));
            }
            if cloud.endpoint.is_empty() {
                return Err(invalid("dispatch.cloud.endpoint cannot be empty"));
            }
        }

        for worker in &self.pool.workers {
            if worker.url.is_empty() {
                return Err(invalid("Worker url cannot be empty"));
            }
            if worker.capacity == 0 {
                return Err(invalid(&format!(
                    "Worker '{}' must have a capacity of at least 1",
                    worker.url
                )));
            }
        }

        if self.storage.filesystem.is_none() && self.storage.document.is_none() {
            return Err(invalid(
                "At least one of storage.filesystem or storage.document must be configured",
            ));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
            dispatch: DispatchConfig::default(),
            prompt: PromptConfig::default(),
            pool: PoolConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}
