//! HTTP client for self-hosted workers (fast path tunnel and pool members)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::traits::{
    DispatchOutcome, FailureKind, GenerationRequest, ImageBackend, WorkerConnector,
};
use crate::error::{AppError, Result};
use crate::response::base64;
use crate::storage::codec;

/// Largest generated image accepted from a download URL
const MAX_DOWNLOAD_BYTES: usize = 32 * 1024 * 1024;

/// A worker speaking the txt2img protocol at a fixed URL
pub struct HttpBackend {
    name: String,
    client: Client,
    generate_url: String,
    health_url: Option<String>,
}

/// Worker API request
#[derive(Debug, Serialize)]
struct ApiGenerateRequest<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    steps: u32,
    width: u32,
    height: u32,
}

/// Worker API response; `images` is the txt2img shape, `data` the OpenAI one
#[derive(Debug, Deserialize)]
struct ApiGenerateResponse {
    #[serde(default)]
    images: Vec<ApiImage>,
    #[serde(default)]
    data: Vec<ApiImage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiImage {
    Encoded(String),
    Object(ApiImageData),
}

#[derive(Debug, Deserialize)]
struct ApiImageData {
    #[serde(default, alias = "base64")]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl ApiImage {
    fn payload(self) -> Option<String> {
        match self {
            Self::Encoded(data) => Some(data),
            Self::Object(obj) => obj.b64_json.or(obj.url),
        }
    }
}

impl HttpBackend {
    /// Backend that posts to `generate_url` verbatim
    pub fn new(name: impl Into<String>, client: Client, generate_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            generate_url: generate_url.into(),
            health_url: None,
        }
    }

    pub fn with_health_url(mut self, health_url: impl Into<String>) -> Self {
        self.health_url = Some(health_url.into());
        self
    }

    /// Backend for the fast path tunnel with its own request timeout
    pub fn fast_path(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::new("fast-path", client, url))
    }
}

#[async_trait]
impl ImageBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> DispatchOutcome {
        debug!(backend = %self.name, url = %self.generate_url, "Sending generate request");

        let api_request = ApiGenerateRequest {
            prompt: &request.prompt,
            negative_prompt: &request.negative_prompt,
            steps: request.steps,
            width: request.width,
            height: request.height,
        };

        let response = match self
            .client
            .post(&self.generate_url)
            .json(&api_request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return DispatchOutcome::transient(format!(
                    "request to {} failed: {}",
                    self.generate_url, e
                ))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return DispatchOutcome::transient(format!("worker returned {}: {}", status, body));
        }

        let api_response = match response.json::<ApiGenerateResponse>().await {
            Ok(parsed) => parsed,
            Err(e) => {
                return DispatchOutcome::Failure {
                    kind: FailureKind::of(&e),
                    reason: format!("failed to parse worker response: {}", e),
                }
            }
        };

        let payload = api_response
            .images
            .into_iter()
            .chain(api_response.data)
            .find_map(ApiImage::payload);

        match payload {
            Some(payload) => resolve_image(&self.client, &payload).await,
            None => DispatchOutcome::protocol("worker response carried no image"),
        }
    }

    async fn health_check(&self) -> bool {
        let Some(url) = &self.health_url else {
            return true;
        };

        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(backend = %self.name, status = %response.status(), "Health check failed");
                false
            }
            Err(e) => {
                debug!(backend = %self.name, error = %e, "Health check failed");
                false
            }
        }
    }
}

/// Turn a backend image payload (inline base64 or a URL) into stored bytes
pub(crate) async fn resolve_image(client: &Client, payload: &str) -> DispatchOutcome {
    let raw = if base64::is_remote_reference(payload) {
        match download(client, payload, MAX_DOWNLOAD_BYTES).await {
            Ok(bytes) => bytes,
            Err(outcome) => return outcome,
        }
    } else {
        match base64::decode(payload) {
            Ok(bytes) => bytes,
            Err(e) => return DispatchOutcome::protocol(e.to_string()),
        }
    };

    match tokio::task::spawn_blocking(move || codec::normalize(raw)).await {
        Ok(Ok((bytes, format))) => DispatchOutcome::Success { bytes, format },
        Ok(Err(e)) => DispatchOutcome::protocol(format!("undecodable image: {}", e)),
        Err(e) => DispatchOutcome::transient(format!("normalize task failed: {}", e)),
    }
}

async fn download(
    client: &Client,
    url: &str,
    limit: usize,
) -> std::result::Result<Vec<u8>, DispatchOutcome> {
    let failed = |e: reqwest::Error| {
        warn!(url = %url, error = %e, "Failed to download generated image");
        DispatchOutcome::transient(format!("download of {} failed: {}", url, e))
    };
    let too_large = || {
        warn!(url = %url, limit = limit, "Generated image exceeds download limit");
        DispatchOutcome::protocol(format!("download of {} exceeds {} bytes", url, limit))
    };

    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(failed)?;

    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(too_large());
    }

    // Content-Length may be absent or wrong; enforce the cap while reading
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(failed)? {
        if bytes.len() + chunk.len() > limit {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Connects pool workers over HTTP with a shared client
pub struct HttpConnector {
    client: Client,
    generate_path: String,
    health_check_path: String,
}

impl HttpConnector {
    pub fn new(timeout: Duration, generate_path: &str, health_check_path: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            generate_path: generate_path.to_string(),
            health_check_path: health_check_path.to_string(),
        })
    }
}

impl WorkerConnector for HttpConnector {
    fn connect(&self, url: &str) -> Arc<dyn ImageBackend> {
        let base = url.trim_end_matches('/');
        Arc::new(
            HttpBackend::new(
                url,
                self.client.clone(),
                format!("{}{}", base, self.generate_path),
            )
            .with_health_url(format!("{}{}", base, self.health_check_path)),
        )
    }
}
