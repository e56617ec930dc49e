//! Client for the metered cloud text2img provider

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::http_backend::resolve_image;
use crate::backend::traits::{DispatchOutcome, FailureKind, GenerationRequest, ImageBackend};
use crate::config::CloudConfig;
use crate::error::{AppError, Result};

/// Paid provider reached after self-hosted workers are exhausted
pub struct CloudBackend {
    client: Client,
    endpoint: Url,
    api_key: String,
    embeddings_model: String,
    guidance_scale: f32,
}

/// Provider request; the API takes sizes and counts as strings
#[derive(Debug, Serialize)]
struct CloudGenerateRequest<'a> {
    key: &'a str,
    prompt: &'a str,
    negative_prompt: &'a str,
    width: String,
    height: String,
    samples: String,
    num_inference_steps: String,
    guidance_scale: f32,
    safety_checker: &'a str,
    embeddings_model: &'a str,
}

#[derive(Debug, Serialize)]
struct CloudFetchRequest<'a> {
    key: &'a str,
}

#[derive(Debug, Deserialize)]
struct CloudResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    output: Vec<String>,
    /// Estimated seconds until a processing job completes
    #[serde(default)]
    eta: Option<f64>,
    #[serde(default)]
    fetch_result: Option<String>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

impl CloudBackend {
    pub fn new(config: &CloudConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            AppError::Config(::config::ConfigError::Message(format!(
                "Invalid cloud endpoint '{}': {}",
                config.endpoint, e
            )))
        })?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            embeddings_model: config.embeddings_model.clone(),
            guidance_scale: config.guidance_scale,
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, url: Url, body: &T) -> DispatchOutcome {
        let response = match self.client.post(url).json(body).send().await {
            Ok(response) => response,
            Err(e) => return DispatchOutcome::transient(format!("cloud request failed: {}", e)),
        };

        let status = response.status();
        if !status.is_success() {
            return DispatchOutcome::transient(format!("cloud provider returned {}", status));
        }

        match response.json::<CloudResponse>().await {
            Ok(parsed) => self.interpret(parsed).await,
            Err(e) => DispatchOutcome::Failure {
                kind: FailureKind::of(&e),
                reason: format!("failed to parse cloud response: {}", e),
            },
        }
    }

    async fn interpret(&self, response: CloudResponse) -> DispatchOutcome {
        match response.status.as_str() {
            "success" => match response.output.first() {
                Some(payload) => resolve_image(&self.client, payload).await,
                None => DispatchOutcome::protocol("cloud provider reported success without output"),
            },
            "processing" => {
                let retry_after = response
                    .eta
                    .filter(|eta| eta.is_finite() && *eta > 0.0)
                    .map(Duration::from_secs_f64);
                debug!(eta = ?retry_after, ticket = ?response.fetch_result, "Cloud job still processing");
                DispatchOutcome::Pending {
                    retry_after,
                    ticket: response.fetch_result,
                }
            }
            other => {
                let message = response
                    .message
                    .map(|m| m.to_string())
                    .unwrap_or_default();
                warn!(status = %other, message = %message, "Cloud provider rejected request");
                DispatchOutcome::transient(format!("cloud provider status '{}': {}", other, message))
            }
        }
    }
}

#[async_trait]
impl ImageBackend for CloudBackend {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn generate(&self, request: &GenerationRequest) -> DispatchOutcome {
        let body = CloudGenerateRequest {
            key: &self.api_key,
            prompt: &request.prompt,
            negative_prompt: &request.negative_prompt,
            width: request.width.to_string(),
            height: request.height.to_string(),
            samples: "1".to_string(),
            num_inference_steps: request.steps.to_string(),
            guidance_scale: self.guidance_scale,
            safety_checker: "yes",
            embeddings_model: &self.embeddings_model,
        };

        self.post(self.endpoint.clone(), &body).await
    }

    async fn fetch(&self, ticket: &str) -> DispatchOutcome {
        // The ticket comes from the provider's response; never send the key elsewhere
        let url = match Url::parse(ticket) {
            Ok(url) if url.origin() == self.endpoint.origin() => url,
            Ok(url) => {
                warn!(ticket = %url, "Cloud fetch ticket points at a foreign origin");
                return DispatchOutcome::protocol(format!(
                    "fetch ticket origin {} differs from endpoint",
                    url.origin().ascii_serialization()
                ));
            }
            Err(e) => return DispatchOutcome::protocol(format!("invalid fetch ticket: {}", e)),
        };

        self.post(url, &CloudFetchRequest { key: &self.api_key })
            .await
    }
}
