//! Static prompt policy

use crate::backend::GenerationRequest;
use crate::config::PromptConfig;
use crate::error::{AppError, Result};

/// Turns a user prompt into the request every backend receives
#[derive(Debug, Clone)]
pub struct PromptPolicy {
    enhance_prefix: String,
    negative_prompt: String,
    steps: u32,
    default_width: u32,
    default_height: u32,
}

impl PromptPolicy {
    pub fn new(config: &PromptConfig) -> Self {
        Self {
            enhance_prefix: config.enhance_prefix.clone(),
            negative_prompt: config.negative_prompt.clone(),
            steps: config.steps,
            default_width: config.default_width,
            default_height: config.default_height,
        }
    }

    /// Validate user input and apply the policy
    pub fn prepare(
        &self,
        prompt: &str,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<GenerationRequest> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::InvalidRequest("prompt must not be empty".to_string()));
        }

        let width = width.unwrap_or(self.default_width);
        let height = height.unwrap_or(self.default_height);
        if width == 0 || height == 0 {
            return Err(AppError::InvalidRequest(
                "width and height must be positive".to_string(),
            ));
        }

        Ok(GenerationRequest {
            prompt: format!("{}{}", self.enhance_prefix, prompt),
            negative_prompt: self.negative_prompt.clone(),
            steps: self.steps,
            width,
            height,
        })
    }
}

impl Default for PromptPolicy {
    fn default() -> Self {
        Self::new(&PromptConfig::default())
    }
}
