//! Common traits and types for image generation backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::storage::ImageFormat;

/// Request sent to every backend in the failover chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Enhanced prompt (quality prefix already applied)
    pub prompt: String,

    /// Negative prompt, injected by policy
    pub negative_prompt: String,

    /// Number of inference steps, injected by policy
    pub steps: u32,

    pub width: u32,

    pub height: u32,
}

/// Why a backend call did not produce an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeout, refused connection, non-2xx status
    Transient,
    /// The backend answered but the payload was not what the protocol promises
    Protocol,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Protocol => f.write_str("protocol"),
        }
    }
}

impl FailureKind {
    /// Classify a client error
    pub fn of(error: &reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Protocol
        } else {
            Self::Transient
        }
    }
}

/// Result of a single backend call
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Success {
        bytes: Vec<u8>,
        format: ImageFormat,
    },
    /// Accepted but not finished; `ticket` identifies the job for a later fetch
    Pending {
        retry_after: Option<Duration>,
        ticket: Option<String>,
    },
    Failure {
        kind: FailureKind,
        reason: String,
    },
}

impl DispatchOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Failure {
            kind: FailureKind::Transient,
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Failure {
            kind: FailureKind::Protocol,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Trait for image generation backends
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Backend name, used in logs
    fn name(&self) -> &str;

    /// Submit a generation request
    async fn generate(&self, request: &GenerationRequest) -> DispatchOutcome;

    /// Fetch the result of a job that previously answered `Pending`
    async fn fetch(&self, ticket: &str) -> DispatchOutcome {
        DispatchOutcome::protocol(format!(
            "backend {} cannot resume job {}",
            self.name(),
            ticket
        ))
    }

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

/// Builds a client for a pool worker from its registered URL
pub trait WorkerConnector: Send + Sync {
    fn connect(&self, url: &str) -> Arc<dyn ImageBackend>;
}
