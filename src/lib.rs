//! Image Generation Failover Gateway
//!
//! Serves text-to-image requests from a chain of interchangeable backends: a
//! capacity-limited fast path, a pool of self-hosted workers and a metered
//! cloud provider, with a static placeholder as the last resort. Results are
//! stored once, keyed by their content hash.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod response;
pub mod storage;

pub use error::{AppError, Result};

use std::sync::Arc;

use gateway::{DispatchEngine, PromptPolicy};
use response::UrlHandler;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub engine: Arc<DispatchEngine>,
    pub prompt_policy: PromptPolicy,
    pub urls: UrlHandler,
}

impl AppState {
    pub fn new(settings: Arc<config::Settings>, engine: Arc<DispatchEngine>) -> Self {
        Self {
            prompt_policy: PromptPolicy::new(&settings.prompt),
            urls: UrlHandler::new(settings.storage.url_prefix.clone()),
            settings,
            engine,
        }
    }
}
