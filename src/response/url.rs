//! Public URLs for image locators

use serde::{Deserialize, Serialize};

use crate::storage::ContentKey;

/// Where the result of a generation request can be fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImageLocator {
    /// Image held by the result store under its content hash
    Stored(ContentKey),
    /// Static substitute returned when every backend failed
    Placeholder(String),
}

impl ImageLocator {
    pub fn key(&self) -> Option<&ContentKey> {
        match self {
            Self::Stored(key) => Some(key),
            Self::Placeholder(_) => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder(_))
    }
}

/// Renders locators against the public image route
#[derive(Debug, Clone)]
pub struct UrlHandler {
    url_prefix: String,
}

impl UrlHandler {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn generate_url(&self, locator: &ImageLocator) -> String {
        match locator {
            ImageLocator::Stored(key) => format!("{}/{}", self.url_prefix, key),
            ImageLocator::Placeholder(url) => url.clone(),
        }
    }
}
