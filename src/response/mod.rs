//! Response helpers - base64 payloads and public image URLs

pub mod base64;
pub mod url;

pub use url::{ImageLocator, UrlHandler};
