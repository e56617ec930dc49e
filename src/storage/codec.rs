//! Image format sniffing and transcoding

use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::{AppError, Result};

/// Formats the store persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Webp,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 2] = [ImageFormat::Png, ImageFormat::Webp];

    /// Detect the format from magic bytes
    pub fn detect(data: &[u8]) -> Option<Self> {
        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // WebP: RIFF....WEBP
        if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::Webp);
        }

        None
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    fn as_image_format(&self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Webp => image::ImageFormat::WebP,
        }
    }
}

/// Bring backend output into a storable format.
///
/// PNG and WebP pass through untouched; any other decodable image is
/// re-encoded as PNG.
pub fn normalize(data: Vec<u8>) -> Result<(Vec<u8>, ImageFormat)> {
    if let Some(format) = ImageFormat::detect(&data) {
        return Ok((data, format));
    }

    let decoded = image::load_from_memory(&data)?;
    let png = encode(&decoded, ImageFormat::Png)?;
    Ok((png, ImageFormat::Png))
}

/// Convert stored bytes into another format
pub fn transcode(data: &[u8], target: ImageFormat) -> Result<Vec<u8>> {
    if ImageFormat::detect(data) == Some(target) {
        return Ok(data.to_vec());
    }

    let decoded = image::load_from_memory(data)?;
    encode(&decoded, target)
}

fn encode(image: &image::DynamicImage, target: ImageFormat) -> Result<Vec<u8>> {
    // The WebP encoder only takes 8-bit RGB(A)
    let image = match target {
        ImageFormat::Webp => image::DynamicImage::ImageRgba8(image.to_rgba8()),
        ImageFormat::Png => image.clone(),
    };

    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, target.as_image_format())
        .map_err(AppError::Codec)?;
    Ok(out.into_inner())
}
