use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;

use crate::errors::ImageError;

pub const SUPPORTED_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];

pub type SharedImage = Arc<EncodedImage>;

/// An image held as base64 text plus its MIME type.
///
/// Construction checks that the payload decodes and that the bytes are a
/// raster format we can display, so every value in circulation is usable.
/// Values are never mutated; a new selection replaces the whole image.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    payload: String,
    mime_type: String,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Result<Self, ImageError> {
        let mime_type = normalize_mime(mime_type)?;
        let format = image::guess_format(bytes).map_err(|_| ImageError::Undecodable)?;
        if !matches!(
            format,
            ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Gif
        ) {
            return Err(ImageError::Undecodable);
        }
        image::load_from_memory_with_format(bytes, format).map_err(|_| ImageError::Undecodable)?;
        Ok(Self {
            payload: BASE64.encode(bytes),
            mime_type,
        })
    }

    pub fn from_base64(payload: &str, mime_type: &str) -> Result<Self, ImageError> {
        let compact: String = payload.chars().filter(|ch| !ch.is_whitespace()).collect();
        let bytes = BASE64
            .decode(compact.as_bytes())
            .map_err(|_| ImageError::InvalidBase64)?;
        Self::from_bytes(&bytes, mime_type)
    }

    /// Parses `data:<mime>;base64,<payload>`.
    pub fn from_data_uri(uri: &str) -> Result<Self, ImageError> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or(ImageError::MalformedDataUri)?;
        let (header, payload) = rest.split_once(',').ok_or(ImageError::MalformedDataUri)?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or(ImageError::MalformedDataUri)?;
        Self::from_base64(payload, mime_type)
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> Result<Vec<u8>, ImageError> {
        BASE64
            .decode(self.payload.as_bytes())
            .map_err(|_| ImageError::InvalidBase64)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.payload)
    }

    /// Approximate decoded size without decoding.
    pub fn byte_len(&self) -> usize {
        let padding = self
            .payload
            .bytes()
            .rev()
            .take_while(|byte| *byte == b'=')
            .count();
        (self.payload.len() / 4) * 3 - padding
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }

    pub fn into_shared(self) -> SharedImage {
        Arc::new(self)
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("mime_type", &self.mime_type)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Identity used for the "currently displayed" marker: same allocation, or
/// byte-identical payloads.
pub fn same_image(left: &SharedImage, right: &SharedImage) -> bool {
    Arc::ptr_eq(left, right) || left == right
}

pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn normalize_mime(raw: &str) -> Result<String, ImageError> {
    let lowered = raw.trim().to_ascii_lowercase();
    let normalized = if lowered == "image/jpg" {
        "image/jpeg".to_string()
    } else {
        lowered
    };
    if SUPPORTED_MIME_TYPES.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(ImageError::UnsupportedMime(raw.trim().to_string()))
    }
}
