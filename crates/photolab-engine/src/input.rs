use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::ImageFormat;
use photolab_contracts::images::{mime_for_extension, EncodedImage};

/// Largest file accepted by the input adapter.
pub const MAX_INPUT_BYTES: u64 = 20 * 1024 * 1024;

/// Reads an image file into an encoded image. The MIME type comes from the
/// extension when recognised, otherwise from the file's magic bytes.
pub fn load_image_file(path: &Path) -> Result<EncodedImage> {
    let metadata =
        fs::metadata(path).with_context(|| format!("failed reading {}", path.display()))?;
    if !metadata.is_file() {
        bail!("{} is not a file", path.display());
    }
    if metadata.len() > MAX_INPUT_BYTES {
        bail!(
            "{} is {} bytes; the limit is {} bytes",
            path.display(),
            metadata.len(),
            MAX_INPUT_BYTES
        );
    }
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let mime = mime_for_path(path)
        .or_else(|| sniff_mime(&bytes))
        .with_context(|| format!("{} is not a supported image", path.display()))?;
    EncodedImage::from_bytes(&bytes, mime)
        .with_context(|| format!("{} is not a usable image", path.display()))
}

/// Accepts either a `data:` URI or a filesystem path.
pub fn load_image_reference(raw: &str) -> Result<EncodedImage> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("no image path given");
    }
    if trimmed.starts_with("data:") {
        return EncodedImage::from_data_uri(trimmed).context("invalid image data URI");
    }
    load_image_file(Path::new(trimmed))
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|value| value.to_str())
        .and_then(mime_for_extension)
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}
