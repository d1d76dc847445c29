use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use photolab_contracts::images::EncodedImage;
use photolab_contracts::session::ComparisonSlider;

/// Letterbox colour behind images that do not fill the frame.
const BACKDROP: Rgba<u8> = Rgba([15, 23, 42, 255]);
const HANDLE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const HANDLE_HALF_WIDTH: u32 = 1;

/// Rasterises the comparison frame at the slider's current position.
///
/// The frame takes the after image's size. Both images are fitted into it
/// "contain" style; the before layer is built at full frame width and only
/// its left part is copied over, then the handle is drawn on the divider.
pub fn render_comparison(
    before: &EncodedImage,
    after: &EncodedImage,
    slider: &ComparisonSlider,
) -> Result<RgbaImage> {
    let after_image = decode(after).context("failed decoding enhanced image")?;
    let before_image = decode(before).context("failed decoding original image")?;
    let (frame_width, frame_height) = (after_image.width(), after_image.height());

    let mut frame = contained_layer(&after_image, frame_width, frame_height);
    let before_layer = contained_layer(&before_image, frame_width, frame_height);

    let layout = slider.layout(frame_width as f64);
    let clip = (layout.clip_width.round() as u32).min(frame_width);
    for y in 0..frame_height {
        for x in 0..clip {
            frame.put_pixel(x, y, *before_layer.get_pixel(x, y));
        }
    }

    let handle = (layout.handle_x.round() as u32).min(frame_width.saturating_sub(1));
    let handle_start = handle.saturating_sub(HANDLE_HALF_WIDTH);
    let handle_end = (handle + HANDLE_HALF_WIDTH).min(frame_width.saturating_sub(1));
    for y in 0..frame_height {
        for x in handle_start..=handle_end {
            frame.put_pixel(x, y, HANDLE);
        }
    }

    Ok(frame)
}

pub fn write_comparison_png(
    path: &Path,
    before: &EncodedImage,
    after: &EncodedImage,
    slider: &ComparisonSlider,
) -> Result<()> {
    let frame = render_comparison(before, after, slider)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    frame
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to save {}", path.display()))
}

fn decode(encoded: &EncodedImage) -> Result<DynamicImage> {
    let bytes = encoded.bytes()?;
    Ok(image::load_from_memory(&bytes)?)
}

fn contained_layer(source: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    let mut layer = RgbaImage::from_pixel(width, height, BACKDROP);
    if source.width() == 0 || source.height() == 0 {
        return layer;
    }
    let scale = f64::min(
        width as f64 / source.width() as f64,
        height as f64 / source.height() as f64,
    );
    let fitted_width = ((source.width() as f64 * scale).round() as u32).clamp(1, width);
    let fitted_height = ((source.height() as f64 * scale).round() as u32).clamp(1, height);
    let fitted = if (fitted_width, fitted_height) == (source.width(), source.height()) {
        source.to_rgba8()
    } else {
        imageops::resize(
            &source.to_rgba8(),
            fitted_width,
            fitted_height,
            FilterType::Triangle,
        )
    };
    let offset_x = (width - fitted_width) / 2;
    let offset_y = (height - fitted_height) / 2;
    imageops::overlay(&mut layer, &fitted, offset_x as i64, offset_y as i64);
    layer
}
