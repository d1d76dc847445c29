mod encoded;

pub use encoded::{
    mime_for_extension, same_image, EncodedImage, SharedImage, SUPPORTED_MIME_TYPES,
};

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::EncodedImage;

    pub(crate) fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap_or_default();
        out
    }

    pub(crate) fn png_image(color: [u8; 3]) -> EncodedImage {
        EncodedImage::from_bytes(&png_bytes(4, 3, color), "image/png")
            .unwrap_or_else(|err| panic!("fixture png must encode: {err}"))
    }
}
