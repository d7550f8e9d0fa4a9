//! Cropping and encoding helpers.

use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageOutputFormat};

use trapdata_models::BoundingBox;

use crate::error::MlResult;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Crop `bbox` out of `image`, clamped to the image bounds.
///
/// Returns `None` when the box does not overlap the image.
pub fn crop(image: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
    let (x, y, width, height) = bbox.to_pixel_rect(image.width(), image.height())?;
    Some(image.crop_imm(x, y, width, height))
}

/// Encode as JPEG. Alpha is dropped since JPEG has no alpha channel.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> MlResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buf, ImageOutputFormat::Jpeg(quality))?;
    Ok(buf.into_inner())
}

pub fn encode_jpeg_base64(image: &DynamicImage, quality: u8) -> MlResult<String> {
    Ok(STANDARD.encode(encode_jpeg(image, quality)?))
}

/// Write `image` to `path` as JPEG.
pub fn save_jpeg(image: &DynamicImage, path: &Path) -> MlResult<()> {
    DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path, image::ImageFormat::Jpeg)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_crop_clamps_to_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 50));
        let cropped = crop(&image, &BoundingBox::new(90.0, 40.0, 120.0, 80.0)).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (10, 10));

        assert!(crop(&image, &BoundingBox::new(200.0, 0.0, 210.0, 10.0)).is_none());
    }

    #[test]
    fn test_encode_jpeg_drops_alpha() {
        let image = DynamicImage::new_rgba8(8, 8);
        let bytes = encode_jpeg(&image, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(!encode_jpeg_base64(&image, DEFAULT_JPEG_QUALITY)
            .unwrap()
            .is_empty());
    }
}
