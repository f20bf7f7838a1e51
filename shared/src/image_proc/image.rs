//! Conversions between `image` crate buffers and ndarray images.
//!
//! Images are `Array3<f64>` indexed `[row, col, channel]` with shape
//! `(height, width, channels)`. The `image` crate uses `(x, y)` addressing with
//! `(width, height)` dimensions; both raw buffers are row-major and interleaved,
//! so the conversion is a reshape plus a numeric cast.
//!
//! Pixel values keep the units of the source encoding. The returned white level
//! records what "full white" means for those units (255 for 8-bit, 65535 for
//! 16-bit, 1.0 for float images).

use image::{ColorType, DynamicImage, GrayImage, RgbImage};
use ndarray::{Array3, ShapeError};
use thiserror::Error;

/// Errors converting between array and image representations.
#[derive(Error, Debug)]
pub enum ImageConversionError {
    #[error("cannot encode an image with {0} channels (expected 1 or 3)")]
    UnsupportedChannels(usize),
    #[error("white level must be positive and finite, got {0}")]
    InvalidWhiteLevel(f64),
    #[error("pixel buffer does not match image dimensions: {0}")]
    Shape(#[from] ShapeError),
    #[error("image buffer of {width}x{height} could not be created")]
    Buffer { width: usize, height: usize },
}

/// Decoded image with its white level.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: Array3<f64>,
    pub white_level: f64,
}

/// Convert a decoded image into an `(height, width, channels)` array.
///
/// Gray and gray+alpha sources become one channel, everything else becomes
/// RGB. Alpha is dropped. 16-bit sources keep their full range.
pub fn dynamic_image_to_array3(img: &DynamicImage) -> Result<DecodedImage, ImageConversionError> {
    let (width, height) = (img.width() as usize, img.height() as usize);

    let (raw, channels, white_level): (Vec<f64>, usize, f64) = match img.color() {
        ColorType::L8 | ColorType::La8 => (
            img.to_luma8().into_raw().into_iter().map(f64::from).collect(),
            1,
            255.0,
        ),
        ColorType::L16 | ColorType::La16 => (
            img.to_luma16().into_raw().into_iter().map(f64::from).collect(),
            1,
            65535.0,
        ),
        ColorType::Rgb16 | ColorType::Rgba16 => (
            img.to_rgb16().into_raw().into_iter().map(f64::from).collect(),
            3,
            65535.0,
        ),
        ColorType::Rgb32F | ColorType::Rgba32F => (
            img.to_rgb32f().into_raw().into_iter().map(f64::from).collect(),
            3,
            1.0,
        ),
        _ => (
            img.to_rgb8().into_raw().into_iter().map(f64::from).collect(),
            3,
            255.0,
        ),
    };

    let pixels = Array3::from_shape_vec((height, width, channels), raw)?;
    Ok(DecodedImage {
        pixels,
        white_level,
    })
}

/// Encode an array as an 8-bit image, mapping `[0, white_level]` to `[0, 255]`.
///
/// Values outside the range are clipped.
pub fn array3_to_dynamic_image(
    pixels: &Array3<f64>,
    white_level: f64,
) -> Result<DynamicImage, ImageConversionError> {
    if !(white_level.is_finite() && white_level > 0.0) {
        return Err(ImageConversionError::InvalidWhiteLevel(white_level));
    }

    let (height, width, channels) = pixels.dim();
    let scale = 255.0 / white_level;
    let raw: Vec<u8> = pixels
        .iter()
        .map(|&v| (v * scale).round().clamp(0.0, 255.0) as u8)
        .collect();

    let buffer_err = || ImageConversionError::Buffer { width, height };
    match channels {
        1 => GrayImage::from_raw(width as u32, height as u32, raw)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(buffer_err),
        3 => RgbImage::from_raw(width as u32, height as u32, raw)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(buffer_err),
        n => Err(ImageConversionError::UnsupportedChannels(n)),
    }
}
