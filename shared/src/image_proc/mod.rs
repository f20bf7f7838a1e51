//! Image processing primitives for the augmentation pipeline.
//!
//! # Module Organization
//!
//! - **convolve2d**: same-size 2D convolution (direct and FFT), kernel helpers
//! - **warp**: bilinear sampling, inverse-mapped warps, resizing
//! - **homography**: four-point projective transforms
//! - **image**: conversions between ndarray images and `image` crate buffers
//!
//! Images are `Array3<f64>` shaped `(height, width, channels)`.

pub mod convolve2d;
pub mod homography;
pub mod image;
pub mod warp;

pub use convolve2d::{
    convolve2d, normalize_kernel, trim_kernel_support, ConvolveMethod, ConvolveOptions, EdgeMode,
};
pub use homography::Homography;
pub use self::image::{
    array3_to_dynamic_image, dynamic_image_to_array3, DecodedImage, ImageConversionError,
};
pub use warp::{resize_bilinear, sample_bilinear, warp_image};
