//! Shared image-processing and numeric components.
//!
//! Building blocks used by the precompensation data pipeline that are not tied
//! to its configuration model: array/image conversion, resampling and warps,
//! homographies, 2D convolution, per-worker seeding and statistics helpers.

pub mod algo;
pub mod image_proc;
pub mod image_size;

pub use image_size::PixelShape;
