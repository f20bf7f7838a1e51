//! The image value passed between pipeline stages.

use ndarray::Array3;
use shared::image_proc::DecodedImage;
use shared::PixelShape;

/// Pixels shaped `(height, width, channels)` plus the intensity of full white.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub pixels: Array3<f64>,
    pub white_level: f64,
}

impl Frame {
    pub fn new(pixels: Array3<f64>, white_level: f64) -> Self {
        Self {
            pixels,
            white_level,
        }
    }

    pub fn shape(&self) -> PixelShape {
        let (rows, cols, _) = self.pixels.dim();
        PixelShape::from_array_dim((rows, cols))
    }

    pub fn channels(&self) -> usize {
        self.pixels.dim().2
    }

    /// Same white level, new pixels.
    pub fn with_pixels(&self, pixels: Array3<f64>) -> Self {
        Self::new(pixels, self.white_level)
    }

    /// Clip every pixel to `[0, white_level]`.
    pub fn clip_to_range(&mut self) {
        let white = self.white_level;
        self.pixels.mapv_inplace(|v| v.clamp(0.0, white));
    }
}

impl From<DecodedImage> for Frame {
    fn from(decoded: DecodedImage) -> Self {
        Self::new(decoded.pixels, decoded.white_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_and_clip() {
        let mut frame = Frame::new(
            Array3::from_shape_fn((2, 3, 1), |(r, c, _)| r as f64 * 200.0 - c as f64),
            255.0,
        );
        assert_eq!(frame.shape(), PixelShape::new(3, 2));
        assert_eq!(frame.channels(), 1);

        frame.clip_to_range();
        assert_eq!(frame.pixels[[0, 2, 0]], 0.0);
        assert_eq!(frame.pixels[[1, 0, 0]], 200.0);
        assert!(frame.pixels.iter().all(|&v| (0.0..=255.0).contains(&v)));
    }
}
