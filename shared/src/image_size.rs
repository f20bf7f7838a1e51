//! Image dimensions and size utilities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Spatial size of an image.
///
/// Stored as width/height (graphics order). ndarray images in this workspace are
/// indexed `[row, col, channel]`, so use [`PixelShape::array_dim`] and
/// [`PixelShape::from_array_dim`] when crossing over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PixelShape {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl PixelShape {
    /// Create a new PixelShape
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Square shape with the given side length
    pub fn square(side: usize) -> Self {
        Self::new(side, side)
    }

    /// Get total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// True when either side is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Shape of an array whose first two axes are (rows, cols).
    pub fn from_array_dim(dim: (usize, usize)) -> Self {
        Self::new(dim.1, dim.0)
    }

    /// (rows, cols) for ndarray construction.
    pub fn array_dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Geometric center in pixel-center coordinates.
    ///
    /// Pixel `i` covers `[i - 0.5, i + 0.5]`, so the center of a 4-pixel row is 1.5.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.width as f64 - 1.0) / 2.0,
            (self.height as f64 - 1.0) / 2.0,
        )
    }

    /// Corner coordinates in pixel-center convention, clockwise from top-left.
    pub fn corners(&self) -> [(f64, f64); 4] {
        let right = self.width as f64 - 1.0;
        let bottom = self.height as f64 - 1.0;
        [(0.0, 0.0), (right, 0.0), (right, bottom), (0.0, bottom)]
    }
}

impl Default for PixelShape {
    fn default() -> Self {
        Self::square(512)
    }
}

impl fmt::Display for PixelShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
