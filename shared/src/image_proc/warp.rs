//! Bilinear resampling and inverse-mapped geometric warps.
//!
//! Coordinates follow the pixel-center convention: pixel `(col, row)` sits at
//! `x = col`, `y = row`. A warp is described by its inverse map, from an output
//! pixel to the source position it samples. Source positions outside the image
//! are resolved with an [`EdgeMode`].

use crate::image_proc::convolve2d::EdgeMode;
use crate::image_size::PixelShape;
use ndarray::{Array3, ArrayView2, Axis};
use rayon::prelude::*;

/// Bilinearly interpolate one channel at a fractional position.
#[inline]
pub fn sample_bilinear(channel: &ArrayView2<f64>, x: f64, y: f64, edge_mode: EdgeMode) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (col, row) = (x0 as isize, y0 as isize);

    let q00 = edge_mode.pixel(channel, row, col);
    let q01 = edge_mode.pixel(channel, row, col + 1);
    let q10 = edge_mode.pixel(channel, row + 1, col);
    let q11 = edge_mode.pixel(channel, row + 1, col + 1);

    q00 * (1.0 - fx) * (1.0 - fy) + q01 * fx * (1.0 - fy) + q10 * (1.0 - fx) * fy + q11 * fx * fy
}

/// Resample `image` onto a grid of `output` size through an inverse map.
///
/// `inverse_map(x, y)` returns the source position sampled by output pixel
/// `(x, y)`, or `None` when the point has no preimage (e.g. beyond a projective
/// horizon). Such pixels take the edge mode's constant, or 0 for other modes.
/// Rows are processed in parallel.
pub fn warp_image<F>(
    image: &Array3<f64>,
    output: PixelShape,
    edge_mode: EdgeMode,
    inverse_map: F,
) -> Array3<f64>
where
    F: Fn(f64, f64) -> Option<(f64, f64)> + Sync,
{
    let channels: Vec<ArrayView2<f64>> = image.axis_iter(Axis(2)).collect();
    let fill = match edge_mode {
        EdgeMode::Constant(value) => value,
        _ => 0.0,
    };

    let (rows, cols) = output.array_dim();
    let mut result = Array3::<f64>::zeros((rows, cols, channels.len()));
    if image.is_empty() {
        return result;
    }

    result
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(y, mut row)| {
            for x in 0..cols {
                match inverse_map(x as f64, y as f64) {
                    Some((sx, sy)) if sx.is_finite() && sy.is_finite() => {
                        for (c, channel) in channels.iter().enumerate() {
                            row[[x, c]] = sample_bilinear(channel, sx, sy, edge_mode);
                        }
                    }
                    _ => row.row_mut(x).fill(fill),
                }
            }
        });

    result
}

/// Resize with bilinear interpolation and pixel-area alignment.
///
/// Output pixel centers map to `(x + 0.5) * in / out - 0.5`, so a resize
/// preserves the image's extent rather than its corner pixels. Edges are
/// extended. A same-size resize returns a copy.
pub fn resize_bilinear(image: &Array3<f64>, output: PixelShape) -> Array3<f64> {
    let (in_rows, in_cols, _) = image.dim();
    if (in_rows, in_cols) == output.array_dim() {
        return image.clone();
    }

    let scale_x = in_cols as f64 / output.width as f64;
    let scale_y = in_rows as f64 / output.height as f64;
    warp_image(image, output, EdgeMode::Extend, |x, y| {
        Some(((x + 0.5) * scale_x - 0.5, (y + 0.5) * scale_y - 0.5))
    })
}
