//! 2D convolution operations for ndarray
//!
//! Same-size convolution (output has the input's shape) with configurable edge
//! handling. Two implementations produce the same result:
//!
//! - **Direct**: sliding window, parallelized over output pixels with rayon.
//! - **FFT**: the edge-extended input is padded to the linear-convolution size
//!   and multiplied with the kernel spectrum using rustfft. No circular wrap
//!   reaches the retained output window.
//!
//! This is true convolution (the kernel is flipped). The kernel center is
//! `(rows / 2, cols / 2)`, so a unit impulse at the center is the identity.

use ndarray::{Array2, ArrayView2, Axis, Zip};
use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use std::sync::Arc;

/// Kernels with at most this many taps use direct convolution under [`ConvolveMethod::Auto`].
pub const AUTO_DIRECT_MAX_TAPS: usize = 15 * 15;

/// Options for controlling the convolution operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvolveOptions {
    /// Whether to use parallel processing with rayon (direct method only)
    pub parallel: bool,

    /// Controls how edges are handled
    pub edge_mode: EdgeMode,

    /// Algorithm selection
    pub method: ConvolveMethod,
}

impl Default for ConvolveOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            edge_mode: EdgeMode::Extend,
            method: ConvolveMethod::Auto,
        }
    }
}

/// Convolution algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvolveMethod {
    Direct,
    Fft,
    /// Direct for small kernels, FFT above [`AUTO_DIRECT_MAX_TAPS`]
    Auto,
}

/// Edge handling modes, shared by convolution and geometric resampling
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeMode {
    /// Uses a constant value for pixels outside image bounds
    Constant(f64),

    /// Mirrors the image at the edges (edge pixel repeated)
    Reflect,

    /// Wraps around to the other side of the image
    Wrap,

    /// Extends the edge pixels outward
    Extend,
}

impl EdgeMode {
    /// Map a possibly out-of-bounds (row, col) to an in-bounds one.
    ///
    /// Returns `None` for [`EdgeMode::Constant`] outside the image, in which case
    /// the constant is used. `rows` and `cols` must be non-zero.
    #[inline]
    pub fn resolve(&self, i: isize, j: isize, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let (r, c) = (rows as isize, cols as isize);
        if i >= 0 && i < r && j >= 0 && j < c {
            return Some((i as usize, j as usize));
        }

        match self {
            EdgeMode::Constant(_) => None,
            EdgeMode::Reflect => Some((reflect_index(i, r), reflect_index(j, c))),
            EdgeMode::Wrap => Some((i.rem_euclid(r) as usize, j.rem_euclid(c) as usize)),
            EdgeMode::Extend => Some((i.clamp(0, r - 1) as usize, j.clamp(0, c - 1) as usize)),
        }
    }

    /// Read `input[i, j]` with this edge policy applied.
    #[inline]
    pub fn pixel(&self, input: &ArrayView2<f64>, i: isize, j: isize) -> f64 {
        let (rows, cols) = input.dim();
        match self.resolve(i, j, rows, cols) {
            Some(idx) => input[idx],
            None => match self {
                EdgeMode::Constant(value) => *value,
                _ => 0.0,
            },
        }
    }
}

// Symmetric reflection with period 2 * size, valid for any offset
fn reflect_index(idx: isize, size: isize) -> usize {
    let period = 2 * size;
    let m = idx.rem_euclid(period);
    if m < size {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Convolve a 2D array with a kernel, returning an array of the input's shape.
pub fn convolve2d(
    input: &ArrayView2<f64>,
    kernel: &ArrayView2<f64>,
    options: ConvolveOptions,
) -> Array2<f64> {
    if input.is_empty() || kernel.is_empty() {
        return Array2::zeros(input.dim());
    }

    let use_fft = match options.method {
        ConvolveMethod::Direct => false,
        ConvolveMethod::Fft => true,
        ConvolveMethod::Auto => kernel.len() > AUTO_DIRECT_MAX_TAPS,
    };

    if use_fft {
        convolve_fft(input, kernel, options.edge_mode)
    } else {
        convolve_direct(input, kernel, options.edge_mode, options.parallel)
    }
}

fn convolve_direct(
    input: &ArrayView2<f64>,
    kernel: &ArrayView2<f64>,
    edge_mode: EdgeMode,
    parallel: bool,
) -> Array2<f64> {
    let (kernel_rows, kernel_cols) = kernel.dim();
    let kr = (kernel_rows / 2) as isize;
    let kc = (kernel_cols / 2) as isize;

    let tap = |i: usize, j: usize| -> f64 {
        let mut sum = 0.0;
        for ki in 0..kernel_rows {
            for kj in 0..kernel_cols {
                let ii = i as isize + kr - ki as isize;
                let jj = j as isize + kc - kj as isize;
                sum += edge_mode.pixel(input, ii, jj) * kernel[[ki, kj]];
            }
        }
        sum
    };

    let mut output = Array2::zeros(input.dim());
    if parallel {
        Zip::indexed(&mut output).par_for_each(|(i, j), out| *out = tap(i, j));
    } else {
        Zip::indexed(&mut output).for_each(|(i, j), out| *out = tap(i, j));
    }
    output
}

fn convolve_fft(input: &ArrayView2<f64>, kernel: &ArrayView2<f64>, edge_mode: EdgeMode) -> Array2<f64> {
    let (rows, cols) = input.dim();
    let (kernel_rows, kernel_cols) = kernel.dim();
    let (kr, kc) = (kernel_rows / 2, kernel_cols / 2);

    // Linear convolution size; output pixel (i, j) sits at (i + kh - 1, j + kw - 1)
    let n_rows = rows + kernel_rows - 1;
    let n_cols = cols + kernel_cols - 1;
    let row_offset = (kernel_rows - 1 - kr) as isize;
    let col_offset = (kernel_cols - 1 - kc) as isize;

    let mut padded = Array2::from_shape_fn((n_rows, n_cols), |(p, q)| {
        let value = edge_mode.pixel(input, p as isize - row_offset, q as isize - col_offset);
        Complex64::new(value, 0.0)
    });
    let mut spectrum = Array2::from_elem((n_rows, n_cols), Complex64::new(0.0, 0.0));
    for ((ki, kj), &k) in kernel.indexed_iter() {
        spectrum[[ki, kj]] = Complex64::new(k, 0.0);
    }

    let mut planner = FftPlanner::<f64>::new();
    let row_fft = planner.plan_fft_forward(n_cols);
    let col_fft = planner.plan_fft_forward(n_rows);
    fft2(&mut padded, &row_fft, &col_fft);
    fft2(&mut spectrum, &row_fft, &col_fft);

    Zip::from(&mut padded)
        .and(&spectrum)
        .for_each(|p, &k| *p *= k);

    let row_ifft = planner.plan_fft_inverse(n_cols);
    let col_ifft = planner.plan_fft_inverse(n_rows);
    fft2(&mut padded, &row_ifft, &col_ifft);

    let scale = 1.0 / (n_rows * n_cols) as f64;
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        padded[[i + kernel_rows - 1, j + kernel_cols - 1]].re * scale
    })
}

// Separable 2D transform: every row, then every column
fn fft2(data: &mut Array2<Complex64>, row_fft: &Arc<dyn Fft<f64>>, col_fft: &Arc<dyn Fft<f64>>) {
    fft_lanes(data, Axis(1), row_fft);
    fft_lanes(data, Axis(0), col_fft);
}

fn fft_lanes(data: &mut Array2<Complex64>, axis: Axis, fft: &Arc<dyn Fft<f64>>) {
    let mut buffer = vec![Complex64::new(0.0, 0.0); data.len_of(axis)];
    for mut lane in data.lanes_mut(axis) {
        buffer.iter_mut().zip(lane.iter()).for_each(|(b, v)| *b = *v);
        fft.process(&mut buffer);
        lane.iter_mut().zip(buffer.iter()).for_each(|(v, b)| *v = *b);
    }
}

/// Scale a kernel so its values sum to one.
///
/// Returns `None` when the sum is not positive and finite.
pub fn normalize_kernel(kernel: &ArrayView2<f64>) -> Option<Array2<f64>> {
    let sum = kernel.sum();
    if sum.is_finite() && sum > 0.0 {
        Some(kernel.mapv(|v| v / sum))
    } else {
        None
    }
}

/// Crop border rows and columns below `relative_threshold * peak`.
///
/// The crop is symmetric about the kernel center so the convolution result is
/// unchanged apart from the dropped near-zero taps. An axis whose support
/// cannot be cropped symmetrically is left as is.
pub fn trim_kernel_support(kernel: &ArrayView2<f64>, relative_threshold: f64) -> Array2<f64> {
    let peak = kernel.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if peak == 0.0 || !peak.is_finite() {
        return kernel.to_owned();
    }
    let threshold = peak * relative_threshold;

    let axis_extent = |axis: Axis| -> (usize, usize) {
        let len = kernel.len_of(axis);
        let center = len / 2;
        let significant: Vec<usize> = kernel
            .axis_iter(axis)
            .enumerate()
            .filter(|(_, lane)| lane.iter().any(|v| v.abs() > threshold))
            .map(|(idx, _)| idx)
            .collect();

        let (first, last) = match (significant.first(), significant.last()) {
            (Some(&f), Some(&l)) => (f, l),
            _ => return (0, len),
        };
        let half = center.abs_diff(first).max(center.abs_diff(last));
        if half <= center.min(len - 1 - center) {
            (center - half, center + half + 1)
        } else {
            (0, len)
        }
    };

    let (r0, r1) = axis_extent(Axis(0));
    let (c0, c1) = axis_extent(Axis(1));
    kernel.slice(ndarray::s![r0..r1, c0..c1]).to_owned()
}
