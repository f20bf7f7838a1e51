//! Planar projective transforms estimated from four point correspondences.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

/// Homogeneous weights below this magnitude are treated as points at infinity.
const HORIZON_EPS: f64 = 1e-12;

/// A 3x3 planar homography acting on `(x, y)` points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn from_matrix(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Solve for the homography mapping each `src[i]` onto `dst[i]`.
    ///
    /// Fixes `h33 = 1` and solves the resulting 8x8 linear system. Returns `None`
    /// for degenerate configurations (three collinear points, repeated points).
    pub fn from_correspondences(src: &[(f64, f64); 4], dst: &[(f64, f64); 4]) -> Option<Self> {
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for (i, (&(x, y), &(u, v))) in src.iter().zip(dst.iter()).enumerate() {
            let r = 2 * i;
            a[(r, 0)] = x;
            a[(r, 1)] = y;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -u * x;
            a[(r, 7)] = -u * y;
            b[r] = u;

            a[(r + 1, 3)] = x;
            a[(r + 1, 4)] = y;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -v * x;
            a[(r + 1, 7)] = -v * y;
            b[r + 1] = v;
        }

        let h = a.lu().solve(&b)?;
        if h.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let matrix = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
        if matrix.determinant().abs() < HORIZON_EPS {
            return None;
        }
        Some(Self { matrix })
    }

    pub fn inverse(&self) -> Option<Self> {
        self.matrix.try_inverse().map(|matrix| Self { matrix })
    }

    /// Map a point. Returns `None` for points sent to infinity.
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.matrix * Vector3::new(x, y, 1.0);
        if p.z.abs() < HORIZON_EPS {
            return None;
        }
        Some((p.x / p.z, p.y / p.z))
    }
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}
