//! Geometric stages: projective corner warp, rotation and rasterization.
//!
//! Warps are inverse-mapped and bilinearly resampled over every channel, with
//! out-of-bounds source positions resolved by a [`Border`] policy.

use super::Stage;
use crate::config::params::{Param, Params};
use crate::error::{ConfigError, StageFailure};
use crate::frame::Frame;
use rand::RngCore;
use shared::image_proc::{resize_bilinear, warp_image, EdgeMode, Homography};
use shared::PixelShape;

/// How pixels outside the source image are filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Border {
    Replicate,
    Reflect,
    Wrap,
    /// Constant value as a fraction of the frame's white level
    Constant(f64),
}

impl Border {
    fn from_params(params: &mut Params<'_>) -> Result<Self, ConfigError> {
        let kind = params.take_choice("border", &["replicate", "reflect", "wrap", "constant"])?;
        let fill = params.take_f64("fill")?;
        match (kind, fill) {
            ("constant", fill) => Ok(Border::Constant(fill.unwrap_or(0.0))),
            (_, Some(fill)) => Err(ConfigError::invalid(
                &params.key_path("fill"),
                fill,
                "only used with border \"constant\"",
            )),
            ("reflect", None) => Ok(Border::Reflect),
            ("wrap", None) => Ok(Border::Wrap),
            _ => Ok(Border::Replicate),
        }
    }

    pub fn edge_mode(&self, white_level: f64) -> EdgeMode {
        match self {
            Border::Replicate => EdgeMode::Extend,
            Border::Reflect => EdgeMode::Reflect,
            Border::Wrap => EdgeMode::Wrap,
            Border::Constant(fill) => EdgeMode::Constant(fill * white_level),
        }
    }
}

fn check_non_empty(frame: &Frame) -> Result<(), StageFailure> {
    let shape = frame.shape();
    if shape.is_empty() {
        return Err(StageFailure::BadGeometry {
            width: shape.width,
            height: shape.height,
            reason: "image is empty".into(),
        });
    }
    Ok(())
}

/// Reduce an angle in degrees to `[0, 360)`.
pub fn normalize_angle_deg(angle: f64) -> f64 {
    let reduced = angle.rem_euclid(360.0);
    // rem_euclid rounds tiny negative angles up to exactly 360
    if reduced >= 360.0 {
        0.0
    } else {
        reduced
    }
}

/// Random four-corner perspective warp.
///
/// Each corner moves toward the image center by `x * width` horizontally and
/// `y * height` vertically; negative draws move it outward. With `symmetric`
/// one draw is shared by all corners.
#[derive(Debug)]
pub struct Projective4pt {
    x: Param,
    y: Param,
    symmetric: bool,
    border: Border,
}

impl Projective4pt {
    pub fn new(x: Param, y: Param, symmetric: bool, border: Border) -> Self {
        Self {
            x,
            y,
            symmetric,
            border,
        }
    }

    /// Destination corners (clockwise from top-left) for the given inward offsets.
    pub fn displaced_corners(shape: PixelShape, offsets: &[(f64, f64); 4]) -> [(f64, f64); 4] {
        const INWARD: [(f64, f64); 4] = [(1.0, 1.0), (-1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)];
        let mut corners = shape.corners();
        for ((corner, &(dx, dy)), (sx, sy)) in corners.iter_mut().zip(offsets).zip(INWARD) {
            corner.0 += sx * dx;
            corner.1 += sy * dy;
        }
        corners
    }

    /// Warp `frame` so its corners land at [`Self::displaced_corners`].
    ///
    /// A destination quad that folds over itself has no perspective
    /// interpretation and is rejected like a degenerate homography.
    pub fn warp(&self, frame: Frame, offsets: &[(f64, f64); 4]) -> Result<Frame, StageFailure> {
        let shape = frame.shape();
        let degenerate = |what: &str| StageFailure::BadGeometry {
            width: shape.width,
            height: shape.height,
            reason: format!("corner offsets {offsets:?} give {what}"),
        };
        let destination = Self::displaced_corners(shape, offsets);
        if !is_convex_quad(&destination) {
            return Err(degenerate("a folded quadrilateral"));
        }
        let inverse = Homography::from_correspondences(&shape.corners(), &destination)
            .and_then(|h| h.inverse())
            .ok_or_else(|| degenerate("a degenerate homography"))?;

        let edge_mode = self.border.edge_mode(frame.white_level);
        let pixels = warp_image(&frame.pixels, shape, edge_mode, |x, y| inverse.apply(x, y));
        Ok(frame.with_pixels(pixels))
    }
}

impl Stage for Projective4pt {
    fn name(&self) -> &'static str {
        "projective4pt"
    }

    fn apply(&self, frame: Frame, rng: &mut dyn RngCore) -> Result<Frame, StageFailure> {
        check_non_empty(&frame)?;
        let shape = frame.shape();
        let (w, h) = (shape.width as f64, shape.height as f64);

        let mut offsets = [(0.0, 0.0); 4];
        if self.symmetric {
            offsets = [(self.x.draw(rng) * w, self.y.draw(rng) * h); 4];
        } else {
            for offset in offsets.iter_mut() {
                *offset = (self.x.draw(rng) * w, self.y.draw(rng) * h);
            }
        }

        self.warp(frame, &offsets)
    }
}

/// True when every turn along the corners has the same strictly nonzero sign.
pub fn is_convex_quad(corners: &[(f64, f64); 4]) -> bool {
    let mut sign = 0.0;
    for i in 0..4 {
        let (ax, ay) = corners[i];
        let (bx, by) = corners[(i + 1) % 4];
        let (cx, cy) = corners[(i + 2) % 4];
        let cross = (bx - ax) * (cy - by) - (by - ay) * (cx - bx);
        if cross == 0.0 || !cross.is_finite() {
            return false;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

pub(super) fn build_projective4pt(
    params: &mut Params<'_>,
    _size: PixelShape,
) -> Result<Box<dyn Stage>, ConfigError> {
    let x = params.require_param("x")?;
    let y = params.require_param("y")?;
    let symmetric = params.take_bool("symmetric")?.unwrap_or(false);
    let border = Border::from_params(params)?;

    // Opposite corners meeting in the middle collapse the quadrilateral
    for (key, param) in [("x", &x), ("y", &y)] {
        let (lo, hi) = param.support();
        if lo <= -1.0 || hi >= 0.5 {
            return Err(ConfigError::invalid(
                &params.key_path(key),
                format!("[{lo}, {hi}]"),
                "corner offsets must lie in (-1, 0.5)",
            ));
        }
    }
    Ok(Box::new(Projective4pt::new(x, y, symmetric, border)))
}

/// Rotation about the image center by a drawn angle, counterclockwise as displayed.
#[derive(Debug)]
pub struct Rotate {
    angle_deg: Param,
    border: Border,
}

impl Rotate {
    pub fn new(angle_deg: Param, border: Border) -> Self {
        Self { angle_deg, border }
    }

    /// Rotate `frame` by exactly `angle_deg`.
    pub fn rotate(&self, frame: Frame, angle_deg: f64) -> Frame {
        let shape = frame.shape();
        let (cx, cy) = shape.center();
        let (sin, cos) = normalize_angle_deg(angle_deg).to_radians().sin_cos();

        let edge_mode = self.border.edge_mode(frame.white_level);
        let pixels = warp_image(&frame.pixels, shape, edge_mode, |x, y| {
            let (dx, dy) = (x - cx, y - cy);
            Some((cx + cos * dx - sin * dy, cy + sin * dx + cos * dy))
        });
        frame.with_pixels(pixels)
    }
}

impl Stage for Rotate {
    fn name(&self) -> &'static str {
        "rotate"
    }

    fn apply(&self, frame: Frame, rng: &mut dyn RngCore) -> Result<Frame, StageFailure> {
        check_non_empty(&frame)?;
        let angle = self.angle_deg.draw(rng);
        Ok(self.rotate(frame, angle))
    }
}

pub(super) fn build_rotate(
    params: &mut Params<'_>,
    _size: PixelShape,
) -> Result<Box<dyn Stage>, ConfigError> {
    let angle_deg = params.require_param("angle_deg")?;
    let border = Border::from_params(params)?;
    Ok(Box::new(Rotate::new(angle_deg, border)))
}

/// Bilinear resize to the pipeline's output size. A no-op at that size.
#[derive(Debug)]
pub struct Rasterize {
    size: PixelShape,
}

impl Rasterize {
    pub fn new(size: PixelShape) -> Self {
        Self { size }
    }
}

impl Stage for Rasterize {
    fn name(&self) -> &'static str {
        "rasterize"
    }

    fn apply(&self, frame: Frame, _rng: &mut dyn RngCore) -> Result<Frame, StageFailure> {
        check_non_empty(&frame)?;
        if frame.shape() == self.size {
            return Ok(frame);
        }
        let pixels = resize_bilinear(&frame.pixels, self.size);
        Ok(frame.with_pixels(pixels))
    }
}

pub(super) fn build_rasterize(
    _params: &mut Params<'_>,
    size: PixelShape,
) -> Result<Box<dyn Stage>, ConfigError> {
    Ok(Box::new(Rasterize::new(size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{DistributionRegistry, Uniform};
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::{json, Value};

    fn frame(rows: usize, cols: usize, channels: usize) -> Frame {
        Frame::new(
            Array3::from_shape_fn((rows, cols, channels), |(r, c, ch)| {
                ((r * 31 + c * 7 + ch * 13) % 256) as f64
            }),
            255.0,
        )
    }

    fn build(
        builder: crate::transform::StageBuilder,
        value: Value,
    ) -> Result<Box<dyn Stage>, ConfigError> {
        let registry = DistributionRegistry::with_defaults();
        let Value::Object(map) = value else {
            panic!("params must be an object");
        };
        let mut params = Params::new("img.transforms[0]", map, &registry);
        let stage = builder(&mut params, PixelShape::square(16))?;
        params.finish()?;
        Ok(stage)
    }

    #[test]
    fn test_normalize_angle() {
        assert_eq!(normalize_angle_deg(0.0), 0.0);
        assert_eq!(normalize_angle_deg(360.0), 0.0);
        assert_eq!(normalize_angle_deg(364.5), 4.5);
        assert_eq!(normalize_angle_deg(-90.0), 270.0);
        assert_eq!(normalize_angle_deg(-1e-20), 0.0);
    }

    #[test]
    fn test_drawn_angles_stay_in_range() {
        let uniform = Param::Random(Box::new(Uniform::new(0.0, 364.99999).unwrap()));
        let mut rng = ChaCha8Rng::seed_from_u64(360);
        for _ in 0..100_000 {
            let angle = normalize_angle_deg(uniform.draw(&mut rng));
            assert!((0.0..360.0).contains(&angle), "{angle}");
        }
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let stage = Rotate::new(Param::Fixed(0.0), Border::Replicate);
        let input = frame(9, 12, 3);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let output = stage.apply(input.clone(), &mut rng).unwrap();
        assert_eq!(output, input);

        let full_turn = stage.rotate(input.clone(), 720.0);
        assert_eq!(full_turn, input);
    }

    #[test]
    fn test_quarter_turn_on_odd_square() {
        let stage = Rotate::new(Param::Fixed(90.0), Border::Replicate);
        let mut input = Frame::new(Array3::zeros((5, 5, 1)), 1.0);
        // one pixel above the center
        input.pixels[[1, 2, 0]] = 1.0;

        let output = stage.rotate(input, 90.0);
        // counterclockwise: top goes to the left
        assert_abs_diff_eq!(output.pixels[[2, 1, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(output.pixels.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_constant_border_fill() {
        let stage = Rotate::new(Param::Fixed(45.0), Border::Constant(0.25));
        let input = Frame::new(Array3::from_elem((8, 8, 1), 100.0), 200.0);
        let output = stage.rotate(input, 45.0);
        // corners rotate out of the source and take the fill
        assert_abs_diff_eq!(output.pixels[[0, 0, 0]], 50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(output.pixels[[4, 4, 0]], 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_projective_zero_offsets_is_identity() {
        let stage = Projective4pt::new(Param::Fixed(0.0), Param::Fixed(0.0), false, Border::Replicate);
        let input = frame(10, 14, 1);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let output = stage.apply(input.clone(), &mut rng).unwrap();
        for (a, b) in output.pixels.iter().zip(input.pixels.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_projective_shrinks_content_inward() {
        let stage = Projective4pt::new(Param::Fixed(0.25), Param::Fixed(0.25), true, Border::Constant(0.0));
        let input = Frame::new(Array3::from_elem((17, 17, 1), 255.0), 255.0);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let output = stage.apply(input, &mut rng).unwrap();

        assert_eq!(output.shape(), PixelShape::square(17));
        assert_eq!(output.pixels[[0, 0, 0]], 0.0);
        assert_abs_diff_eq!(output.pixels[[8, 8, 0]], 255.0, epsilon = 1e-9);
    }

    #[test]
    fn test_displaced_corners() {
        let corners = Projective4pt::displaced_corners(PixelShape::new(11, 21), &[(1.0, 2.0); 4]);
        assert_eq!(corners, [(1.0, 2.0), (9.0, 2.0), (9.0, 18.0), (1.0, 18.0)]);
    }

    #[test]
    fn test_folded_corners_rejected() {
        let shape = PixelShape::square(100);
        // one corner pulled in by nearly half, the rest pushed out by nearly all
        let offsets = [(49.9, 49.9), (-99.9, -99.9), (-99.9, -99.9), (-99.9, -99.9)];
        let folded = Projective4pt::displaced_corners(shape, &offsets);
        assert!(!is_convex_quad(&folded));
        assert!(is_convex_quad(&Projective4pt::displaced_corners(shape, &[(20.0, -10.0); 4])));

        let stage = Projective4pt::new(Param::Fixed(0.0), Param::Fixed(0.0), false, Border::Replicate);
        let input = Frame::new(Array3::from_elem((100, 100, 1), 7.0), 255.0);
        assert!(matches!(
            stage.warp(input.clone(), &offsets),
            Err(StageFailure::BadGeometry { .. })
        ));
        assert!(stage.warp(input, &[(10.0, 5.0); 4]).is_ok());
    }

    #[test]
    fn test_projective_params() {
        let stage = build(
            build_projective4pt,
            json!({
                "x": {"name": "uniform", "a": -0.1, "b": 0.1},
                "y": {"name": "truncnorm", "a": -1, "b": 1, "scale": 0.05},
                "border": "constant",
                "fill": 1.0
            }),
        )
        .unwrap();
        assert_eq!(stage.name(), "projective4pt");

        assert!(matches!(
            build(build_projective4pt, json!({"x": 0.1})),
            Err(ConfigError::MissingParameter { .. })
        ));
        assert!(matches!(
            build(build_projective4pt, json!({"x": 0.6, "y": 0.0})),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            build(build_projective4pt, json!({"x": 0.1, "y": 0.1, "fill": 0.5})),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            build(build_projective4pt, json!({"x": 0.1, "y": 0.1, "border": "mirror"})),
            Err(ConfigError::UnknownName { .. })
        ));
    }

    #[test]
    fn test_projective_random_offsets_keep_shape() {
        let stage = build(
            build_projective4pt,
            json!({
                "x": {"name": "uniform", "a": -0.2, "b": 0.2},
                "y": {"name": "uniform", "a": -0.2, "b": 0.2},
                "border": "reflect"
            }),
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..10 {
            let output = stage.apply(frame(12, 20, 3), &mut rng).unwrap();
            assert_eq!(output.pixels.dim(), (12, 20, 3));
            assert!(output.pixels.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_rasterize_resizes_to_pipeline_size() {
        let stage = build(build_rasterize, json!({})).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let output = stage.apply(frame(40, 25, 3), &mut rng).unwrap();
        assert_eq!(output.shape(), PixelShape::square(16));
        assert_eq!(output.white_level, 255.0);

        let same = frame(16, 16, 1);
        assert_eq!(stage.apply(same.clone(), &mut rng).unwrap(), same);
    }

    #[test]
    fn test_empty_frame_is_stage_failure() {
        let stage = Rasterize::new(PixelShape::square(4));
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let empty = Frame::new(Array3::zeros((0, 3, 1)), 255.0);
        assert!(matches!(
            stage.apply(empty, &mut rng),
            Err(StageFailure::BadGeometry { .. })
        ));
    }
}
