//! Intensity stages. None of them change the frame's spatial size.

use super::Stage;
use crate::config::params::{Param, Params};
use crate::error::{ConfigError, StageFailure};
use crate::frame::Frame;
use ndarray::Array3;
use rand::RngCore;
use shared::PixelShape;

/// How `shading` applies its drawn value `v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadingModel {
    /// `p * (1 + v)`
    Multiplicative,
    /// `p + v * white_level`
    Additive,
}

/// Global brightness change by a value drawn per image, clipped to `[0, white_level]`.
#[derive(Debug)]
pub struct Shading {
    value: Param,
    model: ShadingModel,
}

impl Shading {
    pub fn new(value: Param, model: ShadingModel) -> Self {
        Self { value, model }
    }

    pub fn shade(&self, mut frame: Frame, v: f64) -> Frame {
        match self.model {
            ShadingModel::Multiplicative => frame.pixels.mapv_inplace(|p| p * (1.0 + v)),
            ShadingModel::Additive => {
                let offset = v * frame.white_level;
                frame.pixels.mapv_inplace(|p| p + offset)
            }
        }
        frame.clip_to_range();
        frame
    }
}

impl Stage for Shading {
    fn name(&self) -> &'static str {
        "shading"
    }

    fn apply(&self, frame: Frame, rng: &mut dyn RngCore) -> Result<Frame, StageFailure> {
        let v = self.value.draw(rng);
        Ok(self.shade(frame, v))
    }
}

pub(super) fn build_shading(
    params: &mut Params<'_>,
    _size: PixelShape,
) -> Result<Box<dyn Stage>, ConfigError> {
    let value = params.require_param("value")?;
    let model = match params.take_choice("model", &["multiplicative", "additive"])? {
        "additive" => ShadingModel::Additive,
        _ => ShadingModel::Multiplicative,
    };
    Ok(Box::new(Shading::new(value, model)))
}

/// Channel weighting for luminance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrayWeights {
    Bt601,
    Bt709,
    Average,
}

impl GrayWeights {
    pub fn coefficients(&self) -> [f64; 3] {
        match self {
            GrayWeights::Bt601 => [0.299, 0.587, 0.114],
            GrayWeights::Bt709 => [0.2126, 0.7152, 0.0722],
            GrayWeights::Average => [1.0 / 3.0; 3],
        }
    }
}

/// RGB to one luminance channel. Gray frames pass through unchanged.
#[derive(Debug)]
pub struct Grayscale {
    weights: GrayWeights,
}

impl Grayscale {
    pub fn new(weights: GrayWeights) -> Self {
        Self { weights }
    }
}

impl Stage for Grayscale {
    fn name(&self) -> &'static str {
        "grayscale"
    }

    fn apply(&self, frame: Frame, _rng: &mut dyn RngCore) -> Result<Frame, StageFailure> {
        match frame.channels() {
            1 => Ok(frame),
            3 => {
                let [wr, wg, wb] = self.weights.coefficients();
                let p = &frame.pixels;
                let (rows, cols, _) = p.dim();
                let gray = Array3::from_shape_fn((rows, cols, 1), |(r, c, _)| {
                    wr * p[[r, c, 0]] + wg * p[[r, c, 1]] + wb * p[[r, c, 2]]
                });
                Ok(frame.with_pixels(gray))
            }
            actual => Err(StageFailure::UnsupportedChannels {
                expected: "1 or 3",
                actual,
            }),
        }
    }
}

pub(super) fn build_grayscale(
    params: &mut Params<'_>,
    _size: PixelShape,
) -> Result<Box<dyn Stage>, ConfigError> {
    let weights = match params.take_choice("weights", &["bt601", "bt709", "average"])? {
        "bt709" => GrayWeights::Bt709,
        "average" => GrayWeights::Average,
        _ => GrayWeights::Bt601,
    };
    Ok(Box::new(Grayscale::new(weights)))
}

/// Divide intensities, and the white level, by a fixed constant.
#[derive(Debug)]
pub struct Divide {
    value: f64,
}

impl Divide {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl Stage for Divide {
    fn name(&self) -> &'static str {
        "divide"
    }

    fn apply(&self, mut frame: Frame, _rng: &mut dyn RngCore) -> Result<Frame, StageFailure> {
        let value = self.value;
        frame.pixels.mapv_inplace(|p| p / value);
        frame.white_level /= value;
        Ok(frame)
    }
}

pub(super) fn build_divide(
    params: &mut Params<'_>,
    _size: PixelShape,
) -> Result<Box<dyn Stage>, ConfigError> {
    let value = params.require_f64("value")?;
    if value <= 0.0 {
        return Err(ConfigError::invalid(
            &params.key_path("value"),
            value,
            "divisor must be positive",
        ));
    }
    Ok(Box::new(Divide::new(value)))
}

/// Linear rescale of the intensity range onto `[min, max]`.
///
/// Unset bounds default to `0` and the frame's white level. A constant frame
/// has no range to stretch; it keeps its value if that lies in `[min, max]`
/// and otherwise moves to the nearer bound.
#[derive(Debug)]
pub struct ScaleValue {
    min: Option<f64>,
    max: Option<f64>,
}

impl ScaleValue {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }
}

impl Stage for ScaleValue {
    fn name(&self) -> &'static str {
        "scale_value"
    }

    fn apply(&self, mut frame: Frame, _rng: &mut dyn RngCore) -> Result<Frame, StageFailure> {
        let target_min = self.min.unwrap_or(0.0);
        let target_max = self.max.unwrap_or(frame.white_level);
        if target_min > target_max {
            return Err(StageFailure::EmptyRange {
                min: target_min,
                max: target_max,
            });
        }
        if frame.pixels.is_empty() {
            return Ok(frame);
        }

        let (lo, hi) = frame
            .pixels
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        if hi > lo {
            let gain = (target_max - target_min) / (hi - lo);
            frame
                .pixels
                .mapv_inplace(|v| (v - lo) * gain + target_min);
        } else {
            let constant = lo.clamp(target_min, target_max);
            frame.pixels.fill(constant);
        }
        Ok(frame)
    }
}

pub(super) fn build_scale_value(
    params: &mut Params<'_>,
    _size: PixelShape,
) -> Result<Box<dyn Stage>, ConfigError> {
    let min = params.take_f64("min")?;
    let max = params.take_f64("max")?;
    if let (Some(a), Some(b)) = (min, max) {
        if a > b {
            return Err(ConfigError::InvalidBounds {
                path: params.path().to_string(),
                a,
                b,
            });
        }
    }
    Ok(Box::new(ScaleValue::new(min, max)))
}
