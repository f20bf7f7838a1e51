//! Ordered composition of transform stages with a fixed output size.

use super::{Stage, TransformRegistry};
use crate::config::OpSpec;
use crate::distribution::DistributionRegistry;
use crate::error::{ConfigError, StageError, StageFailure};
use crate::frame::Frame;
use log::info;
use rand::RngCore;
use shared::PixelShape;

/// Stages applied in configured order. Every output has the size fixed at build.
#[derive(Debug)]
pub struct TransformPipeline {
    stages: Vec<Box<dyn Stage>>,
    size: PixelShape,
}

impl TransformPipeline {
    /// Build every stage of `specs`. Fails on the first invalid stage.
    pub fn build(
        specs: &[OpSpec],
        size: PixelShape,
        transforms: &TransformRegistry,
        distributions: &DistributionRegistry,
    ) -> Result<Self, ConfigError> {
        let stages = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                transforms.build(&format!("img.transforms[{i}]"), spec, size, distributions)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
        info!("Transform pipeline {:?} producing {}", names, size);
        Ok(Self { stages, size })
    }

    pub fn from_stages(stages: Vec<Box<dyn Stage>>, size: PixelShape) -> Self {
        Self { stages, size }
    }

    pub fn size(&self) -> PixelShape {
        self.size
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run all stages, drawing fresh random parameters for each.
    pub fn apply(&self, frame: Frame, rng: &mut dyn RngCore) -> Result<Frame, StageError> {
        let mut frame = frame;
        for stage in &self.stages {
            frame = stage
                .apply(frame, rng)
                .map_err(|e| StageError::new(stage.name(), e))?;
        }

        let actual = frame.shape();
        if actual != self.size {
            return Err(StageError::new(
                "pipeline output",
                StageFailure::SizeContract {
                    expected: self.size.to_string(),
                    actual: actual.to_string(),
                },
            ));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn pipeline(specs: &[OpSpec], size: PixelShape) -> Result<TransformPipeline, ConfigError> {
        TransformPipeline::build(
            specs,
            size,
            &TransformRegistry::with_defaults(),
            &DistributionRegistry::with_defaults(),
        )
    }

    fn rgb(rows: usize, cols: usize) -> Frame {
        Frame::new(
            Array3::from_shape_fn((rows, cols, 3), |(r, c, ch)| ((r + 2 * c + 3 * ch) % 256) as f64),
            255.0,
        )
    }

    #[test]
    fn test_stages_applied_in_order() {
        let specs = [
            OpSpec::new("rasterize"),
            OpSpec::new("grayscale"),
            OpSpec::new("divide").with("value", json!(255)),
        ];
        let p = pipeline(&specs, PixelShape::square(8)).unwrap();
        assert_eq!(p.stage_names(), ["rasterize", "grayscale", "divide"]);

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = p.apply(rgb(20, 30), &mut rng).unwrap();
        assert_eq!(out.pixels.dim(), (8, 8, 1));
        assert_eq!(out.white_level, 1.0);
        assert!(out.pixels.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_order_matters() {
        let shade = OpSpec::new("shading").with("value", json!(1.0));
        let gray = OpSpec::new("grayscale");
        let size = PixelShape::new(2, 1);
        let shade_first = pipeline(&[shade.clone(), gray.clone()], size).unwrap();
        let gray_first = pipeline(&[gray, shade], size).unwrap();

        let mut frame = Frame::new(Array3::zeros((1, 2, 3)), 255.0);
        frame.pixels[[0, 0, 0]] = 200.0;
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        // red clips at 255 before weighting in one order only
        let a = shade_first.apply(frame.clone(), &mut rng).unwrap();
        let b = gray_first.apply(frame, &mut rng).unwrap();
        assert_ne!(a.pixels[[0, 0, 0]], b.pixels[[0, 0, 0]]);
    }

    #[test]
    fn test_unknown_stage_fails_fast_with_path() {
        let specs = [OpSpec::new("rasterize"), OpSpec::new("blur_unknown")];
        match pipeline(&specs, PixelShape::square(8)) {
            Err(ConfigError::UnknownName { path, name, .. }) => {
                assert_eq!(path, "img.transforms[1]");
                assert_eq!(name, "blur_unknown");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_nested_parameter_path() {
        let specs = [
            OpSpec::new("rasterize"),
            OpSpec::new("rotate").with("angle_deg", json!({"name": "uniform", "a": 10, "b": 5})),
        ];
        match pipeline(&specs, PixelShape::square(8)) {
            Err(ConfigError::InvalidBounds { path, .. }) => {
                assert_eq!(path, "img.transforms[1].angle_deg")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_output_size_contract() {
        let p = pipeline(&[OpSpec::new("grayscale")], PixelShape::square(8)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let err = p.apply(rgb(5, 5), &mut rng).unwrap_err();
        assert_eq!(err.stage, "pipeline output");
        assert!(matches!(err.source, StageFailure::SizeContract { .. }));
    }

    #[test]
    fn test_stage_failure_names_stage() {
        let p = pipeline(&[OpSpec::new("grayscale")], PixelShape::new(2, 2)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let two_channel = Frame::new(Array3::zeros((2, 2, 2)), 255.0);
        let err = p.apply(two_channel, &mut rng).unwrap_err();
        assert_eq!(err.stage, "grayscale");
        assert_eq!(err.sample_index, None);
    }

    #[test]
    fn test_parameters_redrawn_per_call() {
        let specs = [
            OpSpec::new("rasterize"),
            OpSpec::new("shading").with("value", json!({"name": "uniform", "a": -0.5, "b": 0.0})),
        ];
        let p = pipeline(&specs, PixelShape::square(4)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let frame = Frame::new(Array3::from_elem((4, 4, 1), 100.0), 255.0);

        let values: Vec<f64> = (0..5)
            .map(|_| p.apply(frame.clone(), &mut rng).unwrap().pixels[[0, 0, 0]])
            .collect();
        for pair in values.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }
}
