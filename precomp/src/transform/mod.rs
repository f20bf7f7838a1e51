//! Named image transforms and the registry that builds them from configuration.
//!
//! # Stages
//!
//! - **geometric**: `projective4pt`, `rotate`, `rasterize`
//! - **photometric**: `shading`, `grayscale`, `divide`, `scale_value`
//!
//! Stages are built once, validated against their parameters, and applied to
//! many frames. Randomized parameters are drawn fresh on every application from
//! the stream passed to [`Stage::apply`].

pub mod geometric;
pub mod photometric;
pub mod pipeline;

pub use geometric::{normalize_angle_deg, Border, Projective4pt, Rasterize, Rotate};
pub use photometric::{Divide, Grayscale, GrayWeights, ScaleValue, Shading, ShadingModel};
pub use pipeline::TransformPipeline;

use crate::config::params::Params;
use crate::config::OpSpec;
use crate::distribution::DistributionRegistry;
use crate::error::{ConfigError, StageFailure};
use crate::frame::Frame;
use rand::RngCore;
use shared::PixelShape;
use std::collections::BTreeMap;
use std::fmt;

/// One image operation.
pub trait Stage: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn apply(&self, frame: Frame, rng: &mut dyn RngCore) -> Result<Frame, StageFailure>;
}

/// Builds a stage from its parameters. `size` is the pipeline's output size.
pub type StageBuilder = fn(&mut Params<'_>, PixelShape) -> Result<Box<dyn Stage>, ConfigError>;

/// Transform builders keyed by name.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    builders: BTreeMap<String, StageBuilder>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("projective4pt", geometric::build_projective4pt);
        registry.register("rotate", geometric::build_rotate);
        registry.register("rasterize", geometric::build_rasterize);
        registry.register("shading", photometric::build_shading);
        registry.register("grayscale", photometric::build_grayscale);
        registry.register("divide", photometric::build_divide);
        registry.register("scale_value", photometric::build_scale_value);
        registry
    }

    pub fn register(&mut self, name: &str, builder: StageBuilder) {
        self.builders.insert(name.to_string(), builder);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    /// Build the stage described by `spec`, located at `path` in the configuration.
    pub fn build(
        &self,
        path: &str,
        spec: &OpSpec,
        size: PixelShape,
        distributions: &DistributionRegistry,
    ) -> Result<Box<dyn Stage>, ConfigError> {
        let builder = self
            .builders
            .get(&spec.name)
            .ok_or_else(|| ConfigError::UnknownName {
                path: path.to_string(),
                kind: "transform",
                name: spec.name.clone(),
            })?;
        let mut params = Params::new(path, spec.params.clone(), distributions);
        let stage = builder(&mut params, size)?;
        params.finish()?;
        Ok(stage)
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.builders.keys()).finish()
    }
}
