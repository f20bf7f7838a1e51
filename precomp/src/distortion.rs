//! Optical distortions applied to the canonical target.
//!
//! `refraction_datasets` models refractive-error blur: every application picks
//! a point-spread function from a PSF collection, normalizes it to unit energy
//! and convolves it with the frame. The collection is resolved once at build.

use crate::config::params::Params;
use crate::config::{DatasetsConfig, OpSpec};
use crate::dataset::{Collection, DatasetRegistry, ItemRef};
use crate::distribution::DistributionRegistry;
use crate::error::{ConfigError, PipelineError, StageFailure};
use crate::frame::Frame;
use log::info;
use ndarray::{Array2, Array3, Axis};
use rand::RngCore;
use rayon::prelude::*;
use shared::image_proc::{
    convolve2d, normalize_kernel, trim_kernel_support, ConvolveMethod, ConvolveOptions, EdgeMode,
};
use std::collections::BTreeMap;
use std::fmt;

/// PSF taps below this fraction of the peak are trimmed from the border.
pub const PSF_TRIM_THRESHOLD: f64 = 1e-12;

/// The PSF used for one distorted frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedPsf {
    pub item: ItemRef,
    /// Unit-sum kernels: one per image channel, or a single kernel shared by all
    pub kernels: Vec<Array2<f64>>,
}

impl AppliedPsf {
    pub fn kernel_for_channel(&self, channel: usize) -> &Array2<f64> {
        &self.kernels[channel.min(self.kernels.len() - 1)]
    }
}

/// Output of one distortion.
#[derive(Debug, Clone)]
pub struct Distorted {
    pub frame: Frame,
    pub psf: Option<AppliedPsf>,
}

pub trait Distortion: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn apply(&self, frame: Frame, rng: &mut dyn RngCore) -> Result<Distorted, StageFailure>;
}

/// Turn a decoded PSF into unit-sum kernels matching `channels` image channels.
///
/// A PSF with as many channels as the image gives one kernel per channel;
/// any other PSF is averaged over its channels into a single kernel.
pub fn prepare_kernels(
    psf: &Frame,
    channels: usize,
    item: &ItemRef,
) -> Result<Vec<Array2<f64>>, StageFailure> {
    let raw: Vec<Array2<f64>> = if psf.channels() == channels {
        psf.pixels
            .axis_iter(Axis(2))
            .map(|lane| lane.to_owned())
            .collect()
    } else {
        let mean = psf.pixels.mean_axis(Axis(2)).ok_or_else(|| StageFailure::BadGeometry {
            width: psf.shape().width,
            height: psf.shape().height,
            reason: format!("PSF {item} has no channels"),
        })?;
        vec![mean]
    };

    raw.iter()
        .map(|kernel| {
            let trimmed = trim_kernel_support(&kernel.view(), PSF_TRIM_THRESHOLD);
            normalize_kernel(&trimmed.view()).ok_or_else(|| StageFailure::DegeneratePsf {
                item: item.to_string(),
                sum: trimmed.sum(),
            })
        })
        .collect()
}

/// Convolve every channel of `frame` with its kernel, edges replicated.
pub fn convolve_frame(frame: &Frame, psf: &AppliedPsf, method: ConvolveMethod) -> Array3<f64> {
    let options = ConvolveOptions {
        parallel: true,
        edge_mode: EdgeMode::Extend,
        method,
    };
    let mut output = Array3::zeros(frame.pixels.raw_dim());
    output
        .axis_iter_mut(Axis(2))
        .into_par_iter()
        .enumerate()
        .for_each(|(c, mut lane)| {
            let channel = frame.pixels.index_axis(Axis(2), c);
            let kernel = psf.kernel_for_channel(c);
            lane.assign(&convolve2d(&channel, &kernel.view(), options));
        });
    output
}

/// PSF blur with kernels drawn from dataset collections.
#[derive(Debug)]
pub struct RefractionDatasets {
    psfs: Collection,
    datasets: DatasetRegistry,
    method: ConvolveMethod,
}

impl RefractionDatasets {
    pub fn new(psfs: Collection, datasets: DatasetRegistry, method: ConvolveMethod) -> Self {
        Self {
            psfs,
            datasets,
            method,
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.psfs
    }

    /// Blur with a specific PSF item.
    pub fn apply_item(&self, frame: Frame, item: &ItemRef) -> Result<Distorted, StageFailure> {
        let psf_frame = self.datasets.load(item)?;
        let kernels = prepare_kernels(&psf_frame, frame.channels(), item)?;
        let psf = AppliedPsf {
            item: item.clone(),
            kernels,
        };
        let pixels = convolve_frame(&frame, &psf, self.method);
        Ok(Distorted {
            frame: frame.with_pixels(pixels),
            psf: Some(psf),
        })
    }
}

impl Distortion for RefractionDatasets {
    fn name(&self) -> &'static str {
        "refraction_datasets"
    }

    fn apply(&self, frame: Frame, rng: &mut dyn RngCore) -> Result<Distorted, StageFailure> {
        // The collection is never empty once built
        let Some(item) = self.psfs.pick(rng) else {
            return Ok(Distorted { frame, psf: None });
        };
        self.apply_item(frame, item)
    }
}

fn build_refraction_datasets(
    params: &mut Params<'_>,
    datasets: &DatasetRegistry,
) -> Result<Box<dyn Distortion>, PipelineError> {
    let psf: DatasetsConfig = params.require_value("psf")?;
    let method = match params.take_choice("method", &["auto", "direct", "fft"])? {
        "direct" => ConvolveMethod::Direct,
        "fft" => ConvolveMethod::Fft,
        _ => ConvolveMethod::Auto,
    };
    if psf.datasets.is_empty() {
        return Err(ConfigError::MissingParameter {
            path: params.key_path("psf"),
            key: "datasets".into(),
        }
        .into());
    }

    let psfs = datasets.resolve_all(&psf.datasets)?;
    info!(
        "Distortion '{}' draws from {} PSFs ({:?} convolution)",
        params.path(),
        psfs.len(),
        method
    );
    Ok(Box::new(RefractionDatasets::new(psfs, datasets.clone(), method)))
}

/// Builds a distortion; may resolve datasets.
pub type DistortionBuilder =
    fn(&mut Params<'_>, &DatasetRegistry) -> Result<Box<dyn Distortion>, PipelineError>;

/// Distortion builders keyed by name.
#[derive(Clone, Default)]
pub struct DistortionRegistry {
    builders: BTreeMap<String, DistortionBuilder>,
}

impl DistortionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("refraction_datasets", build_refraction_datasets);
        registry
    }

    pub fn register(&mut self, name: &str, builder: DistortionBuilder) {
        self.builders.insert(name.to_string(), builder);
    }

    pub fn build(
        &self,
        path: &str,
        spec: &OpSpec,
        datasets: &DatasetRegistry,
        distributions: &DistributionRegistry,
    ) -> Result<Box<dyn Distortion>, PipelineError> {
        let builder = self
            .builders
            .get(&spec.name)
            .ok_or_else(|| ConfigError::UnknownName {
                path: path.to_string(),
                kind: "distortion",
                name: spec.name.clone(),
            })?;
        let mut params = Params::new(path, spec.params.clone(), distributions);
        let distortion = builder(&mut params, datasets)?;
        params.finish()?;
        Ok(distortion)
    }

    /// Build the `distortion` list of a configuration, in order.
    pub fn build_all(
        &self,
        specs: &[OpSpec],
        datasets: &DatasetRegistry,
        distributions: &DistributionRegistry,
    ) -> Result<Vec<Box<dyn Distortion>>, PipelineError> {
        specs
            .iter()
            .enumerate()
            .map(|(i, spec)| self.build(&format!("distortion[{i}]"), spec, datasets, distributions))
            .collect()
    }
}

impl fmt::Debug for DistortionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.builders.keys()).finish()
    }
}
