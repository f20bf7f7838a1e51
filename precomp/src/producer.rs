//! End-to-end production of one training sample.

use crate::config::TrainConfig;
use crate::dataset::{Collection, DatasetRegistry, ItemRef};
use crate::distortion::{AppliedPsf, Distortion, DistortionRegistry};
use crate::distribution::DistributionRegistry;
use crate::error::{DatasetError, PipelineError, Result, StageError};
use crate::transform::{TransformPipeline, TransformRegistry};
use log::{info, warn};
use ndarray::Array3;
use rand::RngCore;
use shared::PixelShape;

/// The registries a pipeline is built from.
#[derive(Debug, Clone)]
pub struct Registries {
    pub distributions: DistributionRegistry,
    pub transforms: TransformRegistry,
    pub distortions: DistortionRegistry,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            distributions: DistributionRegistry::with_defaults(),
            transforms: TransformRegistry::with_defaults(),
            distortions: DistortionRegistry::with_defaults(),
        }
    }
}

/// One input/target pair.
///
/// `target_image` is the canonical pipeline output; `input_image` is the same
/// frame after every distortion. `psfs` lists the kernels used, in order, so a
/// loss can re-apply them.
#[derive(Debug, Clone)]
pub struct Sample {
    pub index: u64,
    pub source: ItemRef,
    pub input_image: Array3<f64>,
    pub target_image: Array3<f64>,
    pub white_level: f64,
    pub psfs: Vec<AppliedPsf>,
}

/// Builds samples from a source collection, a transform pipeline and distortions.
#[derive(Debug)]
pub struct SampleProducer {
    images: Collection,
    datasets: DatasetRegistry,
    pipeline: TransformPipeline,
    distortions: Vec<Box<dyn Distortion>>,
    max_retries: usize,
}

impl SampleProducer {
    pub fn new(
        images: Collection,
        datasets: DatasetRegistry,
        pipeline: TransformPipeline,
        distortions: Vec<Box<dyn Distortion>>,
        max_retries: usize,
    ) -> Self {
        Self {
            images,
            datasets,
            pipeline,
            distortions,
            max_retries,
        }
    }

    /// Resolve datasets and build every stage of `config`.
    pub fn build(
        config: &TrainConfig,
        datasets: DatasetRegistry,
        registries: &Registries,
    ) -> Result<Self> {
        let pipeline = TransformPipeline::build(
            &config.img.transforms,
            config.img.size,
            &registries.transforms,
            &registries.distributions,
        )?;
        let images = datasets.resolve_all(&config.img.datasets)?;
        let distortions = registries.distortions.build_all(
            &config.distortion,
            &datasets,
            &registries.distributions,
        )?;
        info!(
            "Sample producer: {} source images, {} stages, {} distortions",
            images.len(),
            pipeline.len(),
            distortions.len()
        );

        Ok(Self::new(
            images,
            datasets,
            pipeline,
            distortions,
            config.pipeline.max_retries,
        ))
    }

    pub fn images(&self) -> &Collection {
        &self.images
    }

    pub fn output_size(&self) -> PixelShape {
        self.pipeline.size()
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Produce sample `index` from a uniformly drawn source image.
    pub fn produce(&self, index: u64, rng: &mut dyn RngCore) -> Result<Sample> {
        self.produce_planned(index, None, rng)
    }

    /// Produce sample `index`, trying `planned` first when given.
    ///
    /// Recoverable failures are retried up to `max_retries` times, each retry
    /// with a freshly drawn source image.
    pub fn produce_planned(
        &self,
        index: u64,
        planned: Option<&ItemRef>,
        rng: &mut dyn RngCore,
    ) -> Result<Sample> {
        let attempts = self.max_retries + 1;
        let mut attempt = 0;

        loop {
            let item = match (attempt, planned) {
                (0, Some(item)) => item.clone(),
                _ => self.images.pick(rng).cloned().ok_or_else(|| {
                    DatasetError::EmptyCollection {
                        dataset: "img".into(),
                        subsets: Vec::new(),
                    }
                })?,
            };

            let err = match self.attempt(index, &item, rng) {
                Ok(sample) => return Ok(sample),
                Err(err) if err.is_recoverable() => err,
                Err(err) => return Err(err),
            };
            attempt += 1;
            warn!(
                "Sample {} attempt {}/{} failed on {}: {}",
                index, attempt, attempts, item, err
            );

            if attempt == attempts {
                return Err(PipelineError::RetriesExhausted {
                    sample_index: index,
                    attempts,
                    last: Box::new(err),
                });
            }
        }
    }

    fn attempt(&self, index: u64, item: &ItemRef, rng: &mut dyn RngCore) -> Result<Sample> {
        let source = self.datasets.load(item)?;
        let target = self
            .pipeline
            .apply(source, rng)
            .map_err(|e| e.with_sample(index))?;

        let mut distorted = target.clone();
        let mut psfs = Vec::new();
        for distortion in &self.distortions {
            let out = distortion
                .apply(distorted, rng)
                .map_err(|e| StageError::new(distortion.name(), e).with_sample(index))?;
            distorted = out.frame;
            psfs.extend(out.psf);
        }

        Ok(Sample {
            index,
            source: item.clone(),
            input_image: distorted.pixels,
            target_image: target.pixels,
            white_level: target.white_level,
            psfs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpSpec;
    use crate::dataset::MemoryStorage;
    use image::{DynamicImage, Rgb, RgbImage};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;
    use std::sync::Arc;

    fn producer(corrupt: bool, max_retries: usize) -> SampleProducer {
        let mut storage = MemoryStorage::new();
        if corrupt {
            storage.insert_bytes("imgs", "a.png", b"garbage".to_vec());
            storage.insert_bytes("imgs", "b.png", b"garbage".to_vec());
        } else {
            let img = RgbImage::from_fn(12, 9, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 7]));
            storage
                .insert_image("imgs", "a.png", &DynamicImage::ImageRgb8(img))
                .unwrap();
        }
        let datasets = DatasetRegistry::new(Arc::new(storage));
        let images = datasets.resolve("imgs", &[]).unwrap();
        let pipeline = TransformPipeline::build(
            &[
                OpSpec::new("rasterize"),
                OpSpec::new("divide").with("value", json!(255)),
            ],
            PixelShape::new(8, 6),
            &TransformRegistry::with_defaults(),
            &DistributionRegistry::with_defaults(),
        )
        .unwrap();
        SampleProducer::new(images, datasets, pipeline, Vec::new(), max_retries)
    }

    #[test]
    fn test_produces_canonical_pair() {
        let producer = producer(false, 3);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let sample = producer.produce(5, &mut rng).unwrap();

        assert_eq!(sample.index, 5);
        assert_eq!(sample.target_image.dim(), (6, 8, 3));
        assert_eq!(sample.input_image.dim(), sample.target_image.dim());
        // no distortion configured
        assert_eq!(sample.input_image, sample.target_image);
        assert_eq!(sample.white_level, 1.0);
        assert!(sample.psfs.is_empty());
    }

    #[test]
    fn test_retries_exhausted() {
        let producer = producer(true, 2);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        match producer.produce(11, &mut rng) {
            Err(PipelineError::RetriesExhausted {
                sample_index,
                attempts,
                last,
            }) => {
                assert_eq!(sample_index, 11);
                assert_eq!(attempts, 3);
                assert!(matches!(*last, PipelineError::ItemLoad(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_planned_item_used_first() {
        let producer = producer(false, 0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let planned = ItemRef::new("imgs", "a.png");
        let sample = producer
            .produce_planned(0, Some(&planned), &mut rng)
            .unwrap();
        assert_eq!(sample.source, planned);

        let missing = ItemRef::new("imgs", "gone.png");
        assert!(matches!(
            producer.produce_planned(1, Some(&missing), &mut rng),
            Err(PipelineError::RetriesExhausted { attempts: 1, .. })
        ));
    }
}
