//! Training-data pipeline for image precompensation networks.
//!
//! A [`TrainConfig`] names source datasets, a chain of stochastic transforms
//! and a list of distortions. [`BatchAssembler`] turns it into epochs of
//! [`Batch`]es, each sample holding a canonical `target_image` and the
//! `input_image` a viewer with the configured refractive error would see.

pub mod batch;
pub mod collaborators;
pub mod config;
pub mod dataset;
pub mod distortion;
pub mod distribution;
pub mod error;
pub mod frame;
pub mod producer;
pub mod transform;

pub use batch::{Batch, BatchAssembler, Epoch, EpochPlan};
pub use collaborators::{LossFunction, ModelLoader, NormalizedRootMse, Optimizer};
pub use config::TrainConfig;
pub use dataset::{DatasetRegistry, DatasetStorage, FsStorage, ItemRef, MemoryStorage};
pub use error::{ConfigError, DatasetError, PipelineError, Result};
pub use frame::Frame;
pub use producer::{Registries, Sample, SampleProducer};
