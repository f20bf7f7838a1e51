//! Error taxonomy for pipeline construction and sample production.
//!
//! Build-time problems ([`ConfigError`], [`DatasetError`]) are fatal and happen
//! before any sample is drawn. Per-sample problems ([`ItemLoadError`],
//! [`StageError`]) are retried by the sample producer with a fresh source item
//! and become [`PipelineError::RetriesExhausted`] when the budget runs out.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid configuration. `path` is the config key path, e.g. `img.transforms[2].angle_deg`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{path}: unknown {kind} '{name}'")]
    UnknownName {
        path: String,
        kind: &'static str,
        name: String,
    },

    #[error("{path}: invalid bounds a={a}, b={b} (need a <= b)")]
    InvalidBounds { path: String, a: f64, b: f64 },

    #[error("{path}: missing required parameter '{key}'")]
    MissingParameter { path: String, key: String },

    #[error("{path}: unknown parameter '{key}'")]
    UnknownParameter { path: String, key: String },

    #[error("{path}: invalid value {value}: {reason}")]
    InvalidValue {
        path: String,
        value: String,
        reason: String,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(path: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            path: path.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Dataset resolution failures, raised at build time.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("dataset '{name}' not found")]
    DatasetNotFound { name: String },

    #[error("subset '{subset}' not found in dataset '{dataset}'")]
    SubsetNotFound { dataset: String, subset: String },

    #[error("dataset '{dataset}' has no items under subsets {subsets:?}")]
    EmptyCollection {
        dataset: String,
        subsets: Vec<String>,
    },

    #[error("failed to list dataset '{dataset}': {source}")]
    Io {
        dataset: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why an item could not be turned into an image.
#[derive(Error, Debug)]
pub enum LoadCause {
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("conversion failed: {0}")]
    Convert(#[from] shared::image_proc::ImageConversionError),
}

/// A dataset item could not be loaded. Recoverable per sample.
#[derive(Error, Debug)]
#[error("failed to load item {item}: {source}")]
pub struct ItemLoadError {
    pub item: String,
    #[source]
    pub source: LoadCause,
}

/// Failure inside a transform or distortion stage.
#[derive(Error, Debug)]
pub enum StageFailure {
    #[error("expected {expected} channels, got {actual}")]
    UnsupportedChannels { expected: &'static str, actual: usize },

    #[error("image of size {width}x{height} cannot be processed: {reason}")]
    BadGeometry {
        width: usize,
        height: usize,
        reason: String,
    },

    #[error("output is {actual}, pipeline size is {expected}")]
    SizeContract { expected: String, actual: String },

    #[error("target range [{min}, {max}] is empty")]
    EmptyRange { min: f64, max: f64 },

    #[error("PSF {item} cannot be normalized (sum {sum})")]
    DegeneratePsf { item: String, sum: f64 },

    #[error(transparent)]
    ItemLoad(#[from] ItemLoadError),
}

/// A stage failed; carries the stage name and, once known, the sample index.
#[derive(Error, Debug)]
#[error("stage '{stage}' failed{}: {source}", sample_suffix(.sample_index))]
pub struct StageError {
    pub stage: String,
    pub sample_index: Option<u64>,
    #[source]
    pub source: StageFailure,
}

fn sample_suffix(index: &Option<u64>) -> String {
    index.map(|i| format!(" on sample {i}")).unwrap_or_default()
}

impl StageError {
    pub fn new(stage: impl Into<String>, source: StageFailure) -> Self {
        Self {
            stage: stage.into(),
            sample_index: None,
            source,
        }
    }

    pub fn with_sample(mut self, index: u64) -> Self {
        self.sample_index = Some(index);
        self
    }
}

/// Top-level error of the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    ItemLoad(#[from] ItemLoadError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("sample {sample_index} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        sample_index: u64,
        attempts: usize,
        #[source]
        last: Box<PipelineError>,
    },

    #[error("sample worker {worker} panicked")]
    WorkerPanicked { worker: usize },
}

impl PipelineError {
    /// True for per-sample failures that a retry with a fresh item may fix.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::ItemLoad(_) | PipelineError::Stage(_))
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
