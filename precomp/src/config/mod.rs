//! Training-run configuration.
//!
//! The fixed parts of the document are strongly typed and reject unknown keys.
//! Operations (transforms, distortions, the loss) are a `name` plus a free-form
//! parameter bag that the matching registry validates at build time.
//!
//! ```json
//! {
//!   "model": {"name": "vdsr"},
//!   "img": {
//!     "datasets": [{"name": "SCA2023", "subsets": ["Images/Real_images/Animals"]}],
//!     "transforms": [
//!       {"name": "rasterize"},
//!       {"name": "rotate", "angle_deg": {"name": "uniform", "a": 0, "b": 360}},
//!       {"name": "divide", "value": 255}
//!     ]
//!   },
//!   "distortion": [{"name": "refraction_datasets",
//!                   "psf": {"datasets": [{"name": "SCA2023", "subsets": ["PSFs/Narrow"]}]}}],
//!   "loss_function": {"name": "nrmse"},
//!   "batch_size": 4,
//!   "sample_size": 120,
//!   "optimizer": {"name": "adam", "learning_rate": 0.0001, "eps": 1e-8}
//! }
//! ```

pub mod params;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::PixelShape;
use std::path::{Path, PathBuf};

/// A named operation with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpSpec {
    pub name: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl OpSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

/// A named dataset and the subset paths to draw from.
///
/// An empty subset list means the whole dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetRef {
    pub name: String,
    #[serde(default)]
    pub subsets: Vec<String>,
}

impl DatasetRef {
    pub fn new(name: impl Into<String>, subsets: &[&str]) -> Self {
        Self {
            name: name.into(),
            subsets: subsets.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Datasets whose collections are concatenated into one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetsConfig {
    pub datasets: Vec<DatasetRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImgConfig {
    pub datasets: Vec<DatasetRef>,
    #[serde(default)]
    pub transforms: Vec<OpSpec>,
    /// Spatial size of every pipeline output
    #[serde(default)]
    pub size: PixelShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerConfig {
    pub name: String,
    pub learning_rate: f64,
    pub eps: f64,
}

/// Execution settings of the sample pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    /// Run seed; every epoch and worker stream derives from it
    pub seed: u64,
    /// Worker threads; defaults to the available parallelism
    pub workers: Option<usize>,
    /// Samples buffered per worker; defaults to `2 * batch_size / workers`
    pub prefetch: Option<usize>,
    /// Extra attempts per sample after a recoverable failure
    pub max_retries: usize,
    /// Drop a final batch shorter than `batch_size`
    pub drop_last: bool,
    /// Draw source items with replacement
    pub replacement: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            workers: None,
            prefetch: None,
            max_retries: 3,
            drop_last: false,
            replacement: true,
        }
    }
}

impl PipelineSettings {
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }

    pub fn prefetch_per_worker(&self, batch_size: usize) -> usize {
        self.prefetch
            .unwrap_or_else(|| 2 * batch_size / self.worker_count())
            .max(1)
    }
}

/// The whole training-run document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainConfig {
    pub model: ModelConfig,
    pub img: ImgConfig,
    #[serde(default)]
    pub distortion: Vec<OpSpec>,
    pub loss_function: OpSpec,
    pub batch_size: usize,
    pub sample_size: usize,
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

impl TrainConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parse and validate.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: TrainConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value constraints that the types alone do not express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", 0, "must be positive"));
        }
        if self.sample_size == 0 {
            return Err(ConfigError::invalid("sample_size", 0, "must be positive"));
        }
        for (key, value) in [
            ("optimizer.learning_rate", self.optimizer.learning_rate),
            ("optimizer.eps", self.optimizer.eps),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::invalid(key, value, "must be positive"));
            }
        }
        if self.img.datasets.is_empty() {
            return Err(ConfigError::MissingParameter {
                path: "img".into(),
                key: "datasets".into(),
            });
        }
        if self.img.size.is_empty() {
            return Err(ConfigError::invalid(
                "img.size",
                self.img.size,
                "must be non-empty",
            ));
        }
        if self.pipeline.workers == Some(0) {
            return Err(ConfigError::invalid("pipeline.workers", 0, "must be positive"));
        }
        if self.pipeline.prefetch == Some(0) {
            return Err(ConfigError::invalid("pipeline.prefetch", 0, "must be positive"));
        }
        Ok(())
    }
}
