//! Interfaces to the training side, plus one loss used for diagnostics.
//!
//! The pipeline never calls a model or an optimizer itself. These traits are
//! the contract the training loop implements around the batches it receives.

use crate::config::params::Params;
use crate::config::OpSpec;
use crate::distribution::DistributionRegistry;
use crate::error::ConfigError;
use ndarray::{ArrayView3, Zip};
use std::path::Path;
use thiserror::Error;

/// Loads a model from a weights file.
pub trait ModelLoader {
    type Model;
    type Error: std::error::Error + Send + Sync + 'static;

    fn load(&self, path: &Path) -> Result<Self::Model, Self::Error>;
}

/// Scalar loss of a prediction against its target.
pub trait LossFunction: Send + Sync {
    fn name(&self) -> &'static str;

    fn compute(&self, prediction: ArrayView3<f64>, target: ArrayView3<f64>) -> Result<f64, LossError>;
}

/// Applies one update to a model.
pub trait Optimizer<M> {
    type Gradients;

    fn learning_rate(&self) -> f64;

    fn step(&mut self, model: &mut M, gradients: &Self::Gradients);
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LossError {
    #[error("prediction shape {prediction:?} does not match target shape {target:?}")]
    ShapeMismatch {
        prediction: (usize, usize, usize),
        target: (usize, usize, usize),
    },

    #[error("empty image")]
    Empty,

    #[error("{normalization} normalization of the target is zero")]
    ZeroDenominator { normalization: &'static str },
}

/// How the RMSE is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Root mean square of the target.
    Euclidean,
    /// Target max minus target min.
    MinMax,
    /// Target mean.
    Mean,
}

impl Normalization {
    fn label(self) -> &'static str {
        match self {
            Normalization::Euclidean => "euclidean",
            Normalization::MinMax => "min-max",
            Normalization::Mean => "mean",
        }
    }

    fn denominator(self, target: &ArrayView3<f64>) -> f64 {
        let n = target.len() as f64;
        match self {
            Normalization::Euclidean => (target.iter().map(|v| v * v).sum::<f64>() / n).sqrt(),
            Normalization::MinMax => {
                let (lo, hi) = target
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    });
                hi - lo
            }
            Normalization::Mean => target.sum() / n,
        }
    }
}

/// Normalized root-mean-square error, reported as `1 - NRMSE` when `invert` is set.
///
/// The default is euclidean normalization, inverted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRootMse {
    pub normalization: Normalization,
    pub invert: bool,
}

impl Default for NormalizedRootMse {
    fn default() -> Self {
        Self {
            normalization: Normalization::Euclidean,
            invert: true,
        }
    }
}

impl NormalizedRootMse {
    pub const NAME: &'static str = "nrmse";

    /// Build from a `loss_function` entry such as
    /// `{"name": "nrmse", "normalization": "min-max", "invert": true}`.
    pub fn from_spec(
        spec: &OpSpec,
        distributions: &DistributionRegistry,
    ) -> Result<Self, ConfigError> {
        if spec.name != Self::NAME {
            return Err(ConfigError::UnknownName {
                path: "loss_function".into(),
                kind: "loss function",
                name: spec.name.clone(),
            });
        }
        let mut params = Params::new("loss_function", spec.params.clone(), distributions);
        let normalization = match params.take_choice("normalization", &["euclidean", "min-max", "mean"])? {
            "min-max" => Normalization::MinMax,
            "mean" => Normalization::Mean,
            _ => Normalization::Euclidean,
        };
        let invert = params.take_bool("invert")?.unwrap_or(true);
        params.finish()?;
        Ok(Self {
            normalization,
            invert,
        })
    }
}

impl LossFunction for NormalizedRootMse {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn compute(&self, prediction: ArrayView3<f64>, target: ArrayView3<f64>) -> Result<f64, LossError> {
        if prediction.dim() != target.dim() {
            return Err(LossError::ShapeMismatch {
                prediction: prediction.dim(),
                target: target.dim(),
            });
        }
        if target.is_empty() {
            return Err(LossError::Empty);
        }

        let mut squared = 0.0;
        Zip::from(&prediction).and(&target).for_each(|p, t| {
            squared += (p - t) * (p - t);
        });
        let rmse = (squared / target.len() as f64).sqrt();

        let denominator = self.normalization.denominator(&target);
        if denominator == 0.0 {
            return Err(LossError::ZeroDenominator {
                normalization: self.normalization.label(),
            });
        }
        let nrmse = rmse / denominator;
        Ok(if self.invert { 1.0 - nrmse } else { nrmse })
    }
}
