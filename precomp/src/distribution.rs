//! Scalar distributions for randomized stage parameters.
//!
//! A distribution is built once from its configuration object and then drawn
//! from many times. It never owns a random stream; every draw takes the caller's
//! generator, so a seeded worker reproduces its draws exactly.
//!
//! Kinds are looked up by name in a [`DistributionRegistry`]:
//!
//! - `uniform{a, b}`: uniform on `[a, b)`; `a == b` always yields `a`.
//! - `truncnorm{a, b, loc?, scale?}`: `loc + scale * z` where `z` is a standard
//!   normal truncated to `[a, b]`.

use crate::config::params::Params;
use crate::error::ConfigError;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Exp1, StandardNormal};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;

/// A scalar distribution that draws from a caller-supplied stream.
pub trait Sampler: fmt::Debug + Send + Sync {
    fn sample(&self, rng: &mut dyn RngCore) -> f64;

    /// Closed bounds of the values `sample` can return.
    fn support(&self) -> (f64, f64);
}

/// Uniform distribution on `[a, b)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniform {
    a: f64,
    b: f64,
}

impl Uniform {
    pub fn new(a: f64, b: f64) -> Result<Self, ConfigError> {
        Self::at("uniform", a, b)
    }

    fn at(path: &str, a: f64, b: f64) -> Result<Self, ConfigError> {
        check_bounds(path, a, b)?;
        if !(b - a).is_finite() {
            return Err(ConfigError::invalid(path, b - a, "width of [a, b) overflows"));
        }
        Ok(Self { a, b })
    }
}

impl Sampler for Uniform {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        if self.a == self.b {
            return self.a;
        }
        rng.gen_range(self.a..self.b)
    }

    fn support(&self) -> (f64, f64) {
        (self.a, self.b)
    }
}

/// Normal distribution truncated to `[loc + scale * a, loc + scale * b]`.
///
/// Uses exact mixed rejection sampling: a plain normal proposal for wide
/// intervals around zero, a uniform proposal for narrow ones, and a shifted
/// exponential proposal for intervals in one tail. Acceptance stays high even
/// for bounds far out in the tail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruncatedNormal {
    a: f64,
    b: f64,
    loc: f64,
    scale: f64,
}

impl TruncatedNormal {
    pub fn new(a: f64, b: f64, loc: f64, scale: f64) -> Result<Self, ConfigError> {
        Self::at("truncnorm", a, b, loc, scale)
    }

    fn at(path: &str, a: f64, b: f64, loc: f64, scale: f64) -> Result<Self, ConfigError> {
        check_bounds(path, a, b)?;
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ConfigError::invalid(
                &format!("{path}.scale"),
                scale,
                "must be positive",
            ));
        }
        Ok(Self { a, b, loc, scale })
    }

    /// Draw from the standard normal restricted to `[a, b]`.
    pub fn sample_standard(&self, rng: &mut dyn RngCore) -> f64 {
        standard_truncated(self.a, self.b, rng)
    }
}

impl Sampler for TruncatedNormal {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        self.loc + self.scale * self.sample_standard(rng)
    }

    fn support(&self) -> (f64, f64) {
        (self.loc + self.scale * self.a, self.loc + self.scale * self.b)
    }
}

fn check_bounds(path: &str, a: f64, b: f64) -> Result<(), ConfigError> {
    if !a.is_finite() || !b.is_finite() || a > b {
        return Err(ConfigError::InvalidBounds {
            path: path.to_string(),
            a,
            b,
        });
    }
    Ok(())
}

fn standard_truncated(a: f64, b: f64, rng: &mut dyn RngCore) -> f64 {
    if a == b {
        return a;
    }
    if a <= 0.0 && b >= 0.0 {
        if b - a >= (2.0 * PI).sqrt() {
            loop {
                let z: f64 = StandardNormal.sample(rng);
                if (a..=b).contains(&z) {
                    return z;
                }
            }
        }
        loop {
            let z = uniform_closed(a, b, rng);
            if rng.gen::<f64>() < (-0.5 * z * z).exp() {
                return z;
            }
        }
    }
    if a > 0.0 {
        one_sided_tail(a, b, rng)
    } else {
        -one_sided_tail(-b, -a, rng)
    }
}

// Interval [a, b] with 0 < a < b
fn one_sided_tail(a: f64, b: f64, rng: &mut dyn RngCore) -> f64 {
    // Written without a * a so bounds near f64::MAX stay finite
    let root = a.hypot(2.0);
    let rate = 0.5 * a + 0.5 * root;
    let uniform_limit = (0.5 - 0.5 * a / rate).exp() / rate;

    if b - a < uniform_limit {
        loop {
            let z = uniform_closed(a, b, rng);
            if rng.gen::<f64>() < ((a - z) * (0.5 * a + 0.5 * z)).exp() {
                return z;
            }
        }
    }

    loop {
        let e: f64 = Exp1.sample(rng);
        let z = a + e / rate;
        if z > b {
            continue;
        }
        if rng.gen::<f64>() < (-0.5 * (z - rate).powi(2)).exp() {
            return z;
        }
    }
}

fn uniform_closed(a: f64, b: f64, rng: &mut dyn RngCore) -> f64 {
    (a + (b - a) * rng.gen::<f64>()).min(b)
}

/// Builds a sampler from its parameters.
pub type SamplerBuilder = fn(&mut Params<'_>) -> Result<Box<dyn Sampler>, ConfigError>;

/// Named distribution kinds.
#[derive(Clone, Default)]
pub struct DistributionRegistry {
    builders: BTreeMap<String, SamplerBuilder>,
}

impl DistributionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `uniform` and `truncnorm`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("uniform", build_uniform);
        registry.register("truncnorm", build_truncnorm);
        registry
    }

    pub fn register(&mut self, name: &str, builder: SamplerBuilder) {
        self.builders.insert(name.to_string(), builder);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    /// Build the distribution described by `spec`, a `{"name": .., ...}` object at `path`.
    pub fn build(
        &self,
        path: &str,
        mut spec: Map<String, Value>,
    ) -> Result<Box<dyn Sampler>, ConfigError> {
        let name = match spec.remove("name") {
            Some(Value::String(name)) => name,
            Some(other) => {
                return Err(ConfigError::invalid(
                    &format!("{path}.name"),
                    other,
                    "expected a distribution name",
                ))
            }
            None => {
                return Err(ConfigError::MissingParameter {
                    path: path.to_string(),
                    key: "name".into(),
                })
            }
        };
        let builder = self.builders.get(&name).ok_or_else(|| ConfigError::UnknownName {
            path: path.to_string(),
            kind: "distribution",
            name: name.clone(),
        })?;

        let mut params = Params::new(path, spec, self);
        let sampler = builder(&mut params)?;
        params.finish()?;
        Ok(sampler)
    }
}

impl fmt::Debug for DistributionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.builders.keys()).finish()
    }
}

fn build_uniform(params: &mut Params<'_>) -> Result<Box<dyn Sampler>, ConfigError> {
    let a = params.require_f64("a")?;
    let b = params.require_f64("b")?;
    Ok(Box::new(Uniform::at(params.path(), a, b)?))
}

fn build_truncnorm(params: &mut Params<'_>) -> Result<Box<dyn Sampler>, ConfigError> {
    let a = params.require_f64("a")?;
    let b = params.require_f64("b")?;
    let loc = params.take_f64("loc")?.unwrap_or(0.0);
    let scale = params.take_f64("scale")?.unwrap_or(1.0);
    Ok(Box::new(TruncatedNormal::at(params.path(), a, b, loc, scale)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;
    use shared::algo::{ks_critical_value, ks_statistic, mean_and_variance, truncated_normal_cdf};

    const DRAWS: usize = 20_000;

    fn draws(sampler: &dyn Sampler, seed: u64) -> Vec<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..DRAWS).map(|_| sampler.sample(&mut rng)).collect()
    }

    fn build(value: Value) -> Result<Box<dyn Sampler>, ConfigError> {
        let Value::Object(map) = value else {
            panic!("distribution spec must be an object");
        };
        DistributionRegistry::with_defaults().build("test.param", map)
    }

    #[test]
    fn test_uniform_range_and_mean() {
        for &(a, b) in &[(0.0, 1.0), (-3.0, 7.5), (100.0, 100.25), (0.0, 364.99999)] {
            let uniform = Uniform::new(a, b).unwrap();
            let values = draws(&uniform, 1);
            assert!(values.iter().all(|v| *v >= a && *v < b));

            let (mean, _) = mean_and_variance(&values);
            // 5 sigma of the sample mean
            let tolerance = 5.0 * (b - a) / (12.0 * DRAWS as f64).sqrt();
            assert_abs_diff_eq!(mean, (a + b) / 2.0, epsilon = tolerance);
        }
    }

    #[test]
    fn test_uniform_degenerate_interval() {
        let uniform = Uniform::new(4.0, 4.0).unwrap();
        assert!(draws(&uniform, 2).iter().all(|v| *v == 4.0));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        assert!(matches!(
            Uniform::new(2.0, 1.0),
            Err(ConfigError::InvalidBounds { .. })
        ));
        match build(json!({"name": "truncnorm", "a": 1.0, "b": -1.0})) {
            Err(ConfigError::InvalidBounds { path, a, b }) => {
                assert_eq!(path, "test.param");
                assert_eq!((a, b), (1.0, -1.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_truncnorm_goodness_of_fit() {
        // Covers the normal, uniform and exponential proposals and the mirrored tail
        let intervals = [
            (-1.0, 1.0),
            (-3.0, 3.0),
            (-0.3, 0.2),
            (0.5, 1.0),
            (2.0, 6.0),
            (2.5, 2.8),
            (-5.0, -1.5),
        ];
        for (seed, &(a, b)) in intervals.iter().enumerate() {
            let dist = TruncatedNormal::new(a, b, 0.0, 1.0).unwrap();
            let values = draws(&dist, 10 + seed as u64);
            assert!(values.iter().all(|v| *v >= a && *v <= b), "[{a}, {b}]");

            let d = ks_statistic(&values, |x| truncated_normal_cdf(x, a, b));
            let critical = ks_critical_value(values.len(), 0.001);
            assert!(d < critical, "[{a}, {b}]: D = {d}, critical {critical}");
        }
    }

    #[test]
    fn test_truncnorm_loc_scale() {
        let dist = build(json!({"name": "truncnorm", "a": -2, "b": 2, "loc": 10.0, "scale": 0.5}))
            .unwrap();
        assert_eq!(dist.support(), (9.0, 11.0));
        let values = draws(dist.as_ref(), 4);
        assert!(values.iter().all(|v| (9.0..=11.0).contains(v)));
        let (mean, _) = mean_and_variance(&values);
        assert_abs_diff_eq!(mean, 10.0, epsilon = 0.02);
    }

    #[test]
    fn test_truncnorm_extreme_tail_terminates() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        for (a, b) in [(1e200, 2e200), (-2e200, -1e200), (1e307, 1.7e308), (40.0, 40.5)] {
            let dist = TruncatedNormal::new(a, b, 0.0, 1.0).unwrap();
            for _ in 0..100 {
                let z = dist.sample(&mut rng);
                assert!((a..=b).contains(&z), "[{a}, {b}]: drew {z}");
            }
        }
    }

    #[test]
    fn test_truncnorm_rejects_bad_scale() {
        assert!(matches!(
            build(json!({"name": "truncnorm", "a": 0, "b": 1, "scale": 0.0})),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_registry_errors() {
        assert!(matches!(
            build(json!({"name": "cauchy", "a": 0, "b": 1})),
            Err(ConfigError::UnknownName { kind: "distribution", .. })
        ));
        assert!(matches!(
            build(json!({"a": 0, "b": 1})),
            Err(ConfigError::MissingParameter { .. })
        ));
        assert!(matches!(
            build(json!({"name": "uniform", "a": 0})),
            Err(ConfigError::MissingParameter { .. })
        ));
        assert!(matches!(
            build(json!({"name": "uniform", "a": 0, "b": 1, "c": 2})),
            Err(ConfigError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn test_same_seed_same_draws() {
        let dist = TruncatedNormal::new(-0.5, 2.0, 0.0, 1.0).unwrap();
        assert_eq!(draws(&dist, 99), draws(&dist, 99));
    }
}
