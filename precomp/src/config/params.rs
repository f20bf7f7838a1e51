//! Key-by-key access to the free-form parameters of a named operation.
//!
//! Every accessor removes the key it reads, so [`Params::finish`] can reject
//! whatever is left over as an unknown parameter. Errors name the full key
//! path, e.g. `img.transforms[2].angle_deg`.

use crate::distribution::{DistributionRegistry, Sampler};
use crate::error::ConfigError;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;

/// A stage parameter: a literal or a distribution drawn per use.
pub enum Param {
    Fixed(f64),
    Random(Box<dyn Sampler>),
}

impl Param {
    pub fn draw(&self, rng: &mut dyn RngCore) -> f64 {
        match self {
            Param::Fixed(value) => *value,
            Param::Random(sampler) => sampler.sample(rng),
        }
    }

    /// Smallest and largest value this parameter can produce.
    pub fn support(&self) -> (f64, f64) {
        match self {
            Param::Fixed(value) => (*value, *value),
            Param::Random(sampler) => sampler.support(),
        }
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Fixed(value) => write!(f, "{value}"),
            Param::Random(sampler) => write!(f, "{sampler:?}"),
        }
    }
}

/// Parameters of one operation, plus the registry used for distribution values.
pub struct Params<'r> {
    path: String,
    values: Map<String, Value>,
    distributions: &'r DistributionRegistry,
}

impl<'r> Params<'r> {
    pub fn new(
        path: impl Into<String>,
        values: Map<String, Value>,
        distributions: &'r DistributionRegistry,
    ) -> Self {
        Self {
            path: path.into(),
            values,
            distributions,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn key_path(&self, key: &str) -> String {
        format!("{}.{key}", self.path)
    }

    fn missing(&self, key: &str) -> ConfigError {
        ConfigError::MissingParameter {
            path: self.path.clone(),
            key: key.to_string(),
        }
    }

    /// A literal number. Distribution objects are rejected.
    pub fn take_f64(&mut self, key: &str) -> Result<Option<f64>, ConfigError> {
        let Some(value) = self.values.remove(key) else {
            return Ok(None);
        };
        let path = self.key_path(key);
        match value.as_f64() {
            Some(v) if v.is_finite() => Ok(Some(v)),
            Some(v) => Err(ConfigError::invalid(&path, v, "must be finite")),
            None if value.is_object() => Err(ConfigError::invalid(
                &path,
                &value,
                "must be a literal number, not a distribution",
            )),
            None => Err(ConfigError::invalid(&path, &value, "expected a number")),
        }
    }

    pub fn require_f64(&mut self, key: &str) -> Result<f64, ConfigError> {
        self.take_f64(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn take_bool(&mut self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.values.remove(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(other) => Err(ConfigError::invalid(
                &self.key_path(key),
                other,
                "expected true or false",
            )),
        }
    }

    pub fn take_str(&mut self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.values.remove(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(ConfigError::invalid(
                &self.key_path(key),
                other,
                "expected a string",
            )),
        }
    }

    /// A string restricted to `choices`. The first choice is the default.
    pub fn take_choice(
        &mut self,
        key: &str,
        choices: &[&'static str],
    ) -> Result<&'static str, ConfigError> {
        let Some(value) = self.take_str(key)? else {
            return Ok(choices[0]);
        };
        choices
            .iter()
            .copied()
            .find(|c| *c == value)
            .ok_or_else(|| ConfigError::UnknownName {
                path: self.key_path(key),
                kind: "option",
                name: value,
            })
    }

    /// A literal or a distribution object (`{"name": "uniform", "a": .., "b": ..}`).
    pub fn take_param(&mut self, key: &str) -> Result<Option<Param>, ConfigError> {
        let Some(value) = self.values.remove(key) else {
            return Ok(None);
        };
        let path = self.key_path(key);
        match value {
            Value::Object(spec) => Ok(Some(Param::Random(
                self.distributions.build(&path, spec)?,
            ))),
            other => match other.as_f64() {
                Some(v) if v.is_finite() => Ok(Some(Param::Fixed(v))),
                _ => Err(ConfigError::invalid(
                    &path,
                    other,
                    "expected a number or a distribution",
                )),
            },
        }
    }

    pub fn require_param(&mut self, key: &str) -> Result<Param, ConfigError> {
        self.take_param(key)?.ok_or_else(|| self.missing(key))
    }

    /// Deserialize a structured value.
    pub fn take_value<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>, ConfigError> {
        let Some(value) = self.values.remove(key) else {
            return Ok(None);
        };
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| ConfigError::invalid(&self.key_path(key), value, e.to_string()))
    }

    pub fn require_value<T: DeserializeOwned>(&mut self, key: &str) -> Result<T, ConfigError> {
        self.take_value(key)?.ok_or_else(|| self.missing(key))
    }

    /// Reject any key no accessor consumed.
    pub fn finish(self) -> Result<(), ConfigError> {
        match self.values.keys().next() {
            Some(key) => Err(ConfigError::UnknownParameter {
                path: self.path,
                key: key.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn params<'r>(registry: &'r DistributionRegistry, value: Value) -> Params<'r> {
        match value {
            Value::Object(map) => Params::new("img.transforms[0]", map, registry),
            _ => panic!("test params must be an object"),
        }
    }

    #[test]
    fn test_literal_and_distribution_params() {
        let registry = DistributionRegistry::with_defaults();
        let mut p = params(
            &registry,
            json!({"fixed": 2.5, "random": {"name": "uniform", "a": 1.0, "b": 2.0}}),
        );

        let fixed = p.require_param("fixed").unwrap();
        let random = p.require_param("random").unwrap();
        p.finish().unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(fixed.draw(&mut rng), 2.5);
        let v = random.draw(&mut rng);
        assert!((1.0..2.0).contains(&v));
        assert_eq!(random.support(), (1.0, 2.0));
    }

    #[test]
    fn test_unknown_key_is_reported_with_path() {
        let registry = DistributionRegistry::with_defaults();
        let mut p = params(&registry, json!({"value": 1.0, "vlaue": 2.0}));
        p.require_f64("value").unwrap();

        match p.finish() {
            Err(ConfigError::UnknownParameter { path, key }) => {
                assert_eq!(path, "img.transforms[0]");
                assert_eq!(key, "vlaue");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_and_mistyped() {
        let registry = DistributionRegistry::with_defaults();
        let mut p = params(&registry, json!({"value": {"name": "uniform", "a": 0, "b": 1}}));

        assert!(matches!(
            p.require_f64("other"),
            Err(ConfigError::MissingParameter { .. })
        ));
        match p.require_f64("value") {
            Err(ConfigError::InvalidValue { path, .. }) => {
                assert_eq!(path, "img.transforms[0].value")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_choice_defaults_to_first() {
        let registry = DistributionRegistry::with_defaults();
        let mut p = params(&registry, json!({"model": "additive", "weights": "cie"}));
        assert_eq!(p.take_choice("border", &["replicate", "reflect"]).unwrap(), "replicate");
        assert_eq!(
            p.take_choice("model", &["multiplicative", "additive"]).unwrap(),
            "additive"
        );
        assert!(matches!(
            p.take_choice("weights", &["bt601", "bt709"]),
            Err(ConfigError::UnknownName { kind: "option", .. })
        ));
    }
}
