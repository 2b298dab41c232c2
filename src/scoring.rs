//! Scoring functions mapping a measured metric value onto a score.
//!
//! Positive scores mean the metric is on the good side of its threshold,
//! negative scores mean it is not. Functions are plugins: a registry maps
//! a string name to a factory taking an opaque configuration record.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;

/// Maps a metric value to a score.
pub trait ScoringFunction: Send + std::fmt::Debug {
    fn evaluate(&self, value: f64) -> f64;
}

/// Named scoring-function configuration with an opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringFunctionConfig {
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Deserializes an opaque plugin payload, treating a missing payload as all
/// defaults.
pub fn parse_plugin_config<T: DeserializeOwned + Default>(
    value: &serde_json::Value,
) -> Result<T, ConfigurationError> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| ConfigurationError::invalid("config", e.to_string()))
}

pub type ScoringFunctionFactory =
    fn(&serde_json::Value) -> Result<Box<dyn ScoringFunction>, ConfigurationError>;

/// Registry of scoring-function factories keyed by name.
pub struct ScoringFunctionRegistry {
    factories: BTreeMap<String, ScoringFunctionFactory>,
}

impl ScoringFunctionRegistry {
    /// Registry holding the built-in binary, linear and sigmoid functions.
    pub fn with_builtins() -> Self {
        let mut registry = ScoringFunctionRegistry {
            factories: BTreeMap::new(),
        };
        registry.register("nighthawk.binary_scoring", |config| {
            Ok(Box::new(BinaryScoringFunction::from_config(config)?))
        });
        registry.register("nighthawk.linear_scoring", |config| {
            Ok(Box::new(LinearScoringFunction::from_config(config)?))
        });
        registry.register("nighthawk.sigmoid_scoring", |config| {
            Ok(Box::new(SigmoidScoringFunction::from_config(config)?))
        });
        registry
    }

    pub fn register(&mut self, name: &str, factory: ScoringFunctionFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(
        &self,
        config: &ScoringFunctionConfig,
    ) -> Result<Box<dyn ScoringFunction>, ConfigurationError> {
        let factory = self.factories.get(&config.name).ok_or_else(|| {
            ConfigurationError::invalid(
                "scoring_function",
                format!(
                    "unknown scoring function '{}'. Available: {}",
                    config.name,
                    self.names().join(", ")
                ),
            )
        })?;
        factory(&config.config)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct BinaryScoringFunctionConfig {
    lower_threshold: Option<f64>,
    upper_threshold: Option<f64>,
}

/// +1 when the value lies inside `[lower, upper]`, -1 otherwise.
#[derive(Debug)]
pub struct BinaryScoringFunction {
    lower_threshold: f64,
    upper_threshold: f64,
}

impl BinaryScoringFunction {
    pub fn new(lower_threshold: Option<f64>, upper_threshold: Option<f64>) -> Self {
        BinaryScoringFunction {
            lower_threshold: lower_threshold.unwrap_or(f64::NEG_INFINITY),
            upper_threshold: upper_threshold.unwrap_or(f64::INFINITY),
        }
    }

    fn from_config(value: &serde_json::Value) -> Result<Self, ConfigurationError> {
        let config: BinaryScoringFunctionConfig = parse_plugin_config(value)?;
        Ok(BinaryScoringFunction::new(
            config.lower_threshold,
            config.upper_threshold,
        ))
    }
}

impl ScoringFunction for BinaryScoringFunction {
    fn evaluate(&self, value: f64) -> f64 {
        if value >= self.lower_threshold && value <= self.upper_threshold {
            1.0
        } else {
            -1.0
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct LinearScoringFunctionConfig {
    threshold: f64,
    scaling_constant: f64,
}

/// `k * (threshold - value)`: positive below the threshold, negative above.
#[derive(Debug)]
pub struct LinearScoringFunction {
    threshold: f64,
    scaling_constant: f64,
}

impl LinearScoringFunction {
    pub fn new(threshold: f64, scaling_constant: f64) -> Self {
        LinearScoringFunction {
            threshold,
            scaling_constant,
        }
    }

    fn from_config(value: &serde_json::Value) -> Result<Self, ConfigurationError> {
        let config: LinearScoringFunctionConfig = parse_plugin_config(value)?;
        Ok(LinearScoringFunction::new(
            config.threshold,
            config.scaling_constant,
        ))
    }
}

impl ScoringFunction for LinearScoringFunction {
    fn evaluate(&self, value: f64) -> f64 {
        self.scaling_constant * (self.threshold - value)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct SigmoidScoringFunctionConfig {
    threshold: f64,
    k: f64,
}

/// A smooth upside-down sigmoid centered at the threshold:
/// `1 - 2 / (1 + exp(-k * (value - threshold)))`, ranging over (-1, 1).
#[derive(Debug)]
pub struct SigmoidScoringFunction {
    threshold: f64,
    k: f64,
}

impl SigmoidScoringFunction {
    pub fn new(threshold: f64, k: f64) -> Self {
        SigmoidScoringFunction { threshold, k }
    }

    fn from_config(value: &serde_json::Value) -> Result<Self, ConfigurationError> {
        let config: SigmoidScoringFunctionConfig = parse_plugin_config(value)?;
        Ok(SigmoidScoringFunction::new(config.threshold, config.k))
    }
}

impl ScoringFunction for SigmoidScoringFunction {
    fn evaluate(&self, value: f64) -> f64 {
        1.0 - 2.0 / (1.0 + (-self.k * (value - self.threshold)).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binary_inside_and_outside() {
        let scoring = BinaryScoringFunction::new(Some(1.0), Some(3.0));
        assert_eq!(scoring.evaluate(2.0), 1.0);
        assert_eq!(scoring.evaluate(1.0), 1.0);
        assert_eq!(scoring.evaluate(3.0), 1.0);
        assert_eq!(scoring.evaluate(0.5), -1.0);
        assert_eq!(scoring.evaluate(3.5), -1.0);
    }

    #[test]
    fn binary_open_bounds() {
        let upper_only = BinaryScoringFunction::new(None, Some(10.0));
        assert_eq!(upper_only.evaluate(-1e12), 1.0);
        assert_eq!(upper_only.evaluate(11.0), -1.0);
    }

    #[test]
    fn linear_sign_and_scale() {
        let scoring = LinearScoringFunction::new(100.0, 2.0);
        assert_eq!(scoring.evaluate(90.0), 20.0);
        assert_eq!(scoring.evaluate(110.0), -20.0);
        assert_eq!(scoring.evaluate(100.0), 0.0);
    }

    #[test]
    fn sigmoid_is_centered_and_bounded() {
        let scoring = SigmoidScoringFunction::new(5.0, 1.0);
        assert!(scoring.evaluate(5.0).abs() < 1e-12);
        assert!(scoring.evaluate(-100.0) > 0.999);
        assert!(scoring.evaluate(100.0) < -0.999);
        // Below threshold scores positive.
        assert!(scoring.evaluate(4.0) > 0.0);
    }

    #[test]
    fn registry_creates_from_config() {
        let registry = ScoringFunctionRegistry::with_builtins();
        let config = ScoringFunctionConfig {
            name: "nighthawk.binary_scoring".to_string(),
            config: json!({"upper_threshold": 5.0}),
        };
        let scoring = registry.create(&config).unwrap();
        assert_eq!(scoring.evaluate(4.0), 1.0);
        assert_eq!(scoring.evaluate(6.0), -1.0);
    }

    #[test]
    fn registry_rejects_unknown_names() {
        let registry = ScoringFunctionRegistry::with_builtins();
        let config = ScoringFunctionConfig {
            name: "nighthawk.nope".to_string(),
            config: serde_json::Value::Null,
        };
        let err = registry.create(&config).unwrap_err();
        assert!(err.to_string().contains("Available"));
    }

    #[test]
    fn missing_payload_uses_defaults() {
        let registry = ScoringFunctionRegistry::with_builtins();
        let config = ScoringFunctionConfig {
            name: "nighthawk.sigmoid_scoring".to_string(),
            config: serde_json::Value::Null,
        };
        assert!(registry.create(&config).is_ok());
    }
}
