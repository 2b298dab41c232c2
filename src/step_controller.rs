//! Step controllers: the feedback half of the adaptive loop.
//!
//! A step controller proposes the load for the next benchmark, digests the
//! scored result, and decides when the search has converged or can never
//! succeed. The controller adjusts exactly one input variable, written back
//! into the load options through an [`InputVariableSetter`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adaptive_load::BenchmarkResult;
use crate::errors::ConfigurationError;
use crate::options::LoadOptions;
use crate::scoring::parse_plugin_config;

/// Reads and writes the one input variable a controller adjusts.
pub trait InputVariableSetter: Send {
    fn name(&self) -> &'static str;
    fn get(&self, options: &LoadOptions) -> f64;
    fn set(&self, options: &mut LoadOptions, value: f64);
}

/// Adjusts `requests_per_second`.
pub struct RequestsPerSecondSetter;

impl InputVariableSetter for RequestsPerSecondSetter {
    fn name(&self) -> &'static str {
        "requests-per-second"
    }

    fn get(&self, options: &LoadOptions) -> f64 {
        options.requests_per_second as f64
    }

    fn set(&self, options: &mut LoadOptions, value: f64) {
        options.requests_per_second = value.round().max(1.0) as u64;
    }
}

/// The controller contract the adaptive session loop drives.
pub trait StepController: Send {
    /// Whether the current load is within the controller's tolerance of the
    /// configured thresholds.
    fn is_converged(&self) -> bool;

    /// A reason string when the controller determined no achievable load can
    /// meet the thresholds.
    fn is_doomed(&self) -> Option<String>;

    /// Load options for the next benchmark.
    fn current_load_options(&self) -> LoadOptions;

    /// Digests a scored benchmark result and recomputes the next load.
    fn update_and_recompute(&mut self, result: &BenchmarkResult);
}

/// Named step-controller configuration with an opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepControllerConfig {
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Default for StepControllerConfig {
    fn default() -> Self {
        StepControllerConfig {
            name: "nighthawk.exponential_search".to_string(),
            config: serde_json::Value::Null,
        }
    }
}

pub type StepControllerFactory = fn(
    &serde_json::Value,
    &LoadOptions,
) -> Result<Box<dyn StepController>, ConfigurationError>;

/// Registry of step-controller factories keyed by name.
pub struct StepControllerRegistry {
    factories: BTreeMap<String, StepControllerFactory>,
}

impl StepControllerRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = StepControllerRegistry {
            factories: BTreeMap::new(),
        };
        registry.register("nighthawk.exponential_search", |config, template| {
            Ok(Box::new(ExponentialSearchStepController::new(
                parse_plugin_config(config)?,
                template.clone(),
            )?))
        });
        registry
    }

    pub fn register(&mut self, name: &str, factory: StepControllerFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(
        &self,
        config: &StepControllerConfig,
        template: &LoadOptions,
    ) -> Result<Box<dyn StepController>, ConfigurationError> {
        let factory = self.factories.get(&config.name).ok_or_else(|| {
            ConfigurationError::invalid(
                "step_controller",
                format!(
                    "unknown step controller '{}'. Available: {}",
                    config.name,
                    self.names().join(", ")
                ),
            )
        })?;
        factory(&config.config, template)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExponentialSearchStepControllerConfig {
    /// Load for the first adjusting iteration.
    pub initial_value: f64,
    /// Growth factor while results stay good.
    pub exponential_factor: f64,
}

impl Default for ExponentialSearchStepControllerConfig {
    fn default() -> Self {
        ExponentialSearchStepControllerConfig {
            initial_value: 10.0,
            exponential_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchPhase {
    InitialRun,
    ExponentialGrowth,
    Bisect,
}

/// Exponential search over one input variable.
///
/// Grows the load by a fixed factor while the weighted score stays
/// nonnegative; the first failing iteration brackets the answer and a
/// binary search narrows it. Doomed when the configured initial load
/// already fails.
pub struct ExponentialSearchStepController {
    template: LoadOptions,
    setter: Box<dyn InputVariableSetter>,
    factor: f64,
    current: f64,
    bottom: f64,
    top: f64,
    phase: SearchPhase,
    doomed: Option<String>,
}

impl ExponentialSearchStepController {
    pub fn new(
        config: ExponentialSearchStepControllerConfig,
        template: LoadOptions,
    ) -> Result<Self, ConfigurationError> {
        if !config.initial_value.is_finite() || config.initial_value <= 0.0 {
            return Err(ConfigurationError::invalid(
                "initial_value",
                "must be greater than zero",
            ));
        }
        if !config.exponential_factor.is_finite() || config.exponential_factor <= 1.0 {
            return Err(ConfigurationError::invalid(
                "exponential_factor",
                "must be greater than one",
            ));
        }
        Ok(ExponentialSearchStepController {
            template,
            setter: Box::new(RequestsPerSecondSetter),
            factor: config.exponential_factor,
            current: config.initial_value,
            bottom: config.initial_value,
            top: f64::INFINITY,
            phase: SearchPhase::InitialRun,
            doomed: None,
        })
    }

    fn bracket_width_tolerance(&self) -> f64 {
        // Converge once the bracket narrows to one unit or one percent of
        // its lower bound, whichever is larger.
        (self.bottom * 0.01).max(1.0)
    }

    fn effective_value(&self) -> f64 {
        if self.is_converged() {
            // Settle on the highest load known to pass.
            self.bottom
        } else {
            self.current
        }
    }
}

impl StepController for ExponentialSearchStepController {
    fn is_converged(&self) -> bool {
        self.phase == SearchPhase::Bisect && self.top - self.bottom <= self.bracket_width_tolerance()
    }

    fn is_doomed(&self) -> Option<String> {
        self.doomed.clone()
    }

    fn current_load_options(&self) -> LoadOptions {
        let mut options = self.template.clone();
        self.setter.set(&mut options, self.effective_value());
        options
    }

    fn update_and_recompute(&mut self, result: &BenchmarkResult) {
        let score = result.weighted_score();
        debug!(
            input_variable = self.setter.name(),
            value = self.current,
            score,
            "Step controller update"
        );
        match self.phase {
            SearchPhase::InitialRun => {
                if score >= 0.0 {
                    self.bottom = self.current;
                    self.current *= self.factor;
                    self.phase = SearchPhase::ExponentialGrowth;
                } else {
                    self.doomed = Some(format!(
                        "the minimum load ({} = {}) already scores negative",
                        self.setter.name(),
                        self.current
                    ));
                }
            }
            SearchPhase::ExponentialGrowth => {
                if score >= 0.0 {
                    self.bottom = self.current;
                    self.current *= self.factor;
                } else {
                    self.top = self.current;
                    self.phase = SearchPhase::Bisect;
                    self.current = (self.bottom + self.top) / 2.0;
                    info!(
                        bottom = self.bottom,
                        top = self.top,
                        "Bracketed the sustainable load; bisecting"
                    );
                }
            }
            SearchPhase::Bisect => {
                if score >= 0.0 {
                    self.bottom = self.current;
                } else {
                    self.top = self.current;
                }
                self.current = (self.bottom + self.top) / 2.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive_load::{MetricEvaluation, SessionStatus};

    fn result_with_score(score: f64) -> BenchmarkResult {
        BenchmarkResult {
            output: None,
            status: SessionStatus::default(),
            metric_evaluations: vec![MetricEvaluation {
                metric_id: "nighthawk.builtin/success-rate".to_string(),
                metric_value: 1.0,
                threshold_score: Some(score),
                weight: 1.0,
            }],
        }
    }

    fn controller(initial: f64) -> ExponentialSearchStepController {
        ExponentialSearchStepController::new(
            ExponentialSearchStepControllerConfig {
                initial_value: initial,
                exponential_factor: 2.0,
            },
            LoadOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn grows_while_scores_stay_good() {
        let mut controller = controller(10.0);
        assert_eq!(
            controller.current_load_options().requests_per_second,
            10
        );
        controller.update_and_recompute(&result_with_score(1.0));
        assert_eq!(controller.current_load_options().requests_per_second, 20);
        controller.update_and_recompute(&result_with_score(1.0));
        assert_eq!(controller.current_load_options().requests_per_second, 40);
        assert!(!controller.is_converged());
        assert!(controller.is_doomed().is_none());
    }

    #[test]
    fn bisects_after_first_failure_and_converges() {
        let mut controller = controller(10.0);
        // Anything above 50 rps "fails".
        let mut iterations = 0;
        while !controller.is_converged() {
            let rps = controller.current_load_options().requests_per_second;
            let score = if rps as f64 <= 50.0 { 1.0 } else { -1.0 };
            controller.update_and_recompute(&result_with_score(score));
            iterations += 1;
            assert!(iterations < 64, "search failed to converge");
        }
        let converged = controller.current_load_options().requests_per_second;
        assert!(
            (40..=50).contains(&converged),
            "converged at {}",
            converged
        );
    }

    #[test]
    fn doomed_when_initial_load_fails() {
        let mut controller = controller(10.0);
        controller.update_and_recompute(&result_with_score(-1.0));
        let reason = controller.is_doomed().unwrap();
        assert!(reason.contains("requests-per-second"));
        assert!(!controller.is_converged());
    }

    #[test]
    fn error_results_count_as_failures() {
        let mut controller = controller(10.0);
        controller.update_and_recompute(&result_with_score(1.0));
        let error_result = BenchmarkResult {
            output: None,
            status: SessionStatus {
                code: crate::adaptive_load::StatusCode::Internal,
                message: "benchmark failed".to_string(),
            },
            metric_evaluations: vec![],
        };
        // An errored benchmark brackets the search downwards.
        controller.update_and_recompute(&error_result);
        assert!(controller.current_load_options().requests_per_second < 20);
    }

    #[test]
    fn config_validation() {
        assert!(ExponentialSearchStepController::new(
            ExponentialSearchStepControllerConfig {
                initial_value: 0.0,
                exponential_factor: 2.0,
            },
            LoadOptions::default(),
        )
        .is_err());
        assert!(ExponentialSearchStepController::new(
            ExponentialSearchStepControllerConfig {
                initial_value: 5.0,
                exponential_factor: 1.0,
            },
            LoadOptions::default(),
        )
        .is_err());
    }

    #[test]
    fn registry_resolves_builtin() {
        let registry = StepControllerRegistry::with_builtins();
        let controller = registry
            .create(&StepControllerConfig::default(), &LoadOptions::default())
            .unwrap();
        assert!(!controller.is_converged());
    }
}
