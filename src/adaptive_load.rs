//! Adaptive load sessions: an outer control loop that repeatedly runs the
//! benchmark engine at varying loads, scores the results against configured
//! metric thresholds, and converges on a sustainable load level.
//!
//! A session has two stages. The adjusting stage runs short benchmarks at
//! the step controller's current load and feeds the scored results back
//! until the controller converges, reports itself doomed, or the
//! convergence deadline passes. The testing stage then runs one long
//! benchmark at the converged load.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::benchmark_client::HttpProtocol;
use crate::errors::ConfigurationError;
use crate::metrics_plugin::{
    BuiltinMetricsPlugin, MetricsPlugin, MetricsPluginConfig, MetricsPluginRegistry,
    BUILTIN_PLUGIN_NAME,
};
use crate::options::{Concurrency, LoadOptions};
use crate::output::Output;
use crate::process::Process;
use crate::scoring::{ScoringFunctionConfig, ScoringFunctionRegistry};
use crate::sequencer::SequencerIdleStrategy;
use crate::step_controller::{StepControllerConfig, StepControllerRegistry};
use crate::utils::serde_opt_duration;

/// Session status codes, mirroring the usual RPC status space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Ok,
    InvalidArgument,
    DeadlineExceeded,
    Aborted,
    Internal,
    Unknown,
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::Ok
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStatus {
    #[serde(default)]
    pub code: StatusCode,
    #[serde(default)]
    pub message: String,
}

/// Names one metric served by one plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSpec {
    /// Empty means the builtin plugin.
    pub metrics_plugin_name: String,
    pub metric_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub scoring_function: ScoringFunctionConfig,
    /// Defaults to 1.0 when unset.
    #[serde(default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpecWithThreshold {
    pub metric_spec: MetricSpec,
    pub threshold_spec: ThresholdSpec,
}

/// One metric's measured value and score for one benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvaluation {
    pub metric_id: String,
    pub metric_value: f64,
    /// Absent for informational metrics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_score: Option<f64>,
    pub weight: f64,
}

/// A benchmark run plus its computed evaluations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Output>,
    #[serde(default)]
    pub status: SessionStatus,
    pub metric_evaluations: Vec<MetricEvaluation>,
}

impl BenchmarkResult {
    /// Weighted average of the decisive scores. An errored benchmark scores
    /// -1; a result with no decisive evaluations scores 0.
    pub fn weighted_score(&self) -> f64 {
        if self.status.code != StatusCode::Ok {
            return -1.0;
        }
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for evaluation in &self.metric_evaluations {
            if evaluation.weight > 0.0 {
                if let Some(score) = evaluation.threshold_score {
                    weighted_sum += score * evaluation.weight;
                    weight_total += evaluation.weight;
                }
            }
        }
        if weight_total == 0.0 {
            0.0
        } else {
            weighted_sum / weight_total
        }
    }
}

/// The base traffic shape for a session: a load specification without the
/// fields the session itself controls (duration, open-loop mode, and the
/// variable the step controller adjusts).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficTemplate {
    pub uri: String,
    pub requests_per_second: Option<u64>,
    pub connections: Option<u32>,
    #[serde(with = "serde_opt_duration")]
    pub duration: Option<Duration>,
    #[serde(with = "serde_opt_duration")]
    pub timeout: Option<Duration>,
    pub protocol: Option<HttpProtocol>,
    pub concurrency: Option<Concurrency>,
    pub burst_size: Option<u64>,
    pub prefetch_connections: Option<bool>,
    pub open_loop: Option<bool>,
    pub max_pending_requests: Option<u32>,
    pub max_active_requests: Option<u32>,
    pub max_requests_per_connection: Option<u32>,
    pub max_concurrent_streams: Option<u32>,
    pub request_method: Option<String>,
    pub request_headers: Option<Vec<String>>,
    pub request_body_size: Option<u32>,
    pub sequencer_idle_strategy: Option<SequencerIdleStrategy>,
    #[serde(with = "serde_opt_duration")]
    pub jitter_uniform: Option<Duration>,
}

impl TrafficTemplate {
    /// Materializes load options, filling defaults for everything unset.
    /// Duration and open-loop mode are left at their defaults here; the
    /// session loop overwrites both for every benchmark it runs.
    pub fn build_options(&self) -> LoadOptions {
        let defaults = LoadOptions::default();
        LoadOptions {
            uri: self.uri.clone(),
            requests_per_second: self
                .requests_per_second
                .unwrap_or(defaults.requests_per_second),
            connections: self.connections.unwrap_or(defaults.connections),
            duration: self.duration.unwrap_or(defaults.duration),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            protocol: self.protocol.unwrap_or(defaults.protocol),
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            burst_size: self.burst_size.unwrap_or(defaults.burst_size),
            prefetch_connections: self
                .prefetch_connections
                .unwrap_or(defaults.prefetch_connections),
            open_loop: self.open_loop.unwrap_or(defaults.open_loop),
            max_pending_requests: self
                .max_pending_requests
                .unwrap_or(defaults.max_pending_requests),
            max_active_requests: self
                .max_active_requests
                .unwrap_or(defaults.max_active_requests),
            max_requests_per_connection: self
                .max_requests_per_connection
                .unwrap_or(defaults.max_requests_per_connection),
            max_concurrent_streams: self
                .max_concurrent_streams
                .unwrap_or(defaults.max_concurrent_streams),
            request_method: self
                .request_method
                .clone()
                .unwrap_or(defaults.request_method),
            request_headers: self
                .request_headers
                .clone()
                .unwrap_or(defaults.request_headers),
            request_body_size: self.request_body_size.unwrap_or(defaults.request_body_size),
            sequencer_idle_strategy: self
                .sequencer_idle_strategy
                .unwrap_or(defaults.sequencer_idle_strategy),
            jitter_uniform: self.jitter_uniform.unwrap_or(defaults.jitter_uniform),
            termination_predicates: defaults.termination_predicates,
            failure_predicates: defaults.failure_predicates,
        }
    }
}

/// The sealed session input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveLoadSessionSpec {
    pub nighthawk_traffic_template: TrafficTemplate,
    /// Duration of each adjusting-stage benchmark. Default 10s.
    #[serde(with = "serde_opt_duration")]
    pub measuring_period: Option<Duration>,
    /// Duration of the single testing-stage benchmark. Default 30s.
    #[serde(with = "serde_opt_duration")]
    pub testing_stage_duration: Option<Duration>,
    /// How long the adjusting stage may take overall. Default 300s.
    #[serde(with = "serde_opt_duration")]
    pub convergence_deadline: Option<Duration>,
    pub metric_thresholds: Vec<MetricSpecWithThreshold>,
    pub informational_metric_specs: Vec<MetricSpec>,
    pub step_controller_config: StepControllerConfig,
    pub metrics_plugin_configs: Vec<MetricsPluginConfig>,
}

/// The sealed session output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptiveLoadSessionOutput {
    pub session_status: SessionStatus,
    pub metric_thresholds: Vec<MetricSpecWithThreshold>,
    pub adjusting_stage_results: Vec<BenchmarkResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testing_stage_result: Option<BenchmarkResult>,
}

/// Executes one benchmark; each call blocks until the run finishes. The
/// error string is propagated into the result status without aborting the
/// session.
pub trait BenchmarkRunner {
    fn run_benchmark(&mut self, options: &LoadOptions) -> Result<Output, String>;
}

/// Runs benchmarks in this process.
pub struct LocalProcessRunner;

impl BenchmarkRunner for LocalProcessRunner {
    fn run_benchmark(&mut self, options: &LoadOptions) -> Result<Output, String> {
        let process = Process::new(options.clone()).map_err(|e| e.to_string())?;
        process.execute().map_err(|e| e.to_string())
    }
}

/// Plugin registries a session resolves against.
pub struct SessionRegistries {
    pub scoring: ScoringFunctionRegistry,
    pub step_controllers: StepControllerRegistry,
    pub metrics_plugins: MetricsPluginRegistry,
}

impl Default for SessionRegistries {
    fn default() -> Self {
        SessionRegistries {
            scoring: ScoringFunctionRegistry::with_builtins(),
            step_controllers: StepControllerRegistry::with_builtins(),
            metrics_plugins: MetricsPluginRegistry::new(),
        }
    }
}

/// Returns a copy of the spec with default values inserted.
fn set_defaults(original: &AdaptiveLoadSessionSpec) -> AdaptiveLoadSessionSpec {
    let mut spec = original.clone();
    spec.measuring_period
        .get_or_insert(Duration::from_secs(10));
    spec.convergence_deadline
        .get_or_insert(Duration::from_secs(300));
    spec.testing_stage_duration
        .get_or_insert(Duration::from_secs(30));
    for threshold in &mut spec.metric_thresholds {
        if threshold.metric_spec.metrics_plugin_name.is_empty() {
            threshold.metric_spec.metrics_plugin_name = BUILTIN_PLUGIN_NAME.to_string();
        }
        threshold.threshold_spec.weight.get_or_insert(1.0);
    }
    for metric_spec in &mut spec.informational_metric_specs {
        if metric_spec.metrics_plugin_name.is_empty() {
            metric_spec.metrics_plugin_name = BUILTIN_PLUGIN_NAME.to_string();
        }
    }
    spec
}

/// Checks the session spec: no forbidden fields in the traffic template, no
/// duplicate or unresolvable plugins, no metric names their plugin does not
/// advertise. Every problem found is reported.
fn check_session_spec(
    spec: &AdaptiveLoadSessionSpec,
    registries: &SessionRegistries,
) -> Result<(), ConfigurationError> {
    let mut problems = Vec::new();
    let template = &spec.nighthawk_traffic_template;

    if template.duration.is_some() {
        problems.push(
            "nighthawk_traffic_template must not set duration; use measuring_period and \
             testing_stage_duration instead"
                .to_string(),
        );
    }
    if template.open_loop.is_some() {
        problems.push(
            "nighthawk_traffic_template must not set open_loop; adaptive sessions always run \
             open loop"
                .to_string(),
        );
    }
    if template.requests_per_second.is_some() {
        problems.push(
            "nighthawk_traffic_template must not set requests_per_second; the step controller \
             sets it per iteration"
                .to_string(),
        );
    }

    // Resolve every declared plugin, rejecting duplicate names.
    let mut advertised: BTreeMap<String, Vec<String>> = BTreeMap::new();
    advertised.insert(
        BUILTIN_PLUGIN_NAME.to_string(),
        BuiltinMetricsPlugin::empty()
            .metric_names()
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for config in &spec.metrics_plugin_configs {
        if advertised.contains_key(&config.name) {
            problems.push(format!(
                "duplicate metrics plugin declaration '{}'",
                config.name
            ));
            continue;
        }
        match registries.metrics_plugins.create(config) {
            Ok(plugin) => {
                advertised.insert(
                    config.name.clone(),
                    plugin.metric_names().iter().map(|s| s.to_string()).collect(),
                );
            }
            Err(e) => problems.push(format!("MetricsPlugin not found: {}", e)),
        }
    }

    if let Err(e) = registries
        .step_controllers
        .create(&spec.step_controller_config, &template.build_options())
    {
        problems.push(format!("StepController plugin not found: {}", e));
    }

    let mut all_metric_specs: Vec<&MetricSpec> = Vec::new();
    for threshold in &spec.metric_thresholds {
        all_metric_specs.push(&threshold.metric_spec);
        if let Err(e) = registries
            .scoring
            .create(&threshold.threshold_spec.scoring_function)
        {
            problems.push(format!("ScoringFunction plugin not found: {}", e));
        }
    }
    all_metric_specs.extend(spec.informational_metric_specs.iter());

    let plugin_names: Vec<String> = advertised.keys().cloned().collect();
    for metric_spec in all_metric_specs {
        match advertised.get(&metric_spec.metrics_plugin_name) {
            Some(names) => {
                if !names.contains(&metric_spec.metric_name) {
                    problems.push(format!(
                        "Metric named '{}' not implemented by plugin '{}'. Metrics implemented: {}",
                        metric_spec.metric_name,
                        metric_spec.metrics_plugin_name,
                        names.join(", ")
                    ));
                }
            }
            None => {
                problems.push(format!(
                    "MetricSpec referred to nonexistent metrics_plugin_name '{}'. Declare the \
                     plugin in metrics_plugin_configs or use '{}'. Available plugins: {}",
                    metric_spec.metrics_plugin_name,
                    BUILTIN_PLUGIN_NAME,
                    plugin_names.join(", ")
                ));
            }
        }
    }

    ConfigurationError::from_problems(problems)
}

/// Runs one benchmark and scores it against the configured thresholds.
fn perform_and_analyze(
    runner: &mut dyn BenchmarkRunner,
    spec: &AdaptiveLoadSessionSpec,
    registries: &SessionRegistries,
    options: &LoadOptions,
) -> BenchmarkResult {
    let output = match runner.run_benchmark(options) {
        Ok(output) => output,
        Err(message) => {
            warn!(error = %message, "Benchmark execution failed");
            return BenchmarkResult {
                output: None,
                status: SessionStatus {
                    code: StatusCode::Internal,
                    message,
                },
                metric_evaluations: Vec::new(),
            };
        }
    };

    let mut plugins: BTreeMap<String, Box<dyn MetricsPlugin>> = BTreeMap::new();
    plugins.insert(
        BUILTIN_PLUGIN_NAME.to_string(),
        Box::new(BuiltinMetricsPlugin::new(output.clone())),
    );
    for config in &spec.metrics_plugin_configs {
        if let Ok(plugin) = registries.metrics_plugins.create(config) {
            plugins.insert(config.name.clone(), plugin);
        }
    }

    let lookup = |plugin_name: &str, metric_name: &str| -> f64 {
        plugins
            .get(plugin_name)
            .and_then(|plugin| plugin.metric_by_name(metric_name).ok())
            .unwrap_or(f64::NAN)
    };

    let mut evaluations = Vec::new();
    for threshold in &spec.metric_thresholds {
        let metric_spec = &threshold.metric_spec;
        let value = lookup(&metric_spec.metrics_plugin_name, &metric_spec.metric_name);
        let score = registries
            .scoring
            .create(&threshold.threshold_spec.scoring_function)
            .map(|scoring| scoring.evaluate(value))
            .ok();
        evaluations.push(MetricEvaluation {
            metric_id: format!(
                "{}/{}",
                metric_spec.metrics_plugin_name, metric_spec.metric_name
            ),
            metric_value: value,
            threshold_score: score,
            weight: threshold.threshold_spec.weight.unwrap_or(1.0),
        });
    }
    for metric_spec in &spec.informational_metric_specs {
        let value = lookup(&metric_spec.metrics_plugin_name, &metric_spec.metric_name);
        evaluations.push(MetricEvaluation {
            metric_id: format!(
                "{}/{}",
                metric_spec.metrics_plugin_name, metric_spec.metric_name
            ),
            metric_value: value,
            threshold_score: None,
            weight: 0.0,
        });
    }

    BenchmarkResult {
        output: Some(output),
        status: SessionStatus::default(),
        metric_evaluations: evaluations,
    }
}

/// Performs a full adaptive load session with the default plugin
/// registries.
pub fn perform_adaptive_load_session(
    runner: &mut dyn BenchmarkRunner,
    spec: &AdaptiveLoadSessionSpec,
) -> AdaptiveLoadSessionOutput {
    perform_adaptive_load_session_with(runner, spec, &SessionRegistries::default())
}

/// Performs a full adaptive load session against the given registries.
pub fn perform_adaptive_load_session_with(
    runner: &mut dyn BenchmarkRunner,
    input_spec: &AdaptiveLoadSessionSpec,
    registries: &SessionRegistries,
) -> AdaptiveLoadSessionOutput {
    let spec = set_defaults(input_spec);
    let mut output = AdaptiveLoadSessionOutput {
        metric_thresholds: spec.metric_thresholds.clone(),
        ..AdaptiveLoadSessionOutput::default()
    };

    if let Err(e) = check_session_spec(&spec, registries) {
        output.session_status = SessionStatus {
            code: StatusCode::InvalidArgument,
            message: e.to_string(),
        };
        return output;
    }

    let template_options = spec.nighthawk_traffic_template.build_options();
    let mut step_controller = registries
        .step_controllers
        .create(&spec.step_controller_config, &template_options)
        .expect("step controller config was validated");

    let measuring_period = spec.measuring_period.expect("defaulted");
    let testing_stage_duration = spec.testing_stage_duration.expect("defaulted");
    let convergence_deadline = spec.convergence_deadline.expect("defaulted");

    let session_start = Instant::now();
    while !step_controller.is_converged() {
        if let Some(reason) = step_controller.is_doomed() {
            let message = format!(
                "Step controller determined that it can never converge: {}",
                reason
            );
            info!("{}", message);
            output.session_status = SessionStatus {
                code: StatusCode::Aborted,
                message,
            };
            return output;
        }
        if session_start.elapsed() > convergence_deadline {
            let message = format!(
                "Failed to converge before deadline of {:.0} seconds.",
                convergence_deadline.as_secs_f64()
            );
            info!("{}", message);
            output.session_status = SessionStatus {
                code: StatusCode::DeadlineExceeded,
                message,
            };
            return output;
        }

        let mut options = step_controller.current_load_options();
        options.duration = measuring_period;
        options.open_loop = true;
        info!(
            requests_per_second = options.requests_per_second,
            "Adjusting stage: trying load"
        );

        let result = perform_and_analyze(runner, &spec, registries, &options);
        for evaluation in &result.metric_evaluations {
            info!(
                metric = %evaluation.metric_id,
                value = evaluation.metric_value,
                score = ?evaluation.threshold_score,
                "Evaluation"
            );
        }
        step_controller.update_and_recompute(&result);
        output.adjusting_stage_results.push(result);
    }

    let mut options = step_controller.current_load_options();
    options.duration = testing_stage_duration;
    options.open_loop = true;
    info!(
        requests_per_second = options.requests_per_second,
        "Testing stage"
    );
    output.testing_stage_result = Some(perform_and_analyze(runner, &spec, registries, &options));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn threshold(metric_name: &str, upper: f64) -> MetricSpecWithThreshold {
        MetricSpecWithThreshold {
            metric_spec: MetricSpec {
                metrics_plugin_name: String::new(),
                metric_name: metric_name.to_string(),
            },
            threshold_spec: ThresholdSpec {
                scoring_function: ScoringFunctionConfig {
                    name: "nighthawk.binary_scoring".to_string(),
                    config: json!({ "upper_threshold": upper }),
                },
                weight: None,
            },
        }
    }

    fn base_spec() -> AdaptiveLoadSessionSpec {
        AdaptiveLoadSessionSpec {
            nighthawk_traffic_template: TrafficTemplate {
                uri: "http://localhost:8080/".to_string(),
                ..TrafficTemplate::default()
            },
            metric_thresholds: vec![threshold("mean-latency-ns", 1e12)],
            ..AdaptiveLoadSessionSpec::default()
        }
    }

    #[test]
    fn defaults_are_inserted() {
        let spec = set_defaults(&base_spec());
        assert_eq!(spec.measuring_period, Some(Duration::from_secs(10)));
        assert_eq!(spec.testing_stage_duration, Some(Duration::from_secs(30)));
        assert_eq!(spec.convergence_deadline, Some(Duration::from_secs(300)));
        assert_eq!(
            spec.metric_thresholds[0].metric_spec.metrics_plugin_name,
            BUILTIN_PLUGIN_NAME
        );
        assert_eq!(spec.metric_thresholds[0].threshold_spec.weight, Some(1.0));
    }

    #[test]
    fn forbidden_template_fields_are_rejected() {
        let mut spec = base_spec();
        spec.nighthawk_traffic_template.duration = Some(Duration::from_secs(5));
        spec.nighthawk_traffic_template.open_loop = Some(true);
        spec.nighthawk_traffic_template.requests_per_second = Some(100);
        let err =
            check_session_spec(&set_defaults(&spec), &SessionRegistries::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("duration"));
        assert!(message.contains("open_loop"));
        assert!(message.contains("requests_per_second"));
    }

    #[test]
    fn unknown_metric_name_is_rejected() {
        let mut spec = base_spec();
        spec.metric_thresholds = vec![threshold("not-a-metric", 1.0)];
        let err =
            check_session_spec(&set_defaults(&spec), &SessionRegistries::default()).unwrap_err();
        assert!(err.to_string().contains("not implemented by plugin"));
        assert!(err.to_string().contains("Metrics implemented"));
    }

    #[test]
    fn unknown_plugin_reference_is_rejected() {
        let mut spec = base_spec();
        spec.metric_thresholds[0].metric_spec.metrics_plugin_name = "custom.plugin".to_string();
        let err =
            check_session_spec(&set_defaults(&spec), &SessionRegistries::default()).unwrap_err();
        assert!(err.to_string().contains("nonexistent metrics_plugin_name"));
    }

    #[test]
    fn duplicate_plugin_declarations_are_rejected() {
        let mut registries = SessionRegistries::default();
        registries.metrics_plugins.register("custom.plugin", |_| {
            Ok(Box::new(BuiltinMetricsPlugin::empty()))
        });
        let mut spec = base_spec();
        spec.metrics_plugin_configs = vec![
            MetricsPluginConfig {
                name: "custom.plugin".to_string(),
                config: serde_json::Value::Null,
            },
            MetricsPluginConfig {
                name: "custom.plugin".to_string(),
                config: serde_json::Value::Null,
            },
        ];
        let err = check_session_spec(&set_defaults(&spec), &registries).unwrap_err();
        assert!(err.to_string().contains("duplicate metrics plugin"));
    }

    #[test]
    fn validation_failure_sets_invalid_argument_status() {
        let mut spec = base_spec();
        spec.nighthawk_traffic_template.duration = Some(Duration::from_secs(1));
        let mut runner = FailingRunner;
        let output = perform_adaptive_load_session(&mut runner, &spec);
        assert_eq!(output.session_status.code, StatusCode::InvalidArgument);
        assert!(output.adjusting_stage_results.is_empty());
        assert!(output.testing_stage_result.is_none());
    }

    struct FailingRunner;

    impl BenchmarkRunner for FailingRunner {
        fn run_benchmark(&mut self, _options: &LoadOptions) -> Result<Output, String> {
            Err("benchmark process exited".to_string())
        }
    }

    #[test]
    fn benchmark_error_dooms_search_at_initial_load() {
        let spec = base_spec();
        let mut runner = FailingRunner;
        let output = perform_adaptive_load_session(&mut runner, &spec);
        // The errored first iteration scores -1, so the exponential search
        // is doomed and the session aborts.
        assert_eq!(output.session_status.code, StatusCode::Aborted);
        assert_eq!(output.adjusting_stage_results.len(), 1);
        assert_eq!(
            output.adjusting_stage_results[0].status.code,
            StatusCode::Internal
        );
        assert!(output.testing_stage_result.is_none());
    }

    #[test]
    fn weighted_score_handles_weights_and_errors() {
        let result = BenchmarkResult {
            output: None,
            status: SessionStatus::default(),
            metric_evaluations: vec![
                MetricEvaluation {
                    metric_id: "a".to_string(),
                    metric_value: 0.0,
                    threshold_score: Some(1.0),
                    weight: 3.0,
                },
                MetricEvaluation {
                    metric_id: "b".to_string(),
                    metric_value: 0.0,
                    threshold_score: Some(-1.0),
                    weight: 1.0,
                },
                MetricEvaluation {
                    metric_id: "informational".to_string(),
                    metric_value: 42.0,
                    threshold_score: None,
                    weight: 0.0,
                },
            ],
        };
        assert!((result.weighted_score() - 0.5).abs() < 1e-9);

        let errored = BenchmarkResult {
            output: None,
            status: SessionStatus {
                code: StatusCode::Internal,
                message: "bad".to_string(),
            },
            metric_evaluations: vec![],
        };
        assert_eq!(errored.weighted_score(), -1.0);
    }
}
