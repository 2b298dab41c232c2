//! Metrics plugins: named sources of scalar metrics for the adaptive
//! controller.
//!
//! The built-in `nighthawk.builtin` plugin derives its metrics from a
//! benchmark's own output record. External plugins are declared by name in
//! the session spec and resolved through the registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ConfigurationError;
use crate::output::Output;
use crate::statistic::StatisticRecord;

/// Name the built-in plugin is registered under.
pub const BUILTIN_PLUGIN_NAME: &str = "nighthawk.builtin";

/// A named source of scalar metrics.
pub trait MetricsPlugin: Send {
    /// All metric names this plugin can answer for.
    fn metric_names(&self) -> Vec<&'static str>;

    /// Looks up a metric by name. Unknown names are an error; known names
    /// with no backing data yield NaN.
    fn metric_by_name(&self, name: &str) -> Result<f64, ConfigurationError>;
}

/// Named metrics-plugin configuration with an opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsPluginConfig {
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

pub type MetricsPluginFactory =
    fn(&serde_json::Value) -> Result<Box<dyn MetricsPlugin>, ConfigurationError>;

/// Registry of metrics-plugin factories keyed by name.
#[derive(Default)]
pub struct MetricsPluginRegistry {
    factories: BTreeMap<String, MetricsPluginFactory>,
}

impl MetricsPluginRegistry {
    pub fn new() -> Self {
        MetricsPluginRegistry::default()
    }

    pub fn register(&mut self, name: &str, factory: MetricsPluginFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(
        &self,
        config: &MetricsPluginConfig,
    ) -> Result<Box<dyn MetricsPlugin>, ConfigurationError> {
        let factory = self.factories.get(&config.name).ok_or_else(|| {
            ConfigurationError::invalid(
                "metrics_plugin",
                format!("unknown metrics plugin '{}'", config.name),
            )
        })?;
        factory(&config.config)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

/// Metric names served by the builtin plugin.
const BUILTIN_METRIC_NAMES: [&str; 11] = [
    "attempted-rps",
    "achieved-rps",
    "send-rate",
    "success-rate",
    "mean-latency-ns",
    "min-latency-ns",
    "max-latency-ns",
    "pstdev-latency-ns",
    "p50-latency-ns",
    "p90-latency-ns",
    "p99-latency-ns",
];

/// Id of the latency statistic the builtin plugin reads.
const RESPONSE_STATISTIC_ID: &str = "benchmark_http_client.request_to_response";

/// Derives metrics from a benchmark output's counters and statistics.
pub struct BuiltinMetricsPlugin {
    output: Option<Output>,
}

impl BuiltinMetricsPlugin {
    pub fn new(output: Output) -> Self {
        BuiltinMetricsPlugin {
            output: Some(output),
        }
    }

    /// A data-less instance, used at validation time to advertise names.
    pub fn empty() -> Self {
        BuiltinMetricsPlugin { output: None }
    }

    fn counter(&self, name: &str) -> f64 {
        self.output
            .as_ref()
            .and_then(|o| o.global().counter(name))
            .unwrap_or(0) as f64
    }

    fn duration_seconds(&self) -> f64 {
        self.output
            .as_ref()
            .map(|o| o.global().execution_duration.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn response_statistic(&self) -> Option<&StatisticRecord> {
        self.output
            .as_ref()
            .and_then(|o| o.global().statistic(RESPONSE_STATISTIC_ID))
    }

    fn rate(&self, count: f64) -> f64 {
        let seconds = self.duration_seconds();
        if seconds <= 0.0 {
            0.0
        } else {
            count / seconds
        }
    }

    fn responses_received(&self) -> f64 {
        [
            "benchmark.http_1xx",
            "benchmark.http_2xx",
            "benchmark.http_3xx",
            "benchmark.http_4xx",
            "benchmark.http_5xx",
            "benchmark.http_xxx",
        ]
        .iter()
        .map(|name| self.counter(name))
        .sum()
    }

    fn latency_percentile(&self, quantile: f64) -> f64 {
        let Some(statistic) = self.response_statistic() else {
            warn!(quantile, "No response statistic in output");
            return f64::NAN;
        };
        statistic
            .percentiles
            .iter()
            .find(|p| (p.percentile - quantile).abs() < 1e-9)
            .and_then(|p| {
                p.raw_value
                    .map(|v| v as f64)
                    .or_else(|| p.duration.map(|d| d.as_nanos() as f64))
            })
            .unwrap_or(f64::NAN)
    }

    fn latency_field(&self, field: &str) -> f64 {
        let Some(statistic) = self.response_statistic() else {
            return f64::NAN;
        };
        let duration = match field {
            "mean" => statistic.mean,
            "min" => statistic.min,
            "max" => statistic.max,
            "pstdev" => statistic.pstdev,
            _ => None,
        };
        duration
            .map(|d| d.as_nanos() as f64)
            .or_else(|| match field {
                "mean" => statistic.raw_mean,
                "pstdev" => statistic.raw_pstdev,
                "min" => statistic.raw_min.map(|v| v as f64),
                "max" => statistic.raw_max.map(|v| v as f64),
                _ => None,
            })
            .unwrap_or(f64::NAN)
    }
}

impl MetricsPlugin for BuiltinMetricsPlugin {
    fn metric_names(&self) -> Vec<&'static str> {
        BUILTIN_METRIC_NAMES.to_vec()
    }

    fn metric_by_name(&self, name: &str) -> Result<f64, ConfigurationError> {
        let value = match name {
            "attempted-rps" => self.rate(self.counter("upstream_rq_total")),
            "send-rate" => self.rate(self.counter("benchmark.total_req_sent")),
            "achieved-rps" => self.rate(self.responses_received()),
            "success-rate" => {
                let sent = self.counter("benchmark.total_req_sent");
                if sent <= 0.0 {
                    0.0
                } else {
                    self.counter("benchmark.http_2xx") / sent
                }
            }
            "mean-latency-ns" => self.latency_field("mean"),
            "min-latency-ns" => self.latency_field("min"),
            "max-latency-ns" => self.latency_field("max"),
            "pstdev-latency-ns" => self.latency_field("pstdev"),
            "p50-latency-ns" => self.latency_percentile(0.5),
            "p90-latency-ns" => self.latency_percentile(0.9),
            "p99-latency-ns" => self.latency_percentile(0.99),
            _ => {
                return Err(ConfigurationError::invalid(
                    "metric_name",
                    format!(
                        "metric '{}' is not implemented by plugin '{}'",
                        name, BUILTIN_PLUGIN_NAME
                    ),
                ));
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::LoadOptions;
    use crate::output::WorkerResult;
    use crate::statistic::{HdrStatistic, Statistic};
    use std::time::Duration;

    fn synthetic_output() -> Output {
        let mut response = HdrStatistic::new();
        response.set_id(RESPONSE_STATISTIC_ID);
        for _ in 0..90 {
            response.add_value(1_000_000);
        }
        for _ in 0..10 {
            response.add_value(10_000_000);
        }
        let mut counters = std::collections::BTreeMap::new();
        counters.insert("benchmark.total_req_sent".to_string(), 100);
        counters.insert("upstream_rq_total".to_string(), 100);
        counters.insert("benchmark.http_2xx".to_string(), 95);
        counters.insert("benchmark.http_5xx".to_string(), 5);
        let worker = WorkerResult {
            worker_number: 0,
            statistics: vec![Box::new(response)],
            counters,
            execution_duration: Duration::from_secs(10),
            first_acquisition_time: None,
        };
        Output::new(LoadOptions::default(), &[worker])
    }

    #[test]
    fn advertises_all_names() {
        let plugin = BuiltinMetricsPlugin::empty();
        let names = plugin.metric_names();
        assert!(names.contains(&"success-rate"));
        assert!(names.contains(&"p99-latency-ns"));
        assert_eq!(names.len(), BUILTIN_METRIC_NAMES.len());
    }

    #[test]
    fn rates_and_success() {
        let plugin = BuiltinMetricsPlugin::new(synthetic_output());
        assert!((plugin.metric_by_name("attempted-rps").unwrap() - 10.0).abs() < 1e-9);
        assert!((plugin.metric_by_name("send-rate").unwrap() - 10.0).abs() < 1e-9);
        assert!((plugin.metric_by_name("achieved-rps").unwrap() - 10.0).abs() < 1e-9);
        assert!((plugin.metric_by_name("success-rate").unwrap() - 0.95).abs() < 1e-9);
    }

    #[test]
    fn latency_metrics_come_from_the_response_statistic() {
        let plugin = BuiltinMetricsPlugin::new(synthetic_output());
        let mean = plugin.metric_by_name("mean-latency-ns").unwrap();
        // 90 samples at 1ms and 10 at 10ms average to 1.9ms.
        assert!((mean - 1_900_000.0).abs() / 1_900_000.0 < 0.01, "mean = {}", mean);
        let p50 = plugin.metric_by_name("p50-latency-ns").unwrap();
        assert!((p50 - 1_000_000.0).abs() / 1_000_000.0 < 0.01);
        let p99 = plugin.metric_by_name("p99-latency-ns").unwrap();
        assert!((p99 - 10_000_000.0).abs() / 10_000_000.0 < 0.01);
    }

    #[test]
    fn unknown_metric_is_an_error() {
        let plugin = BuiltinMetricsPlugin::new(synthetic_output());
        assert!(plugin.metric_by_name("not-a-metric").is_err());
    }

    #[test]
    fn empty_plugin_yields_nan_latencies() {
        let plugin = BuiltinMetricsPlugin::empty();
        assert!(plugin.metric_by_name("mean-latency-ns").unwrap().is_nan());
        assert_eq!(plugin.metric_by_name("attempted-rps").unwrap(), 0.0);
    }

    #[test]
    fn registry_round_trip() {
        let mut registry = MetricsPluginRegistry::new();
        registry.register("test.plugin", |_config| {
            Ok(Box::new(BuiltinMetricsPlugin::empty()))
        });
        assert!(registry.contains("test.plugin"));
        let plugin = registry
            .create(&MetricsPluginConfig {
                name: "test.plugin".to_string(),
                config: serde_json::Value::Null,
            })
            .unwrap();
        assert!(!plugin.metric_names().is_empty());
        assert!(!registry.contains("other.plugin"));
    }
}
