//! Output assembly: merging per-worker results into a global view.
//!
//! Statistics merging is commutative and associative, so the merge order
//! across workers does not matter. The "global" result is always present;
//! per-worker results are emitted only when more than one worker ran.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::options::LoadOptions;
use crate::statistic::{SerializationDomain, Statistic, StatisticRecord};
use crate::utils::{epoch_seconds, serde_duration};

/// Everything one worker hands back after completion.
pub struct WorkerResult {
    pub worker_number: usize,
    pub statistics: Vec<Box<dyn Statistic>>,
    pub counters: BTreeMap<String, u64>,
    pub execution_duration: Duration,
    pub first_acquisition_time: Option<SystemTime>,
}

/// A named counter value in the output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterRecord {
    pub name: String,
    pub value: u64,
}

/// One named result: "global", or "worker_N".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub name: String,
    pub statistics: Vec<StatisticRecord>,
    pub counters: Vec<CounterRecord>,
    #[serde(with = "serde_duration")]
    pub execution_duration: Duration,
    /// Seconds since the Unix epoch, when the rate limiter handed out its
    /// first grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_acquisition_time: Option<f64>,
}

impl ResultRecord {
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }

    pub fn statistic(&self, id: &str) -> Option<&StatisticRecord> {
        self.statistics.iter().find(|s| s.id == id)
    }
}

/// The benchmark output record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    /// Wall-clock seconds since the Unix epoch at assembly time.
    pub timestamp: f64,
    /// Echo of the effective options.
    pub options: LoadOptions,
    pub version: String,
    pub results: Vec<ResultRecord>,
}

fn statistics_to_records(
    statistics: &BTreeMap<String, Box<dyn Statistic>>,
) -> Vec<StatisticRecord> {
    statistics
        .values()
        .map(|s| s.to_record(SerializationDomain::Duration))
        .collect()
}

fn counters_to_records(counters: &BTreeMap<String, u64>) -> Vec<CounterRecord> {
    counters
        .iter()
        .map(|(name, value)| CounterRecord {
            name: name.clone(),
            value: *value,
        })
        .collect()
}

/// Builds the record for a single worker.
pub fn worker_record(result: &WorkerResult) -> ResultRecord {
    let statistics: BTreeMap<String, Box<dyn Statistic>> = result
        .statistics
        .iter()
        .map(|s| (s.id().to_string(), s.box_clone()))
        .collect();
    ResultRecord {
        name: format!("worker_{}", result.worker_number),
        statistics: statistics_to_records(&statistics),
        counters: counters_to_records(&result.counters),
        execution_duration: result.execution_duration,
        first_acquisition_time: result.first_acquisition_time.map(epoch_seconds),
    }
}

/// Merges all workers into the global record. Statistics with the same id
/// are combined; counters are summed; the execution duration is the longest
/// observed; the first acquisition is the earliest.
pub fn merge_worker_results(results: &[WorkerResult]) -> ResultRecord {
    let mut statistics: BTreeMap<String, Box<dyn Statistic>> = BTreeMap::new();
    let mut counters: BTreeMap<String, u64> = BTreeMap::new();
    let mut execution_duration = Duration::ZERO;
    let mut first_acquisition_time: Option<SystemTime> = None;

    for result in results {
        for statistic in &result.statistics {
            let id = statistic.id().to_string();
            match statistics.remove(&id) {
                Some(existing) => {
                    statistics.insert(id, existing.combine(statistic.as_ref()));
                }
                None => {
                    statistics.insert(id, statistic.box_clone());
                }
            }
        }
        for (name, value) in &result.counters {
            *counters.entry(name.clone()).or_insert(0) += value;
        }
        execution_duration = execution_duration.max(result.execution_duration);
        first_acquisition_time = match (first_acquisition_time, result.first_acquisition_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    ResultRecord {
        name: "global".to_string(),
        statistics: statistics_to_records(&statistics),
        counters: counters_to_records(&counters),
        execution_duration,
        first_acquisition_time: first_acquisition_time.map(epoch_seconds),
    }
}

impl Output {
    /// Assembles the output: the merged global record first, then one
    /// record per worker when more than one ran.
    pub fn new(options: LoadOptions, worker_results: &[WorkerResult]) -> Self {
        let mut results = vec![merge_worker_results(worker_results)];
        if worker_results.len() > 1 {
            results.extend(worker_results.iter().map(worker_record));
        }
        Output {
            timestamp: epoch_seconds(SystemTime::now()),
            options,
            version: env!("CARGO_PKG_VERSION").to_string(),
            results,
        }
    }

    pub fn global(&self) -> &ResultRecord {
        &self.results[0]
    }

    /// A run failed iff the failed-terminations counter is present and
    /// nonzero in the global result.
    pub fn run_failed(&self) -> bool {
        self.global()
            .counter("sequencer.failed_terminations")
            .map(|v| v > 0)
            .unwrap_or(false)
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }

    pub fn to_yaml_string(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_else(|e| format!("error: {}", e))
    }
}
