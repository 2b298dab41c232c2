//! The load specification consumed by the engine, with defaults and
//! validation.
//!
//! Validation collects every problem before failing so a bad spec is
//! reported in one pass.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::benchmark_client::{HttpProtocol, COUNTER_NAMES};
use crate::errors::ConfigurationError;
use crate::sequencer::SequencerIdleStrategy;
use crate::utils::serde_duration;

/// Worker count: a fixed number or one worker per CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Auto,
    Fixed(u32),
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Fixed(1)
    }
}

impl Concurrency {
    /// Resolves to a concrete worker count.
    pub fn resolve(&self) -> u32 {
        match self {
            Concurrency::Auto => num_cpus::get() as u32,
            Concurrency::Fixed(n) => *n,
        }
    }
}

impl Serialize for Concurrency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Concurrency::Auto => serializer.serialize_str("auto"),
            Concurrency::Fixed(n) => serializer.serialize_u32(*n),
        }
    }
}

impl<'de> Deserialize<'de> for Concurrency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ConcurrencyVisitor;

        impl<'de> serde::de::Visitor<'de> for ConcurrencyVisitor {
            type Value = Concurrency;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a positive integer or the string \"auto\"")
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Concurrency, E> {
                if value.eq_ignore_ascii_case("auto") {
                    Ok(Concurrency::Auto)
                } else {
                    value
                        .parse::<u32>()
                        .map(Concurrency::Fixed)
                        .map_err(|_| E::custom(format!("invalid concurrency '{}'", value)))
                }
            }

            fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<Concurrency, E> {
                u32::try_from(value)
                    .map(Concurrency::Fixed)
                    .map_err(|_| E::custom(format!("concurrency {} out of range", value)))
            }
        }

        deserializer.deserialize_any(ConcurrencyVisitor)
    }
}

/// The full load specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Target URI, e.g. `http://host:port/path`.
    pub uri: String,

    /// Target global request rate, split across workers.
    pub requests_per_second: u64,

    /// Connections per worker.
    pub connections: u32,

    /// Total run duration.
    #[serde(with = "serde_duration")]
    pub duration: Duration,

    /// Per-request and connect timeout.
    #[serde(with = "serde_duration")]
    pub timeout: Duration,

    pub protocol: HttpProtocol,

    /// Number of workers; "auto" means one per CPU.
    pub concurrency: Concurrency,

    /// If greater than 1, release requests in bursts of this size.
    pub burst_size: u64,

    /// Warm connections before measuring.
    pub prefetch_connections: bool,

    /// Open-loop mode: request starts are governed by the rate limiter,
    /// never by response completions.
    pub open_loop: bool,

    pub max_pending_requests: u32,
    pub max_active_requests: u32,
    pub max_requests_per_connection: u32,
    pub max_concurrent_streams: u32,

    pub request_method: String,
    /// Extra request headers as `name:value` lines.
    pub request_headers: Vec<String>,
    pub request_body_size: u32,

    pub sequencer_idle_strategy: SequencerIdleStrategy,

    /// Uniform jitter applied to request release times.
    #[serde(with = "serde_duration")]
    pub jitter_uniform: Duration,

    /// Extra counter-threshold predicates terminating the run gracefully.
    pub termination_predicates: BTreeMap<String, u64>,

    /// Counter-threshold predicates failing the run.
    pub failure_predicates: BTreeMap<String, u64>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            uri: String::new(),
            requests_per_second: 5,
            connections: 1,
            duration: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            protocol: HttpProtocol::Http1,
            concurrency: Concurrency::default(),
            burst_size: 0,
            prefetch_connections: false,
            open_loop: true,
            max_pending_requests: 1,
            max_active_requests: 100,
            max_requests_per_connection: 0,
            max_concurrent_streams: 0,
            request_method: "GET".to_string(),
            request_headers: Vec::new(),
            request_body_size: 0,
            sequencer_idle_strategy: SequencerIdleStrategy::Spin,
            jitter_uniform: Duration::ZERO,
            termination_predicates: BTreeMap::new(),
            failure_predicates: BTreeMap::new(),
        }
    }
}

impl LoadOptions {
    /// Checks the whole specification, enumerating every problem found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut problems = Vec::new();

        if self.uri.is_empty() {
            problems.push("uri must be set".to_string());
        } else if !self.uri.starts_with("http://") && !self.uri.starts_with("https://") {
            problems.push(format!(
                "uri must start with http:// or https://, got '{}'",
                self.uri
            ));
        }
        if self.requests_per_second < 1 {
            problems.push("requests_per_second must be >= 1".to_string());
        }
        if self.connections < 1 {
            problems.push("connections must be >= 1".to_string());
        }
        if self.duration < Duration::from_secs(1) {
            problems.push("duration must be >= 1s".to_string());
        }
        if self.timeout < Duration::from_secs(1) {
            problems.push("timeout must be >= 1s".to_string());
        }
        if let Concurrency::Fixed(n) = self.concurrency {
            if n < 1 {
                problems.push("concurrency must be >= 1 or \"auto\"".to_string());
            }
        }
        if self.protocol == HttpProtocol::Http3 {
            problems.push("protocol http3 is not supported by this build".to_string());
        }
        if self.request_method.trim().is_empty() {
            problems.push("request_method must not be empty".to_string());
        }
        for line in &self.request_headers {
            if !line.contains(':') {
                problems.push(format!("request header '{}' is not in 'name:value' form", line));
            }
        }
        for name in self
            .termination_predicates
            .keys()
            .chain(self.failure_predicates.keys())
        {
            if !COUNTER_NAMES.contains(&name.as_str()) {
                problems.push(format!(
                    "predicate references unknown counter '{}'. Known counters: {}",
                    name,
                    COUNTER_NAMES.join(", ")
                ));
            }
        }

        ConfigurationError::from_problems(problems)
    }

    /// Number of workers this spec resolves to.
    pub fn worker_count(&self) -> u32 {
        self.concurrency.resolve().max(1)
    }

    /// The per-worker pacing frequency: the global rate split evenly.
    pub fn per_worker_frequency(&self) -> f64 {
        self.requests_per_second as f64 / f64::from(self.worker_count())
    }

    /// Bursting is disabled for sizes 0 and 1; both mean "no bursting".
    pub fn bursting_enabled(&self) -> bool {
        self.burst_size > 1
    }

    /// Client-side queue depth after reconciling the open-loop flag: closed
    /// loop pins it to 1, open loop guarantees the sequencer is never
    /// throttled by a pending-request cap smaller than the active cap.
    pub fn effective_max_pending(&self) -> u32 {
        if !self.open_loop {
            1
        } else if self.max_pending_requests <= 1 {
            self.max_active_requests.max(2)
        } else {
            self.max_pending_requests
        }
    }
}
