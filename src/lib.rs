//! Nighthawk: an HTTP load generator measuring latency characteristics of
//! an upstream under precisely controlled request rates.
//!
//! The core is a per-worker [`sequencer::Sequencer`] driving an open-loop
//! [`benchmark_client::BenchmarkHttpClient`] at the pace a composable
//! [`rate_limiter::RateLimiter`] stack allows, recording latencies into
//! low-overhead [`statistic::Statistic`] implementations. On top sits the
//! [`adaptive_load`] controller, an outer loop that repeatedly runs the
//! engine at varying loads and converges on a sustainable level.

pub mod adaptive_load;
pub mod benchmark_client;
pub mod errors;
pub mod metrics;
pub mod metrics_plugin;
pub mod options;
pub mod output;
pub mod process;
pub mod rate_limiter;
pub mod scoring;
pub mod sequencer;
pub mod statistic;
pub mod step_controller;
pub mod termination;
pub mod utils;
pub mod worker;

pub use errors::ConfigurationError;
pub use options::LoadOptions;
pub use output::Output;
pub use process::{Process, ProcessError};
