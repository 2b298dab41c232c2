//! Process orchestration: fan out workers, wait, merge, report.
//!
//! `execute` is a blocking call. It spawns one worker thread per
//! concurrency slot, joins them all, and merges their results into the
//! output record. Cancellation is a token fanned out to every worker's
//! termination chain; there is no preemption.

use std::net::ToSocketAddrs;
use std::time::SystemTime;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::errors::ConfigurationError;
use crate::options::LoadOptions;
use crate::output::Output;
use crate::termination::CancellationToken;
use crate::worker::ClientWorker;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to resolve uri '{uri}': {message}")]
    UriResolution { uri: String, message: String },

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(std::io::Error),

    #[error("worker thread panicked")]
    WorkerPanic,
}

/// One benchmark execution: a validated spec plus a cancellation token.
#[derive(Debug)]
pub struct Process {
    options: LoadOptions,
    cancellation: CancellationToken,
}

impl Process {
    /// Validates the spec; every problem is reported at once.
    pub fn new(options: LoadOptions) -> Result<Self, ProcessError> {
        options.validate()?;
        Ok(Process {
            options,
            cancellation: CancellationToken::new(),
        })
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Token shared with every worker. External signal handling forwards
    /// into this.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Requests cancellation of all workers at their next pulse.
    pub fn request_execution_cancellation(&self) {
        self.cancellation.cancel();
    }

    /// Runs the benchmark to completion and returns the merged output.
    pub fn execute(&self) -> Result<Output, ProcessError> {
        resolve_uri_host(&self.options.uri)?;

        let workers_total = self.options.worker_count();
        let start_monotonic = Instant::now();
        let start_wall = SystemTime::now();
        info!(
            uri = %self.options.uri,
            requests_per_second = self.options.requests_per_second,
            workers = workers_total,
            duration_secs = self.options.duration.as_secs_f64(),
            "Starting benchmark"
        );

        let mut workers = Vec::with_capacity(workers_total as usize);
        for worker_number in 0..workers_total {
            workers.push(
                ClientWorker::start(
                    self.options.clone(),
                    worker_number as usize,
                    start_monotonic,
                    start_wall,
                    self.cancellation.clone(),
                )
                .map_err(ProcessError::WorkerSpawn)?,
            );
        }

        // Strict handoff: workers write, workers join, then this thread
        // reads and merges.
        let mut results = Vec::with_capacity(workers.len());
        for worker in workers {
            let number = worker.worker_number();
            debug!(worker = number, "Waiting for worker");
            results.push(worker.join().map_err(|_| ProcessError::WorkerPanic)?);
        }

        let output = Output::new(self.options.clone(), &results);
        info!(run_failed = output.run_failed(), "Benchmark complete");
        Ok(output)
    }
}

/// Pre-flight host resolution; failures surface before any requests are
/// attempted.
fn resolve_uri_host(uri: &str) -> Result<(), ProcessError> {
    let url: reqwest::Url = uri.parse().map_err(|e| ProcessError::UriResolution {
        uri: uri.to_string(),
        message: format!("{}", e),
    })?;
    let host = url.host_str().ok_or_else(|| ProcessError::UriResolution {
        uri: uri.to_string(),
        message: "uri has no host".to_string(),
    })?;
    let port = url.port_or_known_default().unwrap_or(80);
    let mut addresses = (host, port)
        .to_socket_addrs()
        .map_err(|e| ProcessError::UriResolution {
            uri: uri.to_string(),
            message: format!("{}", e),
        })?;
    if addresses.next().is_none() {
        return Err(ProcessError::UriResolution {
            uri: uri.to_string(),
            message: "host resolved to no addresses".to_string(),
        });
    }
    Ok(())
}
