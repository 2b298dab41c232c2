//! Client worker: one OS thread running one cooperative event loop, owning
//! one benchmark client and one sequencer.
//!
//! A worker thread builds a current-thread tokio runtime plus a `LocalSet`,
//! so every request future and every statistic write stays on that thread.
//! Nothing is shared across workers during a run except the cancellation
//! token and the atomic counter set; results are handed back on join.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use tokio::task::LocalSet;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::benchmark_client::{
    BenchmarkClientConfig, BenchmarkHttpClient, ClientCounters, ConstantRequestGenerator,
};
use crate::options::LoadOptions;
use crate::output::WorkerResult;
use crate::rate_limiter::{
    BurstingRateLimiter, DistributionSamplingRateLimiter, Frequency, LinearRateLimiter,
    RateLimiter, ScheduledStartingRateLimiter, UniformDistributionSampler,
};
use crate::sequencer::{CompletionHandle, Sequencer, SequencerTarget};
use crate::statistic::{HdrStatistic, StreamingStatistic};
use crate::termination::{
    CancellationTerminationPredicate, CancellationToken, CounterThresholdTerminationPredicate,
    TerminationPredicate, TerminationPredicateChain, TerminationStatus,
};
use crate::termination::DurationTerminationPredicate;

/// Extra drain time granted to in-flight requests after the sequencer
/// stopped.
const TERMINATION_GRACE: Duration = Duration::from_secs(1);

/// A named execution phase owning its sequencer.
pub struct Phase {
    id: String,
    sequencer: Sequencer,
}

impl Phase {
    pub fn new(id: &str, sequencer: Sequencer) -> Self {
        Phase {
            id: id.to_string(),
            sequencer,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub async fn run(&mut self) {
        self.sequencer.run().await;
    }

    pub fn into_sequencer(self) -> Sequencer {
        self.sequencer
    }
}

/// Handle to a running worker thread.
pub struct ClientWorker {
    worker_number: usize,
    handle: thread::JoinHandle<WorkerResult>,
}

impl ClientWorker {
    /// Spawns the worker thread. The thread runs its own event loop to
    /// completion and returns its result on join.
    pub fn start(
        options: LoadOptions,
        worker_number: usize,
        start_monotonic: Instant,
        start_wall: SystemTime,
        cancellation: CancellationToken,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("worker_{}", worker_number))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build worker runtime");
                let local = LocalSet::new();
                runtime.block_on(local.run_until(work(
                    options,
                    worker_number,
                    start_monotonic,
                    start_wall,
                    cancellation,
                )))
            })?;
        Ok(ClientWorker {
            worker_number,
            handle,
        })
    }

    pub fn worker_number(&self) -> usize {
        self.worker_number
    }

    /// Blocks until the worker thread exits.
    pub fn join(self) -> thread::Result<WorkerResult> {
        self.handle.join()
    }
}

/// Worker start offset: worker `i` begins pacing `i * (1/R) / W` seconds
/// after the benchmark start. The inter-worker delay is one global period
/// divided by the worker count, so the `W` workers spread evenly across a
/// single period and aggregate pacing is smooth from the first request.
fn stagger_offset(requests_per_second: u64, workers_total: u32, worker_number: usize) -> Duration {
    if requests_per_second == 0 || workers_total == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(
        worker_number as f64 / (requests_per_second as f64 * f64::from(workers_total)),
    )
}

fn counter_predicate(
    counters: &Arc<ClientCounters>,
    name: &str,
    limit: u64,
    status: TerminationStatus,
) -> Box<dyn TerminationPredicate> {
    let counters = Arc::clone(counters);
    let name = name.to_string();
    Box::new(CounterThresholdTerminationPredicate::new(
        Box::new(move || counters.value(&name).unwrap_or(0)),
        limit,
        status,
    ))
}

/// One probe request, sent before measurement is enabled. The probe goes
/// around the rate limiter, so it does not consume a grant; it shows up in
/// the counters but never in the latency statistics.
async fn simple_warmup(client: &mut BenchmarkHttpClient) {
    debug!("Warming up with one probe request");
    let (handle, mut completion_rx) = CompletionHandle::detached();
    if client.try_start_request(handle) {
        let _ = completion_rx.recv().await;
    }
}

fn build_rate_limiter(
    options: &LoadOptions,
    worker_number: usize,
    start_monotonic: Instant,
) -> Box<dyn RateLimiter> {
    let frequency =
        Frequency::new(options.per_worker_frequency()).expect("frequency was validated");
    let mut limiter: Box<dyn RateLimiter> = Box::new(LinearRateLimiter::new(frequency));
    if options.bursting_enabled() {
        limiter = Box::new(
            BurstingRateLimiter::new(limiter, options.burst_size)
                .expect("burst size was validated"),
        );
    }
    if !options.jitter_uniform.is_zero() {
        limiter = Box::new(DistributionSamplingRateLimiter::new(
            limiter,
            Box::new(UniformDistributionSampler::new(options.jitter_uniform)),
        ));
    }
    let now = Instant::now();
    let start_at = start_monotonic
        + stagger_offset(
            options.requests_per_second,
            options.worker_count(),
            worker_number,
        );
    if start_at > now {
        let scheduled = ScheduledStartingRateLimiter::new(limiter, start_at, now)
            .expect("start_at was checked to be in the future");
        limiter = Box::new(scheduled);
    }
    limiter
}

async fn work(
    options: LoadOptions,
    worker_number: usize,
    start_monotonic: Instant,
    start_wall: SystemTime,
    cancellation: CancellationToken,
) -> WorkerResult {
    debug!(worker = worker_number, uri = %options.uri, "Worker starting");

    let counters = ClientCounters::new();
    let generator = ConstantRequestGenerator::new(
        &options.request_method,
        &options.request_headers,
        options.request_body_size as usize,
    )
    .expect("request shape was validated");
    let config = BenchmarkClientConfig {
        connection_limit: options.connections,
        max_pending_requests: options.effective_max_pending(),
        max_active_requests: options.max_active_requests,
        max_requests_per_connection: options.max_requests_per_connection,
        timeout: options.timeout,
        protocol: options.protocol,
    };
    let mut client = BenchmarkHttpClient::new(
        config,
        &options.uri,
        Box::new(generator),
        Box::new(HdrStatistic::new()),
        Box::new(HdrStatistic::new()),
        Arc::clone(&counters),
    )
    .expect("client options were validated");

    if options.prefetch_connections {
        client.prefetch_connections().await;
    }
    simple_warmup(&mut client).await;
    client.set_measure_latencies(true);

    let limiter = build_rate_limiter(&options, worker_number, start_monotonic);

    let sequencer_start = Instant::now();
    let mut chain = TerminationPredicateChain::new();
    chain.link(Box::new(DurationTerminationPredicate::new(
        sequencer_start,
        options.duration,
    )));
    for (name, limit) in &options.termination_predicates {
        chain.append_to_chain(counter_predicate(
            &counters,
            name,
            *limit,
            TerminationStatus::Terminate,
        ));
    }
    for (name, limit) in &options.failure_predicates {
        chain.append_to_chain(counter_predicate(
            &counters,
            name,
            *limit,
            TerminationStatus::Fail,
        ));
    }
    chain.append_to_chain(Box::new(CancellationTerminationPredicate::new(cancellation)));

    let client = Rc::new(RefCell::new(client));
    let target_client = Rc::clone(&client);
    let target: SequencerTarget =
        Box::new(move |handle: CompletionHandle| target_client.borrow_mut().try_start_request(handle));

    let sequencer = Sequencer::new(
        limiter,
        target,
        Box::new(StreamingStatistic::new()),
        Box::new(StreamingStatistic::new()),
        options.sequencer_idle_strategy,
        chain,
    );
    let mut phase = Phase::new("main", sequencer);
    phase.run().await;

    {
        let client = client.borrow();
        client.terminate(options.timeout + TERMINATION_GRACE).await;
    }

    let sequencer = phase.into_sequencer();
    let client = client.borrow();
    let mut counter_snapshot = client.counters().snapshot();
    counter_snapshot.insert(
        "sequencer.failed_terminations".to_string(),
        sequencer.failed_terminations(),
    );
    let mut statistics = client.statistics();
    statistics.push(sequencer.latency_statistic().box_clone());
    statistics.push(sequencer.blocked_statistic().box_clone());

    let first_acquisition_time = sequencer
        .first_acquisition_time()
        .map(|instant| start_wall + instant.duration_since(start_monotonic));

    info!(
        worker = worker_number,
        initiated = sequencer.targets_initiated(),
        completed = sequencer.targets_completed(),
        completions_per_second = sequencer.completions_per_second(),
        "Worker finished"
    );

    WorkerResult {
        worker_number,
        statistics,
        counters: counter_snapshot,
        execution_duration: sequencer.execution_duration(),
        first_acquisition_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stagger_spreads_workers_across_one_global_period() {
        // At 10 rps split over 4 workers, starts are 25ms apart and the
        // four offsets together cover one 100ms global period.
        assert_eq!(stagger_offset(10, 4, 0), Duration::ZERO);
        assert_eq!(stagger_offset(10, 4, 1), Duration::from_millis(25));
        assert_eq!(stagger_offset(10, 4, 3), Duration::from_millis(75));
        // A single worker needs no offset at all.
        assert_eq!(stagger_offset(10, 1, 0), Duration::ZERO);
        assert_eq!(stagger_offset(0, 4, 5), Duration::ZERO);
    }

    #[test]
    fn counter_predicates_read_live_values() {
        let counters = ClientCounters::new();
        let mut predicate = counter_predicate(
            &counters,
            "benchmark.http_5xx",
            1,
            TerminationStatus::Fail,
        );
        let now = Instant::now();
        assert_eq!(predicate.evaluate(now), TerminationStatus::Proceed);
        counters
            .http_5xx
            .fetch_add(2, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(predicate.evaluate(now), TerminationStatus::Fail);
    }

    #[test]
    fn phase_exposes_its_id() {
        let limiter = LinearRateLimiter::new(Frequency::new(1.0).unwrap());
        let sequencer = Sequencer::new(
            Box::new(limiter),
            Box::new(|_handle: CompletionHandle| false),
            Box::new(StreamingStatistic::new()),
            Box::new(StreamingStatistic::new()),
            crate::sequencer::SequencerIdleStrategy::Poll,
            TerminationPredicateChain::new(),
        );
        let phase = Phase::new("main", sequencer);
        assert_eq!(phase.id(), "main");
        assert_eq!(phase.sequencer().targets_initiated(), 0);
    }
}
