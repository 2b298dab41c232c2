//! The sequencer drives a benchmark target at the pace a rate limiter
//! allows, and records timings.
//!
//! The flow runs in pulses. Each pulse samples the monotonic clock once and
//! feeds that value to completion accounting, the termination predicate
//! chain, and the rate limiter, so all decisions within a pulse see the same
//! time. While the limiter grants, the target is invoked with a completion
//! handle; a target that cannot proceed gets its grant released back and the
//! time until it accepts again is accounted as blocked time.
//!
//! Between pulses the sequencer waits for either the next periodic tick
//! (1 ms resolution), a completion record arriving on its channel, or the
//! configured idle strategy's shorter nap. Completions are handed back over
//! a channel owned by this sequencer, so statistics stay single-writer on
//! the owning thread.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info};

use crate::rate_limiter::RateLimiter;
use crate::statistic::Statistic;
use crate::termination::{
    CancellationTerminationPredicate, CancellationToken, TerminationPredicateChain,
    TerminationStatus,
};

/// Minimum timer resolution of the pulse loop.
pub const TIMER_RESOLUTION: Duration = Duration::from_millis(1);

/// Nap length for the SLEEP idle strategy.
const SLEEP_QUANTUM: Duration = Duration::from_micros(50);

/// What the sequencer does when it looks idle: the rate limiter or target
/// just refused, and no completion is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequencerIdleStrategy {
    /// Yield the thread, then wait for the next tick or a completion.
    Spin,
    /// Wait for the next periodic tick.
    Poll,
    /// Nap briefly, then re-examine.
    Sleep,
}

/// Completion notice sent by a target when its operation finishes.
pub struct CompletionRecord {
    pub dispatched_at: Instant,
    pub completed_at: Instant,
    pub success: bool,
}

/// Handed to the target on each initiation; the target (or whatever finishes
/// the operation on its behalf) calls [`CompletionHandle::complete`] exactly
/// once, successfully or not. Dropping the handle without completing is
/// allowed only when the target refused the start.
pub struct CompletionHandle {
    dispatched_at: Instant,
    tx: mpsc::UnboundedSender<CompletionRecord>,
}

impl CompletionHandle {
    /// A handle not tied to any sequencer, along with the receiver its
    /// completion record will arrive on. Used for warmup probes.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<CompletionRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            CompletionHandle {
                dispatched_at: Instant::now(),
                tx,
            },
            rx,
        )
    }

    pub fn dispatched_at(&self) -> Instant {
        self.dispatched_at
    }

    /// Reports completion. Delivery failures are ignored; they only occur
    /// after the sequencer stopped, when in-flight work is being abandoned.
    pub fn complete(self, success: bool) {
        let record = CompletionRecord {
            dispatched_at: self.dispatched_at,
            completed_at: Instant::now(),
            success,
        };
        let _ = self.tx.send(record);
    }
}

/// The benchmark target. Returns true when it initiated one operation, false
/// when it cannot proceed right now (the sequencer will retry later and
/// account the wait as blocked time).
pub type SequencerTarget = Box<dyn FnMut(CompletionHandle) -> bool>;

/// Single-shot pacing loop. Construct, `run().await`, then read results.
pub struct Sequencer {
    target: SequencerTarget,
    rate_limiter: Box<dyn RateLimiter>,
    latency_statistic: Box<dyn Statistic>,
    blocked_statistic: Box<dyn Statistic>,
    idle_strategy: SequencerIdleStrategy,
    termination_predicate: TerminationPredicateChain,
    cancellation: CancellationToken,
    completion_tx: mpsc::UnboundedSender<CompletionRecord>,
    completion_rx: mpsc::UnboundedReceiver<CompletionRecord>,
    pending: Option<CompletionRecord>,
    targets_initiated: u64,
    targets_completed: u64,
    started: bool,
    running: bool,
    blocked: bool,
    blocked_start: Option<Instant>,
    start_time: Option<Instant>,
    last_event_time: Option<Instant>,
    last_termination_status: TerminationStatus,
    failed_terminations: u64,
}

impl Sequencer {
    pub fn new(
        rate_limiter: Box<dyn RateLimiter>,
        target: SequencerTarget,
        mut latency_statistic: Box<dyn Statistic>,
        mut blocked_statistic: Box<dyn Statistic>,
        idle_strategy: SequencerIdleStrategy,
        mut termination_predicate: TerminationPredicateChain,
    ) -> Self {
        latency_statistic.set_id("sequencer.callback");
        blocked_statistic.set_id("sequencer.blocking");
        let cancellation = CancellationToken::new();
        termination_predicate.append_to_chain(Box::new(CancellationTerminationPredicate::new(
            cancellation.clone(),
        )));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Sequencer {
            target,
            rate_limiter,
            latency_statistic,
            blocked_statistic,
            idle_strategy,
            termination_predicate,
            cancellation,
            completion_tx,
            completion_rx,
            pending: None,
            targets_initiated: 0,
            targets_completed: 0,
            started: false,
            running: false,
            blocked: false,
            blocked_start: None,
            start_time: None,
            last_event_time: None,
            last_termination_status: TerminationStatus::Proceed,
            failed_terminations: 0,
        }
    }

    /// Token that latches a failing termination into the predicate chain at
    /// the next pulse. In-flight operations are allowed to finish.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Requests cancellation; observed at the next pulse.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Drives the flow to completion. Single-shot; calling twice panics.
    pub async fn run(&mut self) {
        assert!(!self.started, "sequencer is a single-shot flow");
        self.started = true;
        self.running = true;
        let start = Instant::now();
        self.start_time = Some(start);
        self.last_event_time = Some(start);
        debug!("Sequencer starting");

        loop {
            // One cached time sample serves the entire pulse.
            let now = Instant::now();
            self.drain_completions(now);

            self.last_termination_status =
                if self.last_termination_status == TerminationStatus::Proceed {
                    self.termination_predicate.evaluate_chain(now)
                } else {
                    self.last_termination_status
                };
            if self.last_termination_status != TerminationStatus::Proceed {
                self.stop(self.last_termination_status == TerminationStatus::Fail, now);
                return;
            }

            while self.rate_limiter.try_acquire_one(now) {
                let handle = CompletionHandle {
                    dispatched_at: now,
                    tx: self.completion_tx.clone(),
                };
                if (self.target)(handle) {
                    self.unblock_and_update_statistic_if_needed(now);
                    self.targets_initiated += 1;
                    self.last_event_time = Some(now);
                } else {
                    // The target could not proceed; hand the grant back and
                    // retry at a later pulse.
                    self.update_start_blocking_time_if_needed(now);
                    self.rate_limiter.release_one();
                    break;
                }
            }

            self.idle(now + TIMER_RESOLUTION).await;
        }
    }

    fn drain_completions(&mut self, now: Instant) {
        if let Some(record) = self.pending.take() {
            self.record_completion(record, now);
        }
        while let Ok(record) = self.completion_rx.try_recv() {
            self.record_completion(record, now);
        }
    }

    fn record_completion(&mut self, record: CompletionRecord, now: Instant) {
        let latency = record.completed_at.duration_since(record.dispatched_at);
        self.latency_statistic.add_value(latency.as_nanos() as u64);
        self.targets_completed += 1;
        self.last_event_time = Some(now.max(record.completed_at));
    }

    async fn idle(&mut self, tick: Instant) {
        let record = match self.idle_strategy {
            SequencerIdleStrategy::Spin => {
                tokio::task::yield_now().await;
                tokio::select! {
                    biased;
                    record = self.completion_rx.recv() => record,
                    _ = sleep_until(tick) => None,
                }
            }
            SequencerIdleStrategy::Poll => {
                tokio::select! {
                    biased;
                    record = self.completion_rx.recv() => record,
                    _ = sleep_until(tick) => None,
                }
            }
            SequencerIdleStrategy::Sleep => {
                tokio::select! {
                    biased;
                    record = self.completion_rx.recv() => record,
                    _ = sleep(SLEEP_QUANTUM) => None,
                }
            }
        };
        // A completion wakes the loop early; stash it for the next pulse so
        // it is accounted against that pulse's cached time.
        if let Some(record) = record {
            self.pending = Some(record);
        }
    }

    fn stop(&mut self, failed: bool, now: Instant) {
        assert!(self.running, "sequencer stop may only execute once");
        if failed {
            error!("Exiting due to failing termination predicate");
            self.failed_terminations += 1;
        }
        self.running = false;
        self.unblock_and_update_statistic_if_needed(now);
        self.last_event_time = Some(now);
        let ran_for = self.execution_duration();
        info!(
            ran_for_ms = ran_for.as_millis() as u64,
            initiated = self.targets_initiated,
            completed = self.targets_completed,
            completions_per_second = self.completions_per_second(),
            "Stopping sequencer"
        );
    }

    fn unblock_and_update_statistic_if_needed(&mut self, now: Instant) {
        if self.blocked {
            self.blocked = false;
            if let Some(blocked_start) = self.blocked_start.take() {
                self.blocked_statistic
                    .add_value(now.duration_since(blocked_start).as_nanos() as u64);
            }
        }
    }

    fn update_start_blocking_time_if_needed(&mut self, now: Instant) {
        if !self.blocked {
            self.blocked = true;
            self.blocked_start = Some(now);
        }
    }

    /// Time between start and the last observed event.
    pub fn execution_duration(&self) -> Duration {
        match (self.start_time, self.last_event_time) {
            (Some(start), Some(last)) => last.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    pub fn completions_per_second(&self) -> f64 {
        let micros = self.execution_duration().as_micros();
        if micros == 0 {
            0.0
        } else {
            self.targets_completed as f64 / micros as f64 * 1_000_000.0
        }
    }

    pub fn targets_initiated(&self) -> u64 {
        self.targets_initiated
    }

    pub fn targets_completed(&self) -> u64 {
        self.targets_completed
    }

    pub fn failed_terminations(&self) -> u64 {
        self.failed_terminations
    }

    /// Both sequencer statistics, keyed by their ids.
    pub fn statistics(&self) -> Vec<&dyn Statistic> {
        vec![self.latency_statistic.as_ref(), self.blocked_statistic.as_ref()]
    }

    pub fn latency_statistic(&self) -> &dyn Statistic {
        self.latency_statistic.as_ref()
    }

    pub fn blocked_statistic(&self) -> &dyn Statistic {
        self.blocked_statistic.as_ref()
    }

    /// When the rate limiter handed out its first grant, if it did.
    pub fn first_acquisition_time(&self) -> Option<Instant> {
        self.rate_limiter.time_started()
    }
}
