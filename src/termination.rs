//! Termination predicates deciding when a run ends, and why.
//!
//! Predicates are evaluated as a chain at every sequencer pulse. The chain
//! walks its members child-first and short-circuits on the first
//! non-proceed result. Once any member returned a non-proceed status the
//! chain latches it and keeps returning that status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Outcome of a predicate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStatus {
    /// Keep running.
    Proceed,
    /// Stop gracefully.
    Terminate,
    /// Stop and flag the run as failed.
    Fail,
}

/// A single termination condition.
pub trait TerminationPredicate: Send {
    fn evaluate(&mut self, now: Instant) -> TerminationStatus;
}

/// Chain of predicates, evaluated child-first with a latched result.
///
/// The most recently appended predicate is evaluated first, mirroring a
/// linked chain walked from its deepest child upward.
#[derive(Default)]
pub struct TerminationPredicateChain {
    predicates: Vec<Box<dyn TerminationPredicate>>,
    latched: Option<TerminationStatus>,
}

impl TerminationPredicateChain {
    pub fn new() -> Self {
        TerminationPredicateChain::default()
    }

    /// Links one child onto the chain.
    pub fn link(&mut self, predicate: Box<dyn TerminationPredicate>) {
        self.predicates.push(predicate);
    }

    /// Appends a predicate to the end of the transitive chain.
    pub fn append_to_chain(&mut self, predicate: Box<dyn TerminationPredicate>) {
        self.predicates.push(predicate);
    }

    /// Evaluates the chain, returning the first non-proceed status. The
    /// result is latched: every later call returns the same status.
    pub fn evaluate_chain(&mut self, now: Instant) -> TerminationStatus {
        if let Some(status) = self.latched {
            return status;
        }
        for predicate in self.predicates.iter_mut().rev() {
            let status = predicate.evaluate(now);
            if status != TerminationStatus::Proceed {
                self.latched = Some(status);
                return status;
            }
        }
        TerminationStatus::Proceed
    }
}

/// Terminates after a fixed elapsed monotonic duration.
pub struct DurationTerminationPredicate {
    start: Instant,
    duration: Duration,
}

impl DurationTerminationPredicate {
    pub fn new(start: Instant, duration: Duration) -> Self {
        DurationTerminationPredicate { start, duration }
    }
}

impl TerminationPredicate for DurationTerminationPredicate {
    fn evaluate(&mut self, now: Instant) -> TerminationStatus {
        if now.duration_since(self.start) > self.duration {
            TerminationStatus::Terminate
        } else {
            TerminationStatus::Proceed
        }
    }
}

/// Reads a counter value on demand, decoupling the predicate from counter
/// storage.
pub type CounterReader = Box<dyn Fn() -> u64 + Send>;

/// Returns a configured terminal status once a named counter exceeds its
/// limit.
pub struct CounterThresholdTerminationPredicate {
    reader: CounterReader,
    limit: u64,
    status: TerminationStatus,
}

impl CounterThresholdTerminationPredicate {
    pub fn new(reader: CounterReader, limit: u64, status: TerminationStatus) -> Self {
        CounterThresholdTerminationPredicate {
            reader,
            limit,
            status,
        }
    }
}

impl TerminationPredicate for CounterThresholdTerminationPredicate {
    fn evaluate(&mut self, _now: Instant) -> TerminationStatus {
        if (self.reader)() > self.limit {
            self.status
        } else {
            TerminationStatus::Proceed
        }
    }
}

/// Shared cancellation flag. Cloning yields handles onto the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Fails the run when an external cancellation was requested. The sequencer
/// observes this at its next pulse; there is no preemption.
pub struct CancellationTerminationPredicate {
    token: CancellationToken,
}

impl CancellationTerminationPredicate {
    pub fn new(token: CancellationToken) -> Self {
        CancellationTerminationPredicate { token }
    }
}

impl TerminationPredicate for CancellationTerminationPredicate {
    fn evaluate(&mut self, _now: Instant) -> TerminationStatus {
        if self.token.is_cancelled() {
            TerminationStatus::Fail
        } else {
            TerminationStatus::Proceed
        }
    }
}
