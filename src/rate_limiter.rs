//! Rate limiters gating when the next operation may start.
//!
//! All limiters follow an acquire/release protocol: `try_acquire_one` never
//! blocks and returns true iff the caller may start one operation now;
//! `release_one` hands a previously acquired grant back. Wrappers compose
//! through delegation, so a pacing policy is built by stacking limiters
//! around a [`LinearRateLimiter`].
//!
//! The caller supplies the monotonic `now` to every call. The sequencer
//! samples the clock once per pulse and feeds the same value to the limiter
//! and the termination predicates, so time-of-check never diverges from
//! time-of-use within a pulse.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tracing::warn;

use crate::errors::ConfigurationError;

/// An average pacing frequency with its derived per-grant period.
#[derive(Debug, Clone, Copy)]
pub struct Frequency {
    hertz: f64,
    period: Duration,
}

impl Frequency {
    /// Builds a frequency. Zero, negative and non-finite values are invalid.
    pub fn new(hertz: f64) -> Result<Self, ConfigurationError> {
        if !hertz.is_finite() || hertz <= 0.0 {
            return Err(ConfigurationError::invalid(
                "frequency",
                format!("must be a positive frequency in Hz, got {}", hertz),
            ));
        }
        let period_nanos = (1e9 / hertz).round() as u64;
        if period_nanos == 0 {
            return Err(ConfigurationError::invalid(
                "frequency",
                format!("{} Hz exceeds the 1 ns pacing resolution", hertz),
            ));
        }
        Ok(Frequency {
            hertz,
            period: Duration::from_nanos(period_nanos),
        })
    }

    pub fn value(&self) -> f64 {
        self.hertz
    }

    /// The interval between consecutive grants.
    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Acquire/release protocol gating operation starts.
pub trait RateLimiter: Send {
    /// Returns true iff the caller may start one operation now. A grant is
    /// accounted as consumed. Never blocks.
    fn try_acquire_one(&mut self, now: Instant) -> bool;

    /// Returns one previously acquired grant. Calling this without a
    /// matching acquisition is a programmer error.
    fn release_one(&mut self);

    /// The time of the first acquisition attempt, once one happened.
    fn time_started(&self) -> Option<Instant>;

    /// Time elapsed since the first acquisition attempt.
    fn elapsed(&self, now: Instant) -> Duration {
        match self.time_started() {
            Some(started) => now.duration_since(started),
            None => Duration::ZERO,
        }
    }
}

/// Allows acquiring at a linear pace. The average rate is computed over a
/// timeframe that starts at the first `try_acquire_one` call: at time `t`,
/// the cumulative acquirable count is `floor((t - t0) / period)` minus what
/// was already acquired.
pub struct LinearRateLimiter {
    frequency: Frequency,
    acquireable_count: i64,
    acquired_count: u64,
    started_at: Option<Instant>,
}

impl LinearRateLimiter {
    pub fn new(frequency: Frequency) -> Self {
        LinearRateLimiter {
            frequency,
            acquireable_count: 0,
            acquired_count: 0,
            started_at: None,
        }
    }

    pub fn acquired_count(&self) -> u64 {
        self.acquired_count
    }
}

impl RateLimiter for LinearRateLimiter {
    fn try_acquire_one(&mut self, now: Instant) -> bool {
        let started_at = *self.started_at.get_or_insert(now);
        if self.acquireable_count > 0 {
            self.acquireable_count -= 1;
            self.acquired_count += 1;
            return true;
        }
        let elapsed = now.duration_since(started_at);
        let allowed = (elapsed.as_nanos() / self.frequency.period().as_nanos()) as i64;
        self.acquireable_count = allowed - self.acquired_count as i64;
        if self.acquireable_count > 0 {
            self.acquireable_count -= 1;
            self.acquired_count += 1;
            true
        } else {
            false
        }
    }

    fn release_one(&mut self) {
        self.acquireable_count += 1;
        self.acquired_count = self.acquired_count.saturating_sub(1);
    }

    fn time_started(&self) -> Option<Instant> {
        self.started_at
    }
}

/// Ramps linearly from zero to a final frequency over a ramp duration. The
/// integrated schedule yields a cumulative count of `0.5 * (f / R) * t^2`
/// for `t` within the ramp, then continues at the final frequency.
pub struct LinearRampingRateLimiter {
    frequency: Frequency,
    ramp: Duration,
    acquired_count: u64,
    started_at: Option<Instant>,
}

impl LinearRampingRateLimiter {
    pub fn new(frequency: Frequency, ramp: Duration) -> Result<Self, ConfigurationError> {
        if ramp.is_zero() {
            return Err(ConfigurationError::invalid(
                "ramp_duration",
                "must be greater than zero",
            ));
        }
        Ok(LinearRampingRateLimiter {
            frequency,
            ramp,
            acquired_count: 0,
            started_at: None,
        })
    }

    fn total_allowed(&self, elapsed: Duration) -> u64 {
        let t = elapsed.as_secs_f64();
        let ramp = self.ramp.as_secs_f64();
        let hz = self.frequency.value();
        let allowed = if t <= ramp {
            0.5 * hz / ramp * t * t
        } else {
            0.5 * hz * ramp + hz * (t - ramp)
        };
        allowed.floor() as u64
    }
}

impl RateLimiter for LinearRampingRateLimiter {
    fn try_acquire_one(&mut self, now: Instant) -> bool {
        let started_at = *self.started_at.get_or_insert(now);
        let allowed = self.total_allowed(now.duration_since(started_at));
        if allowed > self.acquired_count {
            self.acquired_count += 1;
            true
        } else {
            false
        }
    }

    fn release_one(&mut self) {
        self.acquired_count = self.acquired_count.saturating_sub(1);
    }

    fn time_started(&self) -> Option<Instant> {
        self.started_at
    }
}

/// Accumulates grants from a wrapped limiter and releases them in bursts.
///
/// Two modes alternate: while accumulating, calls are forwarded to the
/// wrapped limiter until `burst_size` grants accrued; then the burst is
/// released, returning true and counting down without consulting the wrapped
/// limiter, after which accumulation starts over.
pub struct BurstingRateLimiter {
    inner: Box<dyn RateLimiter>,
    burst_size: u64,
    accumulated: u64,
    releasing: bool,
}

impl BurstingRateLimiter {
    /// `burst_size` of 1 degenerates to pass-through behavior; callers
    /// normally disable the wrapper instead of constructing it that way.
    pub fn new(inner: Box<dyn RateLimiter>, burst_size: u64) -> Result<Self, ConfigurationError> {
        if burst_size == 0 {
            return Err(ConfigurationError::invalid(
                "burst_size",
                "must be greater than zero when bursting is enabled",
            ));
        }
        Ok(BurstingRateLimiter {
            inner,
            burst_size,
            accumulated: 0,
            releasing: false,
        })
    }
}

impl RateLimiter for BurstingRateLimiter {
    fn try_acquire_one(&mut self, now: Instant) -> bool {
        if self.releasing {
            self.accumulated -= 1;
            if self.accumulated == 0 {
                self.releasing = false;
            }
            return true;
        }
        while self.accumulated < self.burst_size && self.inner.try_acquire_one(now) {
            self.accumulated += 1;
        }
        if self.accumulated == self.burst_size {
            self.releasing = true;
            self.accumulated -= 1;
            if self.accumulated == 0 {
                self.releasing = false;
            }
            return true;
        }
        false
    }

    fn release_one(&mut self) {
        // The grant returns to the stash; during a release phase this
        // re-extends the burst.
        self.accumulated += 1;
    }

    fn time_started(&self) -> Option<Instant> {
        self.inner.time_started()
    }
}

/// Holds a wrapped limiter closed until a scheduled start time, then
/// delegates.
pub struct ScheduledStartingRateLimiter {
    inner: Box<dyn RateLimiter>,
    start_at: Instant,
    saw_first_call: bool,
}

impl ScheduledStartingRateLimiter {
    pub fn new(
        inner: Box<dyn RateLimiter>,
        start_at: Instant,
        now: Instant,
    ) -> Result<Self, ConfigurationError> {
        if start_at < now {
            return Err(ConfigurationError::invalid(
                "scheduled_start",
                "scheduled start time lies in the past",
            ));
        }
        Ok(ScheduledStartingRateLimiter {
            inner,
            start_at,
            saw_first_call: false,
        })
    }
}

impl RateLimiter for ScheduledStartingRateLimiter {
    fn try_acquire_one(&mut self, now: Instant) -> bool {
        if !self.saw_first_call {
            self.saw_first_call = true;
            if now > self.start_at {
                warn!(
                    late_by_micros = now.duration_since(self.start_at).as_micros() as u64,
                    "First acquisition attempt arrived after the scheduled start time"
                );
            }
        }
        if now < self.start_at {
            return false;
        }
        self.inner.try_acquire_one(now)
    }

    fn release_one(&mut self) {
        self.inner.release_one();
    }

    fn time_started(&self) -> Option<Instant> {
        self.inner.time_started()
    }
}

/// Source of nonnegative delays, in nanoseconds.
pub trait DiscreteDistributionSampler: Send {
    fn sample(&mut self) -> u64;
}

/// Uniform delays in `[0, upper_bound]`.
pub struct UniformDistributionSampler {
    upper_bound_nanos: u64,
    rng: StdRng,
}

impl UniformDistributionSampler {
    pub fn new(upper_bound: Duration) -> Self {
        UniformDistributionSampler {
            upper_bound_nanos: upper_bound.as_nanos() as u64,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(upper_bound: Duration, seed: u64) -> Self {
        UniformDistributionSampler {
            upper_bound_nanos: upper_bound.as_nanos() as u64,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl DiscreteDistributionSampler for UniformDistributionSampler {
    fn sample(&mut self) -> u64 {
        if self.upper_bound_nanos == 0 {
            0
        } else {
            self.rng.gen_range(0..=self.upper_bound_nanos)
        }
    }
}

/// Zipf-distributed delays: the delay is `k * time_scale` where `k` follows
/// `p(k) proportional to (v + k)^-q` over nonnegative integers. Sampling
/// uses rejection-inversion, which needs no table and works for the
/// heavy-tailed exponents `q > 1`.
pub struct ZipfDistributionSampler {
    q: f64,
    v: f64,
    time_scale_nanos: u64,
    hx0: f64,
    hxm: f64,
    s: f64,
    k_max: f64,
    rng: StdRng,
}

impl ZipfDistributionSampler {
    const K_MAX: f64 = (1u64 << 40) as f64;

    pub fn new(q: f64, v: f64, time_scale: Duration) -> Result<Self, ConfigurationError> {
        Self::with_rng(q, v, time_scale, StdRng::from_entropy())
    }

    pub fn with_seed(
        q: f64,
        v: f64,
        time_scale: Duration,
        seed: u64,
    ) -> Result<Self, ConfigurationError> {
        Self::with_rng(q, v, time_scale, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        q: f64,
        v: f64,
        time_scale: Duration,
        rng: StdRng,
    ) -> Result<Self, ConfigurationError> {
        if !q.is_finite() || q <= 1.0 {
            return Err(ConfigurationError::invalid(
                "zipf_q",
                format!("exponent q must be greater than 1, got {}", q),
            ));
        }
        if !v.is_finite() || v <= 0.0 {
            return Err(ConfigurationError::invalid(
                "zipf_v",
                format!("parameter v must be greater than 0, got {}", v),
            ));
        }
        let mut sampler = ZipfDistributionSampler {
            q,
            v,
            time_scale_nanos: time_scale.as_nanos() as u64,
            hx0: 0.0,
            hxm: 0.0,
            s: 0.0,
            k_max: Self::K_MAX,
            rng,
        };
        sampler.hx0 = sampler.h_integral(0.5);
        sampler.hxm = sampler.h_integral(sampler.k_max + 0.5);
        sampler.s = 1.0 - sampler.h_integral_inverse(sampler.h_integral(1.5) - sampler.h(1.0));
        Ok(sampler)
    }

    fn h(&self, x: f64) -> f64 {
        (self.v + x).powf(-self.q)
    }

    fn h_integral(&self, x: f64) -> f64 {
        (self.v + x).powf(1.0 - self.q) / (1.0 - self.q)
    }

    fn h_integral_inverse(&self, u: f64) -> f64 {
        ((1.0 - self.q) * u).powf(1.0 / (1.0 - self.q)) - self.v
    }

    fn sample_k(&mut self) -> u64 {
        loop {
            let u = self.hx0 + self.rng.gen::<f64>() * (self.hxm - self.hx0);
            let x = self.h_integral_inverse(u);
            let k = (x + 0.5).floor().clamp(0.0, self.k_max);
            if k - x <= self.s || u >= self.h_integral(k + 0.5) - self.h(k) {
                return k as u64;
            }
        }
    }
}

impl DiscreteDistributionSampler for ZipfDistributionSampler {
    fn sample(&mut self) -> u64 {
        self.sample_k().saturating_mul(self.time_scale_nanos)
    }
}

/// Redistributes the timing of a wrapped limiter's grants by a sampled
/// delay per grant. Every grant obtained from the wrapped limiter is queued
/// for release at `now + delay`, so the total number of grants is preserved
/// while their timing is perturbed.
pub struct DistributionSamplingRateLimiter {
    inner: Box<dyn RateLimiter>,
    sampler: Box<dyn DiscreteDistributionSampler>,
    queued: BinaryHeap<Reverse<Instant>>,
}

impl DistributionSamplingRateLimiter {
    pub fn new(inner: Box<dyn RateLimiter>, sampler: Box<dyn DiscreteDistributionSampler>) -> Self {
        DistributionSamplingRateLimiter {
            inner,
            sampler,
            queued: BinaryHeap::new(),
        }
    }
}

impl RateLimiter for DistributionSamplingRateLimiter {
    fn try_acquire_one(&mut self, now: Instant) -> bool {
        loop {
            if let Some(&Reverse(head)) = self.queued.peek() {
                if head <= now {
                    self.queued.pop();
                    return true;
                }
            }
            if self.inner.try_acquire_one(now) {
                let delay = Duration::from_nanos(self.sampler.sample());
                self.queued.push(Reverse(now + delay));
                continue;
            }
            return false;
        }
    }

    fn release_one(&mut self) {
        self.inner.release_one();
    }

    fn time_started(&self) -> Option<Instant> {
        self.inner.time_started()
    }
}

/// Zipf-perturbed pacing; a [`DistributionSamplingRateLimiter`] with a
/// Zipf delay sampler.
pub struct ZipfRateLimiter {
    inner: DistributionSamplingRateLimiter,
}

impl ZipfRateLimiter {
    pub fn new(
        inner: Box<dyn RateLimiter>,
        q: f64,
        v: f64,
        time_scale: Duration,
    ) -> Result<Self, ConfigurationError> {
        let sampler = ZipfDistributionSampler::new(q, v, time_scale)?;
        Ok(ZipfRateLimiter {
            inner: DistributionSamplingRateLimiter::new(inner, Box::new(sampler)),
        })
    }
}

impl RateLimiter for ZipfRateLimiter {
    fn try_acquire_one(&mut self, now: Instant) -> bool {
        self.inner.try_acquire_one(now)
    }

    fn release_one(&mut self) {
        self.inner.release_one();
    }

    fn time_started(&self) -> Option<Instant> {
        self.inner.time_started()
    }
}

/// Filter applied on top of a wrapped limiter's grants.
pub type RateLimiterFilter = Box<dyn FnMut(Instant) -> bool + Send>;

/// Even when the wrapped limiter grants, the grant passes only when the
/// filter agrees; refused grants are dropped, thinning the effective rate.
pub struct FilteringRateLimiter {
    inner: Box<dyn RateLimiter>,
    filter: RateLimiterFilter,
}

impl FilteringRateLimiter {
    pub fn new(inner: Box<dyn RateLimiter>, filter: RateLimiterFilter) -> Self {
        FilteringRateLimiter { inner, filter }
    }
}

impl RateLimiter for FilteringRateLimiter {
    fn try_acquire_one(&mut self, now: Instant) -> bool {
        self.inner.try_acquire_one(now) && (self.filter)(now)
    }

    fn release_one(&mut self) {
        self.inner.release_one();
    }

    fn time_started(&self) -> Option<Instant> {
        self.inner.time_started()
    }
}

/// A filtering limiter whose pass probability ramps linearly from 0 to 1
/// over the given duration, measured from the wrapped limiter's start time.
pub struct LinearlyOpeningRateLimiter {
    inner: Box<dyn RateLimiter>,
    ramp: Duration,
    rng: StdRng,
}

impl LinearlyOpeningRateLimiter {
    pub fn new(inner: Box<dyn RateLimiter>, ramp: Duration) -> Result<Self, ConfigurationError> {
        Self::with_rng(inner, ramp, StdRng::from_entropy())
    }

    pub fn with_seed(
        inner: Box<dyn RateLimiter>,
        ramp: Duration,
        seed: u64,
    ) -> Result<Self, ConfigurationError> {
        Self::with_rng(inner, ramp, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        inner: Box<dyn RateLimiter>,
        ramp: Duration,
        rng: StdRng,
    ) -> Result<Self, ConfigurationError> {
        if ramp.is_zero() {
            return Err(ConfigurationError::invalid(
                "ramp_duration",
                "must be greater than zero",
            ));
        }
        Ok(LinearlyOpeningRateLimiter { inner, ramp, rng })
    }
}

impl RateLimiter for LinearlyOpeningRateLimiter {
    fn try_acquire_one(&mut self, now: Instant) -> bool {
        if !self.inner.try_acquire_one(now) {
            return false;
        }
        let elapsed = self.inner.elapsed(now);
        if elapsed >= self.ramp {
            return true;
        }
        let draw = self.rng.gen_range(0..=self.ramp.as_nanos() as u64);
        draw <= elapsed.as_nanos() as u64
    }

    fn release_one(&mut self) {
        self.inner.release_one();
    }

    fn time_started(&self) -> Option<Instant> {
        self.inner.time_started()
    }
}
