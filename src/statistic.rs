//! Online aggregation of latency samples.
//!
//! All statistics consume nonnegative integer samples (nanosecond latencies)
//! and expose count, min, max, mean and population variance. Four concrete
//! variants trade accuracy against cost:
//!
//! - [`StreamingStatistic`]: Welford's method, resists catastrophic
//!   cancellation, O(1) memory.
//! - [`SimpleStatistic`]: sum and sum-of-squares, cheaper but loses precision
//!   at large offsets.
//! - [`InMemoryStatistic`]: retains all samples plus a streaming summary.
//! - [`HdrStatistic`]: HDR histogram with percentile output, bounded range.
//!
//! [`NullStatistic`] is a no-op for places where measurement is disabled.

use std::any::Any;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Output domain for wire serialization.
///
/// `Duration` splits values into seconds and nanoseconds; `Raw` emits plain
/// numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationDomain {
    Raw,
    Duration,
}

/// A duration split into whole seconds and leftover nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRecord {
    pub seconds: u64,
    pub nanos: u32,
}

impl DurationRecord {
    pub fn from_nanos(nanos: u64) -> Self {
        DurationRecord {
            seconds: nanos / 1_000_000_000,
            nanos: (nanos % 1_000_000_000) as u32,
        }
    }

    pub fn as_nanos(&self) -> u64 {
        self.seconds * 1_000_000_000 + u64::from(self.nanos)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::new(self.seconds, self.nanos)
    }
}

/// One row of a histogram percentile table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentileRecord {
    /// Percentile as a fraction in [0, 1].
    pub percentile: f64,
    /// Cumulative sample count at or below this percentile's value.
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<DurationRecord>,
}

/// Transport form of a statistic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticRecord {
    pub id: String,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_pstdev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_min: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_max: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<DurationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pstdev: Option<DurationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<DurationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<DurationRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub percentiles: Vec<PercentileRecord>,
}

/// Common contract for online latency summaries.
///
/// Instances are created at worker start, mutated only by the owning worker's
/// thread, merged into a global copy once all workers report completion, and
/// read-only thereafter.
pub trait Statistic: Send {
    /// Incorporates one sample.
    fn add_value(&mut self, value: u64);

    fn count(&self) -> u64;

    /// Smallest sample seen, or `u64::MAX` when no samples were recorded.
    fn min(&self) -> u64;

    /// Largest sample seen, or `0` when no samples were recorded.
    fn max(&self) -> u64;

    /// Sample mean; NaN when the statistic is empty.
    fn mean(&self) -> f64;

    /// Population variance; NaN when the statistic is empty.
    fn pvariance(&self) -> f64;

    /// Population standard deviation; NaN when the statistic is empty.
    fn pstdev(&self) -> f64;

    fn id(&self) -> &str;

    /// Sets the identifier. Setting an already-set id overwrites it.
    fn set_id(&mut self, id: &str);

    /// Number of significant digits the implementation claims for derived
    /// values. Zero means no claim.
    fn significant_digits(&self) -> u32 {
        0
    }

    /// Whether mean and variance hold up under large sample offsets.
    fn resists_catastrophic_cancellation(&self) -> bool {
        false
    }

    /// Returns a new statistic representing the union of the samples of
    /// `self` and `other`.
    ///
    /// # Panics
    ///
    /// Panics when `other` is a different concrete type; combining across
    /// types is a programmer error.
    fn combine(&self, other: &dyn Statistic) -> Box<dyn Statistic>;

    /// Produces the transport form of this statistic.
    fn to_record(&self, domain: SerializationDomain) -> StatisticRecord;

    fn box_clone(&self) -> Box<dyn Statistic>;

    fn as_any(&self) -> &dyn Any;
}

/// Fills the fields shared by every implementation.
fn base_record(statistic: &dyn Statistic, domain: SerializationDomain) -> StatisticRecord {
    let mut record = StatisticRecord {
        id: statistic.id().to_string(),
        count: statistic.count(),
        ..StatisticRecord::default()
    };
    let empty = statistic.count() == 0;
    match domain {
        SerializationDomain::Duration => {
            let mean_nanos = if empty { 0 } else { statistic.mean().round() as u64 };
            let pstdev = statistic.pstdev();
            let pstdev_nanos = if empty || pstdev.is_nan() {
                0
            } else {
                pstdev.round() as u64
            };
            record.mean = Some(DurationRecord::from_nanos(mean_nanos));
            record.pstdev = Some(DurationRecord::from_nanos(pstdev_nanos));
            record.min = Some(DurationRecord::from_nanos(if empty {
                0
            } else {
                statistic.min()
            }));
            record.max = Some(DurationRecord::from_nanos(statistic.max()));
        }
        SerializationDomain::Raw => {
            if !empty {
                record.raw_mean = Some(statistic.mean());
                record.raw_pstdev = Some(statistic.pstdev());
                record.raw_min = Some(statistic.min());
                record.raw_max = Some(statistic.max());
            }
        }
    }
    record
}

fn combine_type_mismatch(id: &str) -> ! {
    panic!(
        "attempted to combine statistic '{}' with an instance of a different concrete type",
        id
    );
}

/// Welford's online mean and variance.
///
/// The recurrence `delta = v - mean; mean += delta / n; m2 += delta * (v - mean)`
/// keeps mean and variance accurate even when samples share a large offset.
#[derive(Debug, Clone, Default)]
pub struct StreamingStatistic {
    id: String,
    count: u64,
    min: u64,
    max: u64,
    mean: f64,
    accumulated_variance: f64,
}

impl StreamingStatistic {
    pub fn new() -> Self {
        StreamingStatistic {
            min: u64::MAX,
            ..StreamingStatistic::default()
        }
    }

    /// Reconstructs a streaming statistic from its transport form.
    pub fn from_record(record: &StatisticRecord) -> Self {
        let mean = record
            .raw_mean
            .or_else(|| record.mean.map(|d| d.as_nanos() as f64))
            .unwrap_or(0.0);
        let pstdev = record
            .raw_pstdev
            .or_else(|| record.pstdev.map(|d| d.as_nanos() as f64))
            .unwrap_or(0.0);
        StreamingStatistic {
            id: record.id.clone(),
            count: record.count,
            min: record
                .raw_min
                .or_else(|| record.min.map(|d| d.as_nanos()))
                .unwrap_or(u64::MAX),
            max: record
                .raw_max
                .or_else(|| record.max.map(|d| d.as_nanos()))
                .unwrap_or(0),
            mean,
            accumulated_variance: pstdev * pstdev * record.count as f64,
        }
    }
}

impl Statistic for StreamingStatistic {
    fn add_value(&mut self, value: u64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value as f64 - self.mean;
        let delta_n = delta / self.count as f64;
        self.mean += delta_n;
        self.accumulated_variance += delta * delta_n * (self.count as f64 - 1.0);
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn min(&self) -> u64 {
        self.min
    }

    fn max(&self) -> u64 {
        self.max
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    fn pvariance(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.accumulated_variance / self.count as f64
        }
    }

    fn pstdev(&self) -> f64 {
        self.pvariance().sqrt()
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    fn resists_catastrophic_cancellation(&self) -> bool {
        true
    }

    fn combine(&self, other: &dyn Statistic) -> Box<dyn Statistic> {
        let b = other
            .as_any()
            .downcast_ref::<StreamingStatistic>()
            .unwrap_or_else(|| combine_type_mismatch(self.id()));
        let count = self.count + b.count;
        // An empty statistic reports NaN as its mean; treat that as 0 here.
        let a_mean = if self.mean().is_nan() { 0.0 } else { self.mean };
        let b_mean = if b.mean().is_nan() { 0.0 } else { b.mean };
        let mean = if count == 0 {
            0.0
        } else {
            (self.count as f64 * a_mean + b.count as f64 * b_mean) / count as f64
        };
        let accumulated_variance = if count == 0 {
            0.0
        } else {
            self.accumulated_variance
                + b.accumulated_variance
                + (a_mean - b_mean).powi(2) * self.count as f64 * b.count as f64 / count as f64
        };
        Box::new(StreamingStatistic {
            id: self.id.clone(),
            count,
            min: self.min.min(b.min),
            max: self.max.max(b.max),
            mean,
            accumulated_variance,
        })
    }

    fn to_record(&self, domain: SerializationDomain) -> StatisticRecord {
        base_record(self, domain)
    }

    fn box_clone(&self) -> Box<dyn Statistic> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Sum and sum-of-squares accumulation.
///
/// Cheaper per sample than [`StreamingStatistic`] but the
/// `sum_x2 / n - mean^2` form cancels badly when samples sit on a large
/// offset.
#[derive(Debug, Clone, Default)]
pub struct SimpleStatistic {
    id: String,
    count: u64,
    min: u64,
    max: u64,
    sum_x: f64,
    sum_x2: f64,
}

impl SimpleStatistic {
    pub fn new() -> Self {
        SimpleStatistic {
            min: u64::MAX,
            ..SimpleStatistic::default()
        }
    }

    /// Reconstructs a simple statistic from its transport form.
    pub fn from_record(record: &StatisticRecord) -> Self {
        let mean = record
            .raw_mean
            .or_else(|| record.mean.map(|d| d.as_nanos() as f64))
            .unwrap_or(0.0);
        let pstdev = record
            .raw_pstdev
            .or_else(|| record.pstdev.map(|d| d.as_nanos() as f64))
            .unwrap_or(0.0);
        let count = record.count as f64;
        SimpleStatistic {
            id: record.id.clone(),
            count: record.count,
            min: record
                .raw_min
                .or_else(|| record.min.map(|d| d.as_nanos()))
                .unwrap_or(u64::MAX),
            max: record
                .raw_max
                .or_else(|| record.max.map(|d| d.as_nanos()))
                .unwrap_or(0),
            sum_x: mean * count,
            sum_x2: (pstdev * pstdev + mean * mean) * count,
        }
    }
}

impl Statistic for SimpleStatistic {
    fn add_value(&mut self, value: u64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum_x += value as f64;
        self.sum_x2 += value as f64 * value as f64;
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn min(&self) -> u64 {
        self.min
    }

    fn max(&self) -> u64 {
        self.max
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.sum_x / self.count as f64
        }
    }

    fn pvariance(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            let mean = self.mean();
            self.sum_x2 / self.count as f64 - mean * mean
        }
    }

    fn pstdev(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.pvariance().max(0.0).sqrt()
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    fn significant_digits(&self) -> u32 {
        8
    }

    fn combine(&self, other: &dyn Statistic) -> Box<dyn Statistic> {
        let b = other
            .as_any()
            .downcast_ref::<SimpleStatistic>()
            .unwrap_or_else(|| combine_type_mismatch(self.id()));
        Box::new(SimpleStatistic {
            id: self.id.clone(),
            count: self.count + b.count,
            min: self.min.min(b.min),
            max: self.max.max(b.max),
            sum_x: self.sum_x + b.sum_x,
            sum_x2: self.sum_x2 + b.sum_x2,
        })
    }

    fn to_record(&self, domain: SerializationDomain) -> StatisticRecord {
        base_record(self, domain)
    }

    fn box_clone(&self) -> Box<dyn Statistic> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Retains every sample next to a streaming summary. O(N) memory; intended
/// for debugging.
#[derive(Debug, Clone)]
pub struct InMemoryStatistic {
    samples: Vec<u64>,
    streaming: StreamingStatistic,
}

impl InMemoryStatistic {
    pub fn new() -> Self {
        InMemoryStatistic {
            samples: Vec::new(),
            streaming: StreamingStatistic::new(),
        }
    }

    pub fn samples(&self) -> &[u64] {
        &self.samples
    }
}

impl Default for InMemoryStatistic {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistic for InMemoryStatistic {
    fn add_value(&mut self, value: u64) {
        self.samples.push(value);
        self.streaming.add_value(value);
    }

    fn count(&self) -> u64 {
        self.streaming.count()
    }

    fn min(&self) -> u64 {
        self.streaming.min()
    }

    fn max(&self) -> u64 {
        self.streaming.max()
    }

    fn mean(&self) -> f64 {
        self.streaming.mean()
    }

    fn pvariance(&self) -> f64 {
        self.streaming.pvariance()
    }

    fn pstdev(&self) -> f64 {
        self.streaming.pstdev()
    }

    fn id(&self) -> &str {
        self.streaming.id()
    }

    fn set_id(&mut self, id: &str) {
        self.streaming.set_id(id);
    }

    fn resists_catastrophic_cancellation(&self) -> bool {
        self.streaming.resists_catastrophic_cancellation()
    }

    fn combine(&self, other: &dyn Statistic) -> Box<dyn Statistic> {
        let b = other
            .as_any()
            .downcast_ref::<InMemoryStatistic>()
            .unwrap_or_else(|| combine_type_mismatch(self.id()));
        let mut samples = self.samples.clone();
        samples.extend_from_slice(&b.samples);
        let streaming = self.streaming.combine(&b.streaming);
        let streaming = streaming
            .as_any()
            .downcast_ref::<StreamingStatistic>()
            .expect("streaming combine yields a streaming statistic")
            .clone();
        Box::new(InMemoryStatistic { samples, streaming })
    }

    fn to_record(&self, domain: SerializationDomain) -> StatisticRecord {
        base_record(self, domain)
    }

    fn box_clone(&self) -> Box<dyn Statistic> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Nanosecond range tracked by [`HdrStatistic`]: 1 ns to 60 s.
const HDR_MAX_VALUE: u64 = 1_000_000_000 * 60;
const HDR_SIGNIFICANT_DIGITS: u8 = 4;

/// Percentile fractions emitted in the wire form.
const WIRE_PERCENTILES: [f64; 13] = [
    0.0, 0.1, 0.25, 0.5, 0.75, 0.8, 0.9, 0.95, 0.99, 0.995, 0.999, 0.9999, 1.0,
];

/// High-dynamic-range histogram over 1 ns .. 60 s with four significant
/// digits. Insertion is O(1) and memory is bounded. Values outside the range
/// are discarded without being counted.
#[derive(Debug, Clone)]
pub struct HdrStatistic {
    id: String,
    histogram: Histogram<u64>,
}

impl HdrStatistic {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, HDR_MAX_VALUE, HDR_SIGNIFICANT_DIGITS)
            .expect("failed to create histogram");
        HdrStatistic {
            id: String::new(),
            histogram,
        }
    }

    /// Value at the given quantile (fraction in [0, 1]).
    pub fn value_at_quantile(&self, quantile: f64) -> u64 {
        self.histogram.value_at_quantile(quantile)
    }

    /// Reconstructs a histogram from a wire percentile table by re-recording
    /// each percentile value with the count delta it covers.
    pub fn from_record(record: &StatisticRecord) -> Self {
        let mut statistic = HdrStatistic::new();
        statistic.id = record.id.clone();
        let mut recorded: u64 = 0;
        for percentile in &record.percentiles {
            let value = percentile
                .raw_value
                .or_else(|| percentile.duration.map(|d| d.as_nanos()))
                .unwrap_or(0);
            let delta = percentile.count.saturating_sub(recorded);
            if delta > 0 {
                if statistic
                    .histogram
                    .record_n(value.max(1), delta)
                    .is_err()
                {
                    warn!(value, "Failed to re-record percentile value into histogram");
                }
                recorded = percentile.count;
            }
        }
        statistic
    }
}

impl Default for HdrStatistic {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistic for HdrStatistic {
    fn add_value(&mut self, value: u64) {
        // Values outside the tracked range are dropped and not counted.
        if self.histogram.record(value).is_err() {
            warn!(value, "Failed to record value into HdrHistogram");
        }
    }

    fn count(&self) -> u64 {
        self.histogram.len()
    }

    fn min(&self) -> u64 {
        if self.histogram.is_empty() {
            u64::MAX
        } else {
            self.histogram.min()
        }
    }

    fn max(&self) -> u64 {
        if self.histogram.is_empty() {
            0
        } else {
            self.histogram.max()
        }
    }

    fn mean(&self) -> f64 {
        if self.histogram.is_empty() {
            f64::NAN
        } else {
            self.histogram.mean()
        }
    }

    fn pvariance(&self) -> f64 {
        let stdev = self.pstdev();
        stdev * stdev
    }

    fn pstdev(&self) -> f64 {
        if self.histogram.is_empty() {
            f64::NAN
        } else {
            self.histogram.stdev()
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    fn significant_digits(&self) -> u32 {
        u32::from(HDR_SIGNIFICANT_DIGITS)
    }

    fn combine(&self, other: &dyn Statistic) -> Box<dyn Statistic> {
        let b = other
            .as_any()
            .downcast_ref::<HdrStatistic>()
            .unwrap_or_else(|| combine_type_mismatch(self.id()));
        let mut combined = HdrStatistic::new();
        combined.id = self.id.clone();
        if combined.histogram.add(&self.histogram).is_err()
            || combined.histogram.add(&b.histogram).is_err()
        {
            warn!("Combining histograms dropped values");
        }
        Box::new(combined)
    }

    fn to_record(&self, domain: SerializationDomain) -> StatisticRecord {
        let mut record = base_record(self, domain);
        if self.histogram.is_empty() {
            return record;
        }
        let total = self.histogram.len();
        let mut cumulative = 0u64;
        for &quantile in WIRE_PERCENTILES.iter() {
            let value = self.histogram.value_at_quantile(quantile);
            // The zero percentile carries one sample so the minimum survives
            // a reconstruction; later rows carry their cumulative counts.
            let count = if quantile == 0.0 {
                1
            } else {
                ((quantile * total as f64).ceil() as u64).min(total)
            };
            cumulative = cumulative.max(count);
            let mut row = PercentileRecord {
                percentile: quantile,
                count: cumulative,
                raw_value: None,
                duration: None,
            };
            match domain {
                SerializationDomain::Raw => row.raw_value = Some(value),
                SerializationDomain::Duration => {
                    row.duration = Some(DurationRecord::from_nanos(value))
                }
            }
            record.percentiles.push(row);
        }
        record
    }

    fn box_clone(&self) -> Box<dyn Statistic> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// No-op statistic used where measurement is disabled.
#[derive(Debug, Clone, Default)]
pub struct NullStatistic {
    id: String,
}

impl NullStatistic {
    pub fn new() -> Self {
        NullStatistic::default()
    }
}

impl Statistic for NullStatistic {
    fn add_value(&mut self, _value: u64) {}

    fn count(&self) -> u64 {
        0
    }

    fn min(&self) -> u64 {
        u64::MAX
    }

    fn max(&self) -> u64 {
        0
    }

    fn mean(&self) -> f64 {
        f64::NAN
    }

    fn pvariance(&self) -> f64 {
        f64::NAN
    }

    fn pstdev(&self) -> f64 {
        f64::NAN
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    fn combine(&self, other: &dyn Statistic) -> Box<dyn Statistic> {
        if other.as_any().downcast_ref::<NullStatistic>().is_none() {
            combine_type_mismatch(self.id());
        }
        Box::new(self.clone())
    }

    fn to_record(&self, domain: SerializationDomain) -> StatisticRecord {
        base_record(self, domain)
    }

    fn box_clone(&self) -> Box<dyn Statistic> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(statistic: &mut dyn Statistic, samples: &[u64]) {
        for &sample in samples {
            statistic.add_value(sample);
        }
    }

    #[test]
    fn streaming_basics() {
        let mut statistic = StreamingStatistic::new();
        assert!(statistic.mean().is_nan());
        assert!(statistic.pstdev().is_nan());
        feed(&mut statistic, &[1, 2, 3, 4]);
        assert_eq!(statistic.count(), 4);
        assert_eq!(statistic.min(), 1);
        assert_eq!(statistic.max(), 4);
        assert!((statistic.mean() - 2.5).abs() < 1e-12);
        assert!((statistic.pvariance() - 1.25).abs() < 1e-12);
    }

    #[test]
    fn simple_basics() {
        let mut statistic = SimpleStatistic::new();
        feed(&mut statistic, &[10, 20, 30]);
        assert_eq!(statistic.count(), 3);
        assert!((statistic.mean() - 20.0).abs() < 1e-9);
        assert!((statistic.pvariance() - 66.6666).abs() < 0.001);
        assert_eq!(statistic.significant_digits(), 8);
    }

    #[test]
    fn streaming_resists_large_offset_cancellation() {
        let offset = 1_000_000_000u64;
        let samples = [offset + 4, offset + 7, offset + 13, offset + 16];

        let mut streaming = StreamingStatistic::new();
        let mut simple = SimpleStatistic::new();
        feed(&mut streaming, &samples);
        feed(&mut simple, &samples);

        // True population variance of {4, 7, 13, 16} is 22.5.
        assert!((streaming.pvariance() - 22.5).abs() < 1e-4);
        assert!(streaming.resists_catastrophic_cancellation());

        // The sum-of-squares form cancels badly at this offset. The
        // divergence is expected; it documents the trade-off.
        assert!((simple.pvariance() - 22.5).abs() > 22.5 * 0.1);
        assert!(!simple.resists_catastrophic_cancellation());
    }

    #[test]
    fn combine_is_commutative_and_associative() {
        let mut a = StreamingStatistic::new();
        let mut b = StreamingStatistic::new();
        let mut c = StreamingStatistic::new();
        feed(&mut a, &[1, 5, 9]);
        feed(&mut b, &[100, 200]);
        feed(&mut c, &[7]);

        let ab_c = a.combine(&b).combine(&c);
        let a_bc = a.combine(b.combine(&c).as_ref());
        let ba = b.combine(&a);
        let ab = a.combine(&b);

        assert_eq!(ab_c.count(), a_bc.count());
        assert_eq!(ab_c.min(), a_bc.min());
        assert_eq!(ab_c.max(), a_bc.max());
        assert!((ab_c.mean() - a_bc.mean()).abs() < 1e-9);
        assert!((ab_c.pstdev() - a_bc.pstdev()).abs() < 1e-9);

        assert_eq!(ab.count(), ba.count());
        assert!((ab.mean() - ba.mean()).abs() < 1e-9);
        assert!((ab.pstdev() - ba.pstdev()).abs() < 1e-9);
    }

    #[test]
    fn combine_with_empty_treats_nan_mean_as_zero() {
        let mut a = StreamingStatistic::new();
        feed(&mut a, &[10, 20]);
        let empty = StreamingStatistic::new();
        let combined = a.combine(&empty);
        assert_eq!(combined.count(), 2);
        assert!((combined.mean() - 15.0).abs() < 1e-9);
    }

    #[test]
    #[should_panic(expected = "different concrete type")]
    fn combine_type_mismatch_panics() {
        let a = StreamingStatistic::new();
        let b = SimpleStatistic::new();
        let _ = a.combine(&b);
    }

    #[test]
    fn in_memory_retains_samples() {
        let mut statistic = InMemoryStatistic::new();
        feed(&mut statistic, &[3, 1, 2]);
        assert_eq!(statistic.samples(), &[3, 1, 2]);
        assert_eq!(statistic.count(), 3);
        assert!((statistic.mean() - 2.0).abs() < 1e-9);

        let mut other = InMemoryStatistic::new();
        feed(&mut other, &[4]);
        let combined = statistic.combine(&other);
        assert_eq!(combined.count(), 4);
        assert_eq!(combined.max(), 4);
    }

    #[test]
    fn hdr_discards_out_of_range_without_counting() {
        let mut statistic = HdrStatistic::new();
        statistic.add_value(HDR_MAX_VALUE * 2);
        assert_eq!(statistic.count(), 0);
        statistic.add_value(1_000);
        assert_eq!(statistic.count(), 1);
    }

    #[test]
    fn hdr_percentiles() {
        let mut statistic = HdrStatistic::new();
        for value in 1..=1000u64 {
            statistic.add_value(value * 1_000);
        }
        assert_eq!(statistic.count(), 1000);
        let p50 = statistic.value_at_quantile(0.5) as f64;
        assert!((p50 - 500_000.0).abs() / 500_000.0 < 0.001);
        let record = statistic.to_record(SerializationDomain::Raw);
        assert_eq!(record.percentiles.len(), WIRE_PERCENTILES.len());
        assert_eq!(record.percentiles.last().unwrap().count, 1000);
    }

    #[test]
    fn hdr_wire_round_trip() {
        let mut statistic = HdrStatistic::new();
        statistic.set_id("benchmark_http_client.request_to_response");
        for _ in 0..100 {
            statistic.add_value(1_000_000);
        }
        for _ in 0..100 {
            statistic.add_value(2_000_000);
        }
        let record = statistic.to_record(SerializationDomain::Raw);
        let restored = HdrStatistic::from_record(&record);
        assert_eq!(restored.count(), statistic.count());
        assert_eq!(restored.id(), statistic.id());
        // Equal within the histogram's precision.
        let tolerance = statistic.mean() * 1e-3;
        assert!((restored.mean() - statistic.mean()).abs() < tolerance);
        assert!(
            (restored.min() as f64 - statistic.min() as f64).abs()
                <= statistic.min() as f64 * 1e-3
        );
        assert!(
            (restored.max() as f64 - statistic.max() as f64).abs()
                <= statistic.max() as f64 * 1e-3
        );
    }

    #[test]
    fn streaming_wire_round_trip() {
        let mut statistic = StreamingStatistic::new();
        statistic.set_id("sequencer.callback");
        feed(&mut statistic, &[1_000, 2_000, 3_000]);
        let record = statistic.to_record(SerializationDomain::Raw);
        let restored = StreamingStatistic::from_record(&record);
        assert_eq!(restored.count(), 3);
        assert_eq!(restored.min(), 1_000);
        assert_eq!(restored.max(), 3_000);
        assert!((restored.mean() - statistic.mean()).abs() < 1e-6);
        assert!((restored.pstdev() - statistic.pstdev()).abs() < 1e-6);
        assert_eq!(restored.id(), "sequencer.callback");
    }

    #[test]
    fn duration_domain_splits_seconds_and_nanos() {
        let mut statistic = SimpleStatistic::new();
        statistic.add_value(1_500_000_000);
        let record = statistic.to_record(SerializationDomain::Duration);
        let mean = record.mean.unwrap();
        assert_eq!(mean.seconds, 1);
        assert_eq!(mean.nanos, 500_000_000);
        assert!(record.raw_mean.is_none());
    }

    #[test]
    fn empty_duration_domain_is_zeroed() {
        let statistic = StreamingStatistic::new();
        let record = statistic.to_record(SerializationDomain::Duration);
        assert_eq!(record.count, 0);
        assert_eq!(record.mean.unwrap().as_nanos(), 0);
        assert_eq!(record.pstdev.unwrap().as_nanos(), 0);
    }

    #[test]
    fn set_id_overwrites() {
        let mut statistic = StreamingStatistic::new();
        statistic.set_id("first");
        statistic.set_id("second");
        assert_eq!(statistic.id(), "second");
    }

    #[test]
    fn null_statistic_ignores_samples() {
        let mut statistic = NullStatistic::new();
        statistic.add_value(42);
        assert_eq!(statistic.count(), 0);
        assert!(statistic.mean().is_nan());
    }
}
