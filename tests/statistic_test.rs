//! Cross-variant statistic behavior: precision trade-offs, merge algebra,
//! and wire serialization.

use nighthawk::statistic::{
    HdrStatistic, InMemoryStatistic, SerializationDomain, SimpleStatistic, Statistic,
    StreamingStatistic,
};

/// Percentiles every histogram wire record must carry at minimum.
const REQUIRED_PERCENTILES: [f64; 9] = [0.0, 0.5, 0.75, 0.8, 0.9, 0.95, 0.99, 0.999, 1.0];

#[test]
fn streaming_vs_simple_at_large_offsets() {
    // Samples riding on a billion-nanosecond offset; the true population
    // variance of the offsets {4, 7, 13, 16} is 22.5.
    let offset = 1_000_000_000u64;
    let mut streaming = StreamingStatistic::new();
    let mut simple = SimpleStatistic::new();
    for delta in [4u64, 7, 13, 16] {
        streaming.add_value(offset + delta);
        simple.add_value(offset + delta);
    }

    assert!((streaming.pvariance() - 22.5).abs() < 1e-4);
    // The simple statistic diverges by far more than 10% at this offset;
    // that divergence is the documented cost of the cheaper accumulation.
    assert!((simple.pvariance() - 22.5).abs() > 2.25);
}

#[test]
fn all_variants_agree_on_plain_samples() {
    let samples = [250u64, 500, 750, 1000];
    let mut streaming = StreamingStatistic::new();
    let mut simple = SimpleStatistic::new();
    let mut in_memory = InMemoryStatistic::new();
    let mut hdr = HdrStatistic::new();
    for &sample in &samples {
        streaming.add_value(sample);
        simple.add_value(sample);
        in_memory.add_value(sample);
        hdr.add_value(sample);
    }
    for statistic in [
        &streaming as &dyn Statistic,
        &simple,
        &in_memory,
        &hdr,
    ] {
        assert_eq!(statistic.count(), 4);
        assert!((statistic.mean() - 625.0).abs() / 625.0 < 1e-3);
        assert!(statistic.min() <= 250 && statistic.min() >= 249);
        assert!(statistic.max() >= 999 && statistic.max() <= 1000);
    }
}

#[test]
fn hdr_combine_matches_single_instance() {
    let mut left = HdrStatistic::new();
    let mut right = HdrStatistic::new();
    let mut reference = HdrStatistic::new();
    for v in 1..=500u64 {
        left.add_value(v * 1_000);
        reference.add_value(v * 1_000);
    }
    for v in 501..=1000u64 {
        right.add_value(v * 1_000);
        reference.add_value(v * 1_000);
    }
    let combined = left.combine(&right);
    assert_eq!(combined.count(), reference.count());
    assert_eq!(combined.min(), reference.min());
    assert_eq!(combined.max(), reference.max());
    assert!((combined.mean() - reference.mean()).abs() / reference.mean() < 1e-3);
}

#[test]
fn counts_are_monotonic() {
    let mut statistic = StreamingStatistic::new();
    let mut last = statistic.count();
    for v in 0..100u64 {
        statistic.add_value(v);
        assert!(statistic.count() >= last);
        last = statistic.count();
    }
    assert_eq!(last, 100);
}

#[test]
fn hdr_wire_record_carries_required_percentiles() {
    let mut statistic = HdrStatistic::new();
    for v in 1..=10_000u64 {
        statistic.add_value(v);
    }
    let record = statistic.to_record(SerializationDomain::Raw);
    for required in REQUIRED_PERCENTILES {
        assert!(
            record
                .percentiles
                .iter()
                .any(|p| (p.percentile - required).abs() < 1e-9),
            "missing percentile {}",
            required
        );
    }
    // Percentile values are monotone in the quantile.
    let values: Vec<u64> = record
        .percentiles
        .iter()
        .map(|p| p.raw_value.unwrap())
        .collect();
    let mut sorted = values.clone();
    sorted.sort_unstable();
    assert_eq!(values, sorted);
}

#[test]
fn duration_domain_round_trips_through_streaming() {
    let mut statistic = StreamingStatistic::new();
    statistic.set_id("benchmark_http_client.queue_to_connect");
    for v in [1_500_000_000u64, 2_500_000_000, 3_500_000_000] {
        statistic.add_value(v);
    }
    let record = statistic.to_record(SerializationDomain::Duration);
    let restored = StreamingStatistic::from_record(&record);
    assert_eq!(restored.count(), 3);
    assert_eq!(restored.min(), 1_500_000_000);
    assert_eq!(restored.max(), 3_500_000_000);
    // The duration form rounds to whole nanoseconds.
    assert!((restored.mean() - statistic.mean()).abs() <= 1.0);
    assert!((restored.pstdev() - statistic.pstdev()).abs() <= 1.0);
}

#[test]
fn combine_is_associative_across_many_instances() {
    // Merge order over worker statistics must not matter.
    let mut parts = Vec::new();
    for worker in 0..4u64 {
        let mut statistic = SimpleStatistic::new();
        for i in 0..50u64 {
            statistic.add_value(worker * 1_000 + i);
        }
        parts.push(statistic);
    }

    let left_fold = parts
        .iter()
        .skip(1)
        .fold(parts[0].box_clone(), |acc, s| acc.combine(s));
    let right_fold = {
        let mut iter = parts.iter().rev();
        let first = iter.next().unwrap().box_clone();
        iter.fold(first, |acc, s| acc.combine(s))
    };
    assert_eq!(left_fold.count(), right_fold.count());
    assert_eq!(left_fold.min(), right_fold.min());
    assert_eq!(left_fold.max(), right_fold.max());
    assert!((left_fold.mean() - right_fold.mean()).abs() < 1e-6);
    assert!((left_fold.pstdev() - right_fold.pstdev()).abs() < 1e-6);
}

#[test]
#[should_panic(expected = "different concrete type")]
fn combining_across_concrete_types_panics() {
    let mut hdr = HdrStatistic::new();
    hdr.add_value(100);
    let streaming = StreamingStatistic::new();
    let _ = hdr.combine(&streaming);
}
