//! End-to-end benchmark runs against a local mock server.

use std::time::Duration;

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use nighthawk::options::{Concurrency, LoadOptions};
use nighthawk::process::{Process, ProcessError};
use nighthawk::sequencer::SequencerIdleStrategy;

fn options_for(uri: &str) -> LoadOptions {
    LoadOptions {
        uri: uri.to_string(),
        requests_per_second: 20,
        duration: Duration::from_secs(1),
        timeout: Duration::from_secs(1),
        sequencer_idle_strategy: SequencerIdleStrategy::Poll,
        ..LoadOptions::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn single_worker_run_produces_global_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let process = Process::new(options_for(&server.uri())).unwrap();
    let output = tokio::task::spawn_blocking(move || process.execute())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(output.results.len(), 1, "single worker emits only global");
    let global = output.global();
    assert_eq!(global.name, "global");

    // ~20 paced requests plus the warmup probe.
    let sent = global.counter("benchmark.total_req_sent").unwrap();
    assert!((15..=25).contains(&sent), "sent = {}", sent);
    assert_eq!(global.counter("benchmark.http_2xx"), Some(sent));
    assert_eq!(global.counter("sequencer.failed_terminations"), Some(0));
    assert!(!output.run_failed());

    // The probe is excluded from latency measurement.
    let response = global
        .statistic("benchmark_http_client.request_to_response")
        .unwrap();
    assert_eq!(response.count, sent - 1);
    // The sequencer may abandon the last in-flight completions at
    // termination; everything else must be accounted.
    let callback = global.statistic("sequencer.callback").unwrap();
    assert!(
        callback.count >= sent.saturating_sub(4) && callback.count <= sent - 1,
        "callback count = {}, sent = {}",
        callback.count,
        sent
    );

    assert!(global.execution_duration >= Duration::from_secs(1));
    assert!(global.first_acquisition_time.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn multi_worker_run_merges_and_reports_per_worker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut options = options_for(&server.uri());
    options.concurrency = Concurrency::Fixed(2);
    let process = Process::new(options).unwrap();
    let output = tokio::task::spawn_blocking(move || process.execute())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(output.results.len(), 3);
    assert_eq!(output.results[0].name, "global");
    assert_eq!(output.results[1].name, "worker_0");
    assert_eq!(output.results[2].name, "worker_1");

    // The global counters are the sum of the worker counters.
    let global_sent = output.results[0]
        .counter("benchmark.total_req_sent")
        .unwrap();
    let worker_sum: u64 = output.results[1..]
        .iter()
        .map(|r| r.counter("benchmark.total_req_sent").unwrap())
        .sum();
    assert_eq!(global_sent, worker_sum);

    // Each worker paces half the global rate, so each sends roughly half
    // the requests (plus its probe).
    for record in &output.results[1..] {
        let sent = record.counter("benchmark.total_req_sent").unwrap();
        assert!((7..=14).contains(&sent), "{}: sent = {}", record.name, sent);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_predicate_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut options = options_for(&server.uri());
    options
        .failure_predicates
        .insert("benchmark.http_5xx".to_string(), 0);
    let process = Process::new(options).unwrap();
    let output = tokio::task::spawn_blocking(move || process.execute())
        .await
        .unwrap()
        .unwrap();

    assert!(output.run_failed());
    let failed = output
        .global()
        .counter("sequencer.failed_terminations")
        .unwrap();
    assert!(failed > 0);
    // The run stopped early, well before the configured duration.
    assert!(output.global().execution_duration < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_stops_the_run_early() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut options = options_for(&server.uri());
    options.duration = Duration::from_secs(30);
    let process = Process::new(options).unwrap();
    let token = process.cancellation_token();

    let runner = tokio::task::spawn_blocking(move || process.execute());
    tokio::time::sleep(Duration::from_millis(300)).await;
    token.cancel();

    let output = runner.await.unwrap().unwrap();
    // Cancellation latches a failing termination.
    assert!(output.run_failed());
    assert!(output.global().execution_duration < Duration::from_secs(10));
}

#[test]
fn unresolvable_target_fails_before_any_requests() {
    let options = LoadOptions {
        uri: "http://host.invalid./".to_string(),
        ..LoadOptions::default()
    };
    let process = Process::new(options).unwrap();
    let err = process.execute().unwrap_err();
    assert!(matches!(err, ProcessError::UriResolution { .. }));
}
