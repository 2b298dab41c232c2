//! Open-loop HTTP client driven by the sequencer.
//!
//! `try_start_request` is a synchronous, total function: it either starts a
//! request immediately or returns false. The client never holds a start
//! back to wait for an earlier response; backpressure is expressed only by
//! that false return, which the sequencer accounts as blocked time. This is
//! the open-loop property the whole measurement rests on.
//!
//! Response handling runs in tasks spawned on the worker's own thread, so
//! the connect and response statistics stay single-writer.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::errors::{ConfigurationError, RequestFailure};
use crate::metrics;
use crate::sequencer::CompletionHandle;
use crate::statistic::Statistic;

/// Wire protocol spoken towards the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpProtocol {
    #[serde(alias = "h1")]
    Http1,
    #[serde(alias = "h2")]
    Http2,
    #[serde(alias = "h3")]
    Http3,
}

impl Default for HttpProtocol {
    fn default() -> Self {
        HttpProtocol::Http1
    }
}

/// Counter set maintained by the client. All counters are written with
/// relaxed atomics from the owning worker's thread and read at merge time.
#[derive(Debug, Default)]
pub struct ClientCounters {
    pub http_1xx: AtomicU64,
    pub http_2xx: AtomicU64,
    pub http_3xx: AtomicU64,
    pub http_4xx: AtomicU64,
    pub http_5xx: AtomicU64,
    pub http_xxx: AtomicU64,
    pub stream_resets: AtomicU64,
    pub pool_overflow: AtomicU64,
    pub pool_connection_failure: AtomicU64,
    pub total_req_sent: AtomicU64,
    pub upstream_rq_total: AtomicU64,
}

/// Wire names of all advertised counters, in output order.
pub const COUNTER_NAMES: [&str; 11] = [
    "benchmark.http_1xx",
    "benchmark.http_2xx",
    "benchmark.http_3xx",
    "benchmark.http_4xx",
    "benchmark.http_5xx",
    "benchmark.http_xxx",
    "benchmark.stream_resets",
    "benchmark.pool_overflow",
    "benchmark.pool_connection_failure",
    "benchmark.total_req_sent",
    "upstream_rq_total",
];

impl ClientCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(ClientCounters::default())
    }

    /// Looks a counter up by its wire name.
    pub fn value(&self, name: &str) -> Option<u64> {
        let counter = match name {
            "benchmark.http_1xx" => &self.http_1xx,
            "benchmark.http_2xx" => &self.http_2xx,
            "benchmark.http_3xx" => &self.http_3xx,
            "benchmark.http_4xx" => &self.http_4xx,
            "benchmark.http_5xx" => &self.http_5xx,
            "benchmark.http_xxx" => &self.http_xxx,
            "benchmark.stream_resets" => &self.stream_resets,
            "benchmark.pool_overflow" => &self.pool_overflow,
            "benchmark.pool_connection_failure" => &self.pool_connection_failure,
            "benchmark.total_req_sent" => &self.total_req_sent,
            "upstream_rq_total" => &self.upstream_rq_total,
            _ => return None,
        };
        Some(counter.load(Ordering::Relaxed))
    }

    /// Snapshot of every counter under its wire name.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        COUNTER_NAMES
            .iter()
            .map(|name| (name.to_string(), self.value(name).unwrap_or(0)))
            .collect()
    }

    /// Maps a response status onto its HTTP-class counter.
    pub fn classify_status(&self, status: u16) {
        let counter = match status {
            100..=199 => &self.http_1xx,
            200..=299 => &self.http_2xx,
            300..=399 => &self.http_3xx,
            400..=499 => &self.http_4xx,
            500..=599 => &self.http_5xx,
            _ => &self.http_xxx,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn count_failure(&self, failure: RequestFailure) {
        let counter = match failure {
            RequestFailure::ConnectionFailure => &self.pool_connection_failure,
            RequestFailure::Timeout | RequestFailure::StreamReset => &self.stream_resets,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// One request the generator wants sent.
pub struct RequestSpec {
    pub method: reqwest::Method,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Yields requests to send. Returning `None` means nothing to send right
/// now; the client reports that as a refused start.
pub trait RequestGenerator {
    fn generate(&mut self) -> Option<RequestSpec>;
}

/// Generator repeating one fixed request shape.
pub struct ConstantRequestGenerator {
    method: reqwest::Method,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ConstantRequestGenerator {
    /// Builds the generator from a method name, `name:value` header lines
    /// and a body size (the body is zero filled).
    pub fn new(
        method: &str,
        header_lines: &[String],
        body_size: usize,
    ) -> Result<Self, ConfigurationError> {
        let method: reqwest::Method = method
            .to_uppercase()
            .parse()
            .map_err(|_| ConfigurationError::invalid("request_method", format!("unsupported HTTP method '{}'", method)))?;
        let mut headers = HeaderMap::new();
        for line in header_lines {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                ConfigurationError::invalid(
                    "request_headers",
                    format!("header '{}' is not in 'name:value' form", line),
                )
            })?;
            let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
                ConfigurationError::invalid("request_headers", format!("bad header name: {}", e))
            })?;
            let value = HeaderValue::from_str(value.trim()).map_err(|e| {
                ConfigurationError::invalid("request_headers", format!("bad header value: {}", e))
            })?;
            headers.append(name, value);
        }
        Ok(ConstantRequestGenerator {
            method,
            headers,
            body: vec![0u8; body_size],
        })
    }
}

impl RequestGenerator for ConstantRequestGenerator {
    fn generate(&mut self) -> Option<RequestSpec> {
        Some(RequestSpec {
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }
}

/// Pool and admission settings for the client.
#[derive(Debug, Clone)]
pub struct BenchmarkClientConfig {
    pub connection_limit: u32,
    pub max_pending_requests: u32,
    pub max_active_requests: u32,
    pub max_requests_per_connection: u32,
    pub timeout: Duration,
    pub protocol: HttpProtocol,
}

impl Default for BenchmarkClientConfig {
    fn default() -> Self {
        BenchmarkClientConfig {
            connection_limit: 1,
            max_pending_requests: 1,
            max_active_requests: 1024,
            max_requests_per_connection: 0,
            timeout: Duration::from_secs(5),
            protocol: HttpProtocol::Http1,
        }
    }
}

/// The open-loop HTTP benchmark client.
pub struct BenchmarkHttpClient {
    client: reqwest::Client,
    url: reqwest::Url,
    request_generator: Box<dyn RequestGenerator>,
    connect_statistic: Rc<RefCell<Box<dyn Statistic>>>,
    response_statistic: Rc<RefCell<Box<dyn Statistic>>>,
    counters: Arc<ClientCounters>,
    config: BenchmarkClientConfig,
    requests_initiated: Rc<Cell<u64>>,
    requests_completed: Rc<Cell<u64>>,
    measure_latencies: bool,
}

impl BenchmarkHttpClient {
    pub fn new(
        config: BenchmarkClientConfig,
        url: &str,
        request_generator: Box<dyn RequestGenerator>,
        mut connect_statistic: Box<dyn Statistic>,
        mut response_statistic: Box<dyn Statistic>,
        counters: Arc<ClientCounters>,
    ) -> Result<Self, ConfigurationError> {
        connect_statistic.set_id("benchmark_http_client.queue_to_connect");
        response_statistic.set_id("benchmark_http_client.request_to_response");

        let url: reqwest::Url = url
            .parse()
            .map_err(|e| ConfigurationError::invalid("uri", format!("'{}': {}", url, e)))?;

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .pool_max_idle_per_host(config.connection_limit as usize);
        builder = match config.protocol {
            HttpProtocol::Http1 => builder.http1_only(),
            HttpProtocol::Http2 => builder.http2_prior_knowledge(),
            HttpProtocol::Http3 => {
                return Err(ConfigurationError::invalid(
                    "protocol",
                    "HTTP/3 is not supported by this build",
                ));
            }
        };
        let client = builder
            .build()
            .map_err(|e| ConfigurationError::invalid("client", e.to_string()))?;

        Ok(BenchmarkHttpClient {
            client,
            url,
            request_generator,
            connect_statistic: Rc::new(RefCell::new(connect_statistic)),
            response_statistic: Rc::new(RefCell::new(response_statistic)),
            counters,
            config,
            requests_initiated: Rc::new(Cell::new(0)),
            requests_completed: Rc::new(Cell::new(0)),
            measure_latencies: false,
        })
    }

    /// Latency recording is off during warmup and flipped on by the worker
    /// afterwards. Counters are unaffected by this flag.
    pub fn set_measure_latencies(&mut self, measure: bool) {
        self.measure_latencies = measure;
    }

    pub fn measure_latencies(&self) -> bool {
        self.measure_latencies
    }

    pub fn counters(&self) -> Arc<ClientCounters> {
        Arc::clone(&self.counters)
    }

    pub fn in_flight(&self) -> u64 {
        self.requests_initiated.get() - self.requests_completed.get()
    }

    pub fn requests_initiated(&self) -> u64 {
        self.requests_initiated.get()
    }

    pub fn requests_completed(&self) -> u64 {
        self.requests_completed.get()
    }

    /// Clones of the client's statistics, for reporting.
    pub fn statistics(&self) -> Vec<Box<dyn Statistic>> {
        vec![
            self.connect_statistic.borrow().box_clone(),
            self.response_statistic.borrow().box_clone(),
        ]
    }

    /// Attempts to start one request. Admission gates are examined in
    /// order; any refusal returns false without side effects.
    ///
    /// Must be called from within the worker's `LocalSet`.
    pub fn try_start_request(&mut self, completion: CompletionHandle) -> bool {
        let in_flight = self.in_flight();
        if in_flight >= u64::from(self.config.max_active_requests) {
            return false;
        }
        // With client-side queueing disabled the pacing is controlled here:
        // never run more requests than connections.
        if self.config.max_pending_requests == 1
            && in_flight >= u64::from(self.config.connection_limit)
        {
            return false;
        }
        let Some(spec) = self.request_generator.generate() else {
            return false;
        };

        if let Some(value) = spec.headers.get(CONTENT_LENGTH) {
            // A malformed declared length is ignored rather than sent.
            if value.to_str().ok().and_then(|v| v.parse::<u64>().ok()).is_none() {
                warn!(content_length = ?value, "Ignoring bad content length header");
            }
        }

        self.counters.total_req_sent.fetch_add(1, Ordering::Relaxed);
        self.counters
            .upstream_rq_total
            .fetch_add(1, Ordering::Relaxed);
        metrics::REQUESTS_TOTAL.inc();
        metrics::IN_FLIGHT_REQUESTS.inc();
        self.requests_initiated.set(self.requests_initiated.get() + 1);

        let request = self
            .client
            .request(spec.method, self.url.clone())
            .headers(spec.headers)
            .body(spec.body);
        let counters = Arc::clone(&self.counters);
        let connect_statistic = Rc::clone(&self.connect_statistic);
        let response_statistic = Rc::clone(&self.response_statistic);
        let requests_completed = Rc::clone(&self.requests_completed);
        let measure = self.measure_latencies;
        let dispatched_at = completion.dispatched_at();

        tokio::task::spawn_local(async move {
            let outcome = request.send().await;
            let success = match outcome {
                Ok(response) => {
                    let connected_at = Instant::now();
                    let status = response.status().as_u16();
                    counters.classify_status(status);
                    metrics::RESPONSE_STATUS_CODES
                        .with_label_values(&[metrics::status_code_label(status)])
                        .inc();

                    // Consume the body in chunks and discard it; buffering
                    // whole bodies at high rates runs the process out of
                    // memory.
                    let mut response = response;
                    let mut body_intact = true;
                    loop {
                        match response.chunk().await {
                            Ok(Some(_chunk)) => {}
                            Ok(None) => break,
                            Err(e) => {
                                counters.count_failure(RequestFailure::from_reqwest_error(&e));
                                body_intact = false;
                                break;
                            }
                        }
                    }
                    if measure {
                        let response_time = Instant::now().duration_since(dispatched_at);
                        connect_statistic
                            .borrow_mut()
                            .add_value(connected_at.duration_since(dispatched_at).as_nanos() as u64);
                        response_statistic
                            .borrow_mut()
                            .add_value(response_time.as_nanos() as u64);
                        metrics::RESPONSE_DURATION_SECONDS.observe(response_time.as_secs_f64());
                    }
                    body_intact
                }
                Err(e) => {
                    let failure = RequestFailure::from_reqwest_error(&e);
                    counters.count_failure(failure);
                    debug!(error = %e, category = %failure, "Request failed");
                    false
                }
            };
            metrics::IN_FLIGHT_REQUESTS.dec();
            requests_completed.set(requests_completed.get() + 1);
            completion.complete(success);
        });
        true
    }

    /// Warms the connection pool by running `connection_limit` lightweight
    /// requests concurrently, outside the benchmark counters.
    pub async fn prefetch_connections(&self) {
        debug!(
            connections = self.config.connection_limit,
            "Prefetching pool connections"
        );
        let mut tasks = Vec::new();
        for _ in 0..self.config.connection_limit {
            let client = self.client.clone();
            let url = self.url.clone();
            tasks.push(tokio::task::spawn_local(async move {
                let _ = client.head(url).send().await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Waits for in-flight requests to drain, abandoning whatever remains
    /// when the grace period runs out.
    pub async fn terminate(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    in_flight = self.in_flight(),
                    "Abandoning in-flight requests at termination"
                );
                break;
            }
            sleep(Duration::from_millis(1)).await;
        }
    }
}
