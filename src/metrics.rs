//! Process-level Prometheus metrics and the scrape endpoint.
//!
//! These mirror the per-run benchmark counters for live observation while a
//! run is in progress; the authoritative per-run numbers are the merged
//! counters in the output record.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Gauge, Histogram, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref REQUESTS_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of HTTP requests sent")
                .namespace("nighthawk")
        ).unwrap();

    pub static ref RESPONSE_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("responses_status_codes_total", "Number of responses by status code")
                .namespace("nighthawk"),
            &["status_code"]
        ).unwrap();

    pub static ref IN_FLIGHT_REQUESTS: Gauge =
        Gauge::with_opts(
            Opts::new("in_flight_requests", "Requests currently in flight")
                .namespace("nighthawk")
        ).unwrap();

    pub static ref RESPONSE_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "response_duration_seconds",
                "Request-to-response latencies in seconds."
            ).namespace("nighthawk")
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    prometheus::default_registry().register(Box::new(REQUESTS_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(RESPONSE_STATUS_CODES.clone()))?;
    prometheus::default_registry().register(Box::new(IN_FLIGHT_REQUESTS.clone()))?;
    prometheus::default_registry().register(Box::new(RESPONSE_DURATION_SECONDS.clone()))?;
    Ok(())
}

/// Returns a static string label for common HTTP status codes.
///
/// Avoids a heap `String` allocation on every response in the hot path.
/// Uncommon codes fall back to "other" rather than allocating a unique
/// label per code.
pub fn status_code_label(code: u16) -> &'static str {
    match code {
        100 => "100",
        200 => "200",
        201 => "201",
        204 => "204",
        301 => "301",
        302 => "302",
        304 => "304",
        400 => "400",
        401 => "401",
        403 => "403",
        404 => "404",
        405 => "405",
        408 => "408",
        409 => "409",
        422 => "422",
        429 => "429",
        499 => "499",
        500 => "500",
        502 => "502",
        503 => "503",
        504 => "504",
        _ => "other",
    }
}

/// HTTP handler for the scrape endpoint.
///
/// Only `GET /metrics` is served; everything else gets a 404 so the scrape
/// port cannot be mistaken for the benchmark target while a run is live.
pub async fn metrics_handler(
    req: Request<Body>,
    registry: Arc<Mutex<Registry>>,
) -> Result<Response<Body>, hyper::Error> {
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("try GET /metrics\n"))
            .expect("static response builds"));
    }

    let encoder = TextEncoder::new();
    let metric_families = registry.lock().unwrap().gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return Ok(Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::empty())
            .expect("static response builds"));
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(Body::from(buffer))
        .expect("encoded response builds"))
}

/// Starts the Prometheus scrape server on the given port.
pub async fn start_metrics_server(port: u16, registry: Arc<Mutex<Registry>>) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    let service = make_service_fn(move |_conn| {
        let registry = Arc::clone(&registry);
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                metrics_handler(req, Arc::clone(&registry))
            }))
        }
    });

    info!(port = port, "Serving scrape endpoint at /metrics");
    if let Err(e) = Server::bind(&addr).serve(service).await {
        error!(error = %e, "Metrics server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_are_static() {
        assert_eq!(status_code_label(200), "200");
        assert_eq!(status_code_label(503), "503");
        assert_eq!(status_code_label(601), "other");
    }

    #[test]
    fn counters_increment() {
        let before = REQUESTS_TOTAL.get();
        REQUESTS_TOTAL.inc();
        assert_eq!(REQUESTS_TOTAL.get(), before + 1);
    }

    #[tokio::test]
    async fn handler_serves_only_the_metrics_path() {
        let registry = Arc::new(Mutex::new(Registry::new()));

        let request = Request::builder()
            .method(Method::GET)
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = metrics_handler(request, Arc::clone(&registry)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .method(Method::GET)
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = metrics_handler(request, Arc::clone(&registry)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = metrics_handler(request, registry).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
