use std::env;
use std::sync::{Arc, Mutex};

use mimalloc::MiMalloc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nighthawk::adaptive_load::{
    perform_adaptive_load_session, AdaptiveLoadSessionSpec, LocalProcessRunner,
};
use nighthawk::metrics;
use nighthawk::options::{Concurrency, LoadOptions};
use nighthawk::process::Process;
use nighthawk::utils::parse_duration_string;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Assembles load options from the environment; every knob is an
/// environment variable so container entrypoints stay trivial.
fn options_from_env() -> LoadOptions {
    let uri = env::var("TARGET_URL").expect("TARGET_URL environment variable must be set");

    let mut options = LoadOptions {
        uri,
        ..LoadOptions::default()
    };

    if let Ok(value) = env::var("RPS") {
        options.requests_per_second = value.parse().expect("RPS must be a valid number");
    }
    if let Ok(value) = env::var("CONNECTIONS") {
        options.connections = value.parse().expect("CONNECTIONS must be a valid number");
    }
    if let Ok(value) = env::var("DURATION") {
        options.duration = parse_duration_string(&value)
            .unwrap_or_else(|e| panic!("Invalid DURATION '{}': {}", value, e));
    }
    if let Ok(value) = env::var("TIMEOUT") {
        options.timeout = parse_duration_string(&value)
            .unwrap_or_else(|e| panic!("Invalid TIMEOUT '{}': {}", value, e));
    }
    if let Ok(value) = env::var("PROTOCOL") {
        options.protocol = serde_yaml::from_str(&value).expect("Invalid PROTOCOL");
    }
    if let Ok(value) = env::var("CONCURRENCY") {
        options.concurrency = if value.eq_ignore_ascii_case("auto") {
            Concurrency::Auto
        } else {
            Concurrency::Fixed(value.parse().expect("CONCURRENCY must be a number or 'auto'"))
        };
    }
    if let Ok(value) = env::var("BURST_SIZE") {
        options.burst_size = value.parse().expect("BURST_SIZE must be a valid number");
    }
    if let Ok(value) = env::var("PREFETCH_CONNECTIONS") {
        options.prefetch_connections = value.parse().expect("PREFETCH_CONNECTIONS must be a bool");
    }
    if let Ok(value) = env::var("OPEN_LOOP") {
        options.open_loop = value.parse().expect("OPEN_LOOP must be a bool");
    }
    if let Ok(value) = env::var("MAX_PENDING_REQUESTS") {
        options.max_pending_requests = value.parse().expect("MAX_PENDING_REQUESTS must be a number");
    }
    if let Ok(value) = env::var("MAX_ACTIVE_REQUESTS") {
        options.max_active_requests = value.parse().expect("MAX_ACTIVE_REQUESTS must be a number");
    }
    if let Ok(value) = env::var("REQUEST_METHOD") {
        options.request_method = value;
    }
    if let Ok(value) = env::var("REQUEST_BODY_SIZE") {
        options.request_body_size = value.parse().expect("REQUEST_BODY_SIZE must be a number");
    }
    if let Ok(value) = env::var("IDLE_STRATEGY") {
        options.sequencer_idle_strategy =
            serde_yaml::from_str(&value).expect("Invalid IDLE_STRATEGY (spin, poll or sleep)");
    }
    if let Ok(value) = env::var("JITTER_UNIFORM") {
        options.jitter_uniform = parse_duration_string(&value)
            .unwrap_or_else(|e| panic!("Invalid JITTER_UNIFORM '{}': {}", value, e));
    }
    options
}

async fn run_adaptive_session(spec_path: &str) -> i32 {
    let spec_text = std::fs::read_to_string(spec_path)
        .unwrap_or_else(|e| panic!("Failed to read '{}': {}", spec_path, e));
    let spec: AdaptiveLoadSessionSpec = serde_yaml::from_str(&spec_text)
        .unwrap_or_else(|e| panic!("Failed to parse '{}': {}", spec_path, e));

    let output = tokio::task::spawn_blocking(move || {
        let mut runner = LocalProcessRunner;
        perform_adaptive_load_session(&mut runner, &spec)
    })
    .await
    .expect("adaptive session task panicked");

    println!(
        "{}",
        serde_json::to_string_pretty(&output).expect("output serializes")
    );
    if output.session_status.code == nighthawk::adaptive_load::StatusCode::Ok {
        0
    } else {
        1
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging();
    metrics::register_metrics()?;

    if let Ok(port) = env::var("METRICS_PORT") {
        let port: u16 = port.parse().expect("METRICS_PORT must be a valid port");
        let registry = Arc::new(Mutex::new(prometheus::default_registry().clone()));
        tokio::spawn(metrics::start_metrics_server(port, registry));
    }

    // Adaptive session mode: a YAML session spec drives everything.
    if let Ok(spec_path) = env::var("ADAPTIVE_SESSION_SPEC") {
        let code = run_adaptive_session(&spec_path).await;
        std::process::exit(code);
    }

    let options = options_from_env();
    let process = Process::new(options)?;
    let cancellation = process.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested; workers will stop at their next pulse");
            cancellation.cancel();
        }
    });

    let output = tokio::task::spawn_blocking(move || process.execute()).await??;

    let yaml = env::var("OUTPUT_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("yaml"))
        .unwrap_or(false);
    if yaml {
        println!("{}", output.to_yaml_string());
    } else {
        println!("{}", output.to_json_string());
    }

    if output.run_failed() {
        info!("Run failed: sequencer.failed_terminations is nonzero");
        std::process::exit(1);
    }
    Ok(())
}
