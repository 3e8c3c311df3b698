use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all notifier metrics
const PREFIX: &str = "jobboard_notifier";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Newsletter ticks
    pub static ref NEWSLETTER_TICKS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_newsletter_ticks_total"), "Newsletter ticks by outcome"),
        &["outcome"]
    ).expect("Failed to create newsletter_ticks_total metric");

    pub static ref NEWSLETTER_TICK_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_newsletter_tick_duration_seconds"),
            "Newsletter tick duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 600.0])
    ).expect("Failed to create newsletter_tick_duration_seconds metric");

    pub static ref NEWSLETTER_LAST_SUCCESS_TIMESTAMP: Gauge = Gauge::new(
        format!("{PREFIX}_newsletter_last_success_timestamp"),
        "Unix timestamp of the last committed newsletter tick"
    ).expect("Failed to create newsletter_last_success_timestamp metric");

    // Dispatch
    pub static ref DISPATCHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_dispatches_total"), "Notification dispatch attempts"),
        &["gateway", "outcome"]
    ).expect("Failed to create dispatches_total metric");

    pub static ref DISPATCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_dispatch_duration_seconds"),
            "Gateway send duration in seconds"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["gateway"]
    ).expect("Failed to create dispatch_duration_seconds metric");

    pub static ref LEDGER_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ledger_errors_total"), "Ledger read/write failures"),
        &["operation"]
    ).expect("Failed to create ledger_errors_total metric");

    // Background jobs
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 1.0, 10.0, 60.0, 300.0, 900.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    // Admin HTTP
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Admin HTTP requests"),
        &["method", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "Admin HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0])
    ).expect("Failed to create http_request_duration_seconds metric");

    // Process
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (tests call this repeatedly)
    let _ = REGISTRY.register(Box::new(NEWSLETTER_TICKS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(NEWSLETTER_TICK_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(NEWSLETTER_LAST_SUCCESS_TIMESTAMP.clone()));
    let _ = REGISTRY.register(Box::new(DISPATCHES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DISPATCH_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(LEDGER_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record the end of a newsletter tick. `outcome` is "committed" or the
/// abort reason.
pub fn record_newsletter_tick(outcome: &str, duration: Duration) {
    NEWSLETTER_TICKS_TOTAL.with_label_values(&[outcome]).inc();
    NEWSLETTER_TICK_DURATION_SECONDS.observe(duration.as_secs_f64());
    if outcome == "committed" {
        NEWSLETTER_LAST_SUCCESS_TIMESTAMP.set(chrono::Utc::now().timestamp() as f64);
    }
}

pub fn record_dispatch(gateway: &str, outcome: &str, duration: Duration) {
    DISPATCHES_TOTAL
        .with_label_values(&[gateway, outcome])
        .inc();
    DISPATCH_DURATION_SECONDS
        .with_label_values(&[gateway])
        .observe(duration.as_secs_f64());
}

pub fn record_ledger_error(operation: &str) {
    LEDGER_ERRORS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_http_request(method: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // Reported in kB
                    if let Some(kb) = line
                        .split_whitespace()
                        .nth(1)
                        .and_then(|s| s.parse::<f64>().ok())
                    {
                        PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                        return;
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
