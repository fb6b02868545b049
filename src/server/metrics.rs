use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all job metrics
const PREFIX: &str = "harvest_jobs";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Job execution metrics
    pub static ref JOB_EXECUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_executions_total"), "Total job executions by function and outcome"),
        &["function_id", "outcome"]
    ).expect("Failed to create executions_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_duration_seconds"),
            "Job execution duration in seconds"
        )
        .buckets(vec![0.1, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 3600.0]),
        &["function_id"]
    ).expect("Failed to create duration_seconds metric");

    // Queue metrics
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        format!("{PREFIX}_queue_depth"),
        "Number of entries in the execution queue, including the running one"
    ).expect("Failed to create queue_depth metric");

    pub static ref JOB_RUNNING: IntGauge = IntGauge::new(
        format!("{PREFIX}_running"),
        "1 while a job is executing"
    ).expect("Failed to create running metric");

    // Scheduler metrics
    pub static ref SCHEDULER_TICKS_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_scheduler_ticks_total"),
        "Total minute scheduler ticks"
    ).expect("Failed to create scheduler_ticks_total metric");

    pub static ref TEMPLATES_TRIGGERED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_templates_triggered_total"), "Total template invocations by trigger"),
        &["trigger"]
    ).expect("Failed to create templates_triggered_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(SCHEDULER_TICKS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TEMPLATES_TRIGGERED_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record a finished job execution
pub fn record_job_execution(function_id: &str, outcome: &str, duration: Duration) {
    JOB_EXECUTIONS_TOTAL
        .with_label_values(&[function_id, outcome])
        .inc();

    JOB_DURATION_SECONDS
        .with_label_values(&[function_id])
        .observe(duration.as_secs_f64());
}

pub fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as i64);
}

pub fn set_job_running(running: bool) {
    JOB_RUNNING.set(running as i64);
}

pub fn record_scheduler_tick() {
    SCHEDULER_TICKS_TOTAL.inc();
}

/// `trigger` is "schedule" or "rest".
pub fn record_template_triggered(trigger: &str) {
    TEMPLATES_TRIGGERED_TOTAL.with_label_values(&[trigger]).inc();
}

/// Handler for /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
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
