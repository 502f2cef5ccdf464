use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec, IntCounter,
    IntCounterVec, TextEncoder,
};
use tracing::warn;

pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "perf_requests_total",
        "Requests sent to the resource API",
        &["method", "outcome"]
    )
    .expect("register perf_requests_total")
});

pub static RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("perf_retries_total", "Retried requests").expect("register perf_retries_total")
});

pub static OPERATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "perf_operation_duration_seconds",
        "Time from submitting a request to its operation finishing",
        &["scenario"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
    )
    .expect("register perf_operation_duration_seconds")
});

pub static SCENARIO_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "perf_scenario_task_failures_total",
        "Scenario tasks that ended in an error",
        &["scenario"]
    )
    .expect("register perf_scenario_task_failures_total")
});

/// Encode the default registry in the prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "metrics encode error");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
