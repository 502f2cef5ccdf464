use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounter, IntCounterVec, IntGauge,
};

// Prometheus metrics (default registry)
pub static OPERATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "orchestrator_operations_total",
        "Operations processed, by action and final status",
        &["action", "status"]
    )
    .expect("register operations_total")
});

pub static OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "orchestrator_operation_duration_seconds",
        "Time from operation start to terminal status",
        &["action"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("register operation_duration")
});

pub static SERIALIZATION_VIOLATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "orchestrator_serialization_violations_total",
        "Operations that started while another operation on the same resource was running"
    )
    .expect("register serialization_violations_total")
});

pub static QUEUED_OPERATIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "orchestrator_queued_operations",
        "Operations accepted but not yet finished"
    )
    .expect("register queued_operations")
});
