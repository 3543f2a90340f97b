//! Prometheus metrics for integration-hub
//!
//! Observability for sync jobs, retries, resource caches and credential refreshes.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    /// Histogram: sync job duration per service and resource type (seconds)
    pub static ref SYNC_DURATION: HistogramVec = register_histogram_vec!(
        "integration_hub_sync_duration_seconds",
        "Duration of sync jobs",
        &["service", "resource_type"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]
    )
    .expect("Failed to create sync_duration metric");

    /// Counter: finished sync jobs by outcome
    pub static ref SYNC_JOBS: CounterVec = register_counter_vec!(
        "integration_hub_sync_jobs_total",
        "Total sync jobs by service and status",
        &["service", "status"]
    )
    .expect("Failed to create sync_jobs metric");

    /// Gauge: jobs currently tracked by the registry
    pub static ref ACTIVE_JOBS: Gauge = register_gauge!(
        "integration_hub_active_jobs",
        "Number of sync jobs currently in flight"
    )
    .expect("Failed to create active_jobs metric");

    /// Counter: integration errors by kind
    pub static ref INTEGRATION_ERRORS: CounterVec = register_counter_vec!(
        "integration_hub_errors_total",
        "Total integration errors by kind",
        &["kind", "service"]
    )
    .expect("Failed to create errors metric");

    /// Counter: retry attempts per operation
    pub static ref RETRY_ATTEMPTS: CounterVec = register_counter_vec!(
        "integration_hub_retry_attempts_total",
        "Retries scheduled after a transient failure",
        &["operation"]
    )
    .expect("Failed to create retry_attempts metric");

    /// Counter: resource cache operations (hit/miss)
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec!(
        "integration_hub_cache_operations_total",
        "Resource cache operations by type",
        &["operation"]
    )
    .expect("Failed to create cache_operations metric");

    /// Counter: OAuth refreshes by outcome
    pub static ref CREDENTIAL_REFRESHES: CounterVec = register_counter_vec!(
        "integration_hub_credential_refreshes_total",
        "OAuth token refreshes by service and outcome",
        &["service", "outcome"]
    )
    .expect("Failed to create credential_refreshes metric");
}

/// Record a finished sync job
pub fn record_sync_job(service: &str, resource_type: &str, status: &str, duration_secs: f64) {
    SYNC_DURATION
        .with_label_values(&[service, resource_type])
        .observe(duration_secs);
    SYNC_JOBS.with_label_values(&[service, status]).inc();
}

/// Set the number of active jobs
pub fn set_active_jobs(count: usize) {
    ACTIVE_JOBS.set(count as f64);
}

/// Increment the error counter
pub fn record_error(kind: &str, service: &str) {
    INTEGRATION_ERRORS.with_label_values(&[kind, service]).inc();
}

/// Increment the retry counter
pub fn record_retry(operation: &str) {
    RETRY_ATTEMPTS.with_label_values(&[operation]).inc();
}

/// Record cache hit
pub fn record_cache_hit() {
    CACHE_OPERATIONS.with_label_values(&["hit"]).inc();
}

/// Record cache miss
pub fn record_cache_miss() {
    CACHE_OPERATIONS.with_label_values(&["miss"]).inc();
}

/// Record an OAuth refresh attempt
pub fn record_credential_refresh(service: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    CREDENTIAL_REFRESHES
        .with_label_values(&[service, outcome])
        .inc();
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
