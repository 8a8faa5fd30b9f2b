// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the OVN load balancer reconciler.
//!
//! All metrics carry the namespace prefix `ovnlb_`.
//!
//! # Metrics Categories
//!
//! - **Sync Metrics** - Latency of full (repair) and event-driven syncs
//! - **VIP Metrics** - VIP writes and deletes per protocol
//! - **Error Metrics** - Failed syncs by error category
//! - **Queue Metrics** - Retries and dropped keys of the services controller
//!
//! # Example
//!
//! ```rust,no_run
//! use ovnlb::metrics::record_sync_latency;
//!
//! record_sync_latency("full-sync", std::time::Duration::from_millis(120));
//! ```

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "ovnlb";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Sync Metrics
// ============================================================================

/// Latency of service syncs in seconds
///
/// Labels:
/// - `sync_type`: `full-sync` (repair loop) or `event-sync` (services controller)
pub static SYNC_SERVICE_LATENCY_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_sync_service_latency_seconds"),
        "Latency of syncing services with the OVN load balancers",
    )
    .buckets(prometheus::exponential_buckets(0.001, 2.0, 15).unwrap_or_default());
    let histogram = HistogramVec::new(opts, &["sync_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// VIP Metrics
// ============================================================================

/// Total number of VIP writes and deletes
///
/// Labels:
/// - `protocol`: `TCP`, `UDP` or `SCTP`
/// - `operation`: `set` or `delete`
pub static VIP_OPERATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_vip_operations_total"),
        "Total number of load balancer VIP operations by protocol and operation",
    );
    let counter = CounterVec::new(opts, &["protocol", "operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Error Metrics
// ============================================================================

/// Total number of failed syncs
///
/// Labels:
/// - `sync_type`: `full-sync` or `event-sync`
/// - `error_type`: Error category (`not_found`, `parse_error`, `conflict`, ...)
pub static SYNC_ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_sync_errors_total"),
        "Total number of failed syncs by sync type and error category",
    );
    let counter = CounterVec::new(opts, &["sync_type", "error_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Queue Metrics
// ============================================================================

/// Total number of rate-limited requeues of service keys
pub static QUEUE_RETRIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        format!("{METRICS_NAMESPACE}_queue_retries_total"),
        "Total number of service keys requeued after a failed sync",
    )
    .unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of service keys dropped after exhausting their retries
pub static QUEUE_DROPS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        format!("{METRICS_NAMESPACE}_queue_drops_total"),
        "Total number of service keys dropped out of the queue after too many retries",
    )
    .unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record the latency of one sync
///
/// # Arguments
/// * `sync_type` - `full-sync` or `event-sync`
/// * `duration` - Wall time of the sync, failed or not
pub fn record_sync_latency(sync_type: &str, duration: Duration) {
    SYNC_SERVICE_LATENCY_SECONDS
        .with_label_values(&[sync_type])
        .observe(duration.as_secs_f64());
}

/// Record a failed sync
pub fn record_sync_error(sync_type: &str, error_type: &str) {
    SYNC_ERRORS_TOTAL
        .with_label_values(&[sync_type, error_type])
        .inc();
}

/// Record one VIP write (`set`) or removal (`delete`)
pub fn record_vip_operation(protocol: &str, operation: &str) {
    VIP_OPERATIONS_TOTAL
        .with_label_values(&[protocol, operation])
        .inc();
}

/// Record a rate-limited requeue
pub fn record_queue_retry() {
    QUEUE_RETRIES_TOTAL.inc();
}

/// Record a key dropped after too many retries
pub fn record_queue_drop() {
    QUEUE_DROPS_TOTAL.inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Returns
/// Prometheus-formatted metrics as a String
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
