// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the serving certificate controllers.
//!
//! Every metric carries the namespace prefix `serving_cert_controller_`.
//!
//! # Metrics Categories
//!
//! - **Sync Metrics** - Outcomes and duration of work queue syncs per controller
//! - **Queue Metrics** - Requeues and pending keys per controller
//! - **Certificate Metrics** - Certificates issued and generation failures
//!
//! # Example
//!
//! ```rust,no_run
//! use serving_cert_controller::metrics::{gather_metrics, record_sync_success};
//!
//! record_sync_success("serving-cert", std::time::Duration::from_millis(12));
//! let text = gather_metrics().unwrap();
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "serving_cert_controller";

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

/// Total number of syncs by controller and status
///
/// Labels:
/// - `controller`: Controller name (`serving-cert`, `serving-cert-rotation`)
/// - `status`: Outcome (`success`, `error`)
pub static SYNCS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_syncs_total"),
        "Total number of work queue syncs by controller and status",
    );
    let counter = CounterVec::new(opts, &["controller", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of syncs in seconds
///
/// Labels:
/// - `controller`: Controller name
pub static SYNC_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_sync_duration_seconds"),
        "Duration of work queue syncs in seconds by controller",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]);
    let histogram = HistogramVec::new(opts, &["controller"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Queue Metrics
// ============================================================================

/// Total number of keys put back on a queue
///
/// Labels:
/// - `controller`: Controller name
/// - `reason`: Why the key was requeued (`rate_limited`, `resync`)
pub static REQUEUES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_requeues_total"),
        "Total number of requeued keys by controller and reason",
    );
    let counter = CounterVec::new(opts, &["controller", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Keys waiting for a worker
///
/// Labels:
/// - `controller`: Controller name
pub static WORKQUEUE_DEPTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_workqueue_depth"),
        "Number of keys waiting for a worker by controller",
    );
    let gauge = GaugeVec::new(opts, &["controller"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Certificate Metrics
// ============================================================================

/// Total number of serving certificates written to Secrets
///
/// Labels:
/// - `controller`: `serving-cert` for new Secrets, `serving-cert-rotation` for rotations
pub static CERTIFICATES_ISSUED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_certificates_issued_total"),
        "Total number of serving certificates written by controller",
    );
    let counter = CounterVec::new(opts, &["controller"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of failures recorded on Services
///
/// Labels:
/// - `reason`: Failure category (`api`, `signing`, `conflict`)
pub static GENERATION_FAILURES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_generation_failures_total"),
        "Total number of certificate generation failures recorded on Services by reason",
    );
    let counter = CounterVec::new(opts, &["reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful sync
///
/// # Arguments
/// * `controller` - Name of the controller that ran the sync
/// * `duration` - Duration of the sync
pub fn record_sync_success(controller: &str, duration: Duration) {
    SYNCS_TOTAL
        .with_label_values(&[controller, "success"])
        .inc();
    SYNC_DURATION_SECONDS
        .with_label_values(&[controller])
        .observe(duration.as_secs_f64());
}

/// Record a failed sync
///
/// The key is about to be requeued with backoff, so this also counts a `rate_limited`
/// requeue.
pub fn record_sync_error(controller: &str, duration: Duration) {
    SYNCS_TOTAL.with_label_values(&[controller, "error"]).inc();
    SYNC_DURATION_SECONDS
        .with_label_values(&[controller])
        .observe(duration.as_secs_f64());
    REQUEUES_TOTAL
        .with_label_values(&[controller, "rate_limited"])
        .inc();
}

/// Record keys enqueued by a periodic resync
pub fn record_resync(controller: &str, keys: usize) {
    #[allow(clippy::cast_precision_loss)]
    REQUEUES_TOTAL
        .with_label_values(&[controller, "resync"])
        .inc_by(keys as f64);
}

/// Set the current queue depth of a controller
pub fn set_workqueue_depth(controller: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    WORKQUEUE_DEPTH
        .with_label_values(&[controller])
        .set(depth as f64);
}

/// Record a certificate written to a Secret
pub fn record_certificate_issued(controller: &str) {
    CERTIFICATES_ISSUED_TOTAL
        .with_label_values(&[controller])
        .inc();
}

/// Record a generation failure written to a Service's error annotations
pub fn record_generation_failure(reason: &str) {
    GENERATION_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

/// Gather and encode all metrics in Prometheus text format
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

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
