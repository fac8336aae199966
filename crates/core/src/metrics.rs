//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Job lifecycle (submissions, cancels)
//! - Retry coordination (attempts, retries, capacity rejections)
//! - Batches and the concurrency gate

use once_cell::sync::Lazy;
use prometheus::{Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Job Lifecycle Metrics
// =============================================================================

/// Jobs accepted by the provider.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("reelsmith_jobs_submitted_total", "Total jobs submitted").unwrap()
});

/// Remote cancel requests by result.
pub static CANCELS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelsmith_cancels_total", "Total remote cancel requests"),
        &["result"], // "ok", "failed"
    )
    .unwrap()
});

// =============================================================================
// Retry Metrics
// =============================================================================

/// Attempts by outcome.
pub static ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reelsmith_attempts_total", "Total job attempts"),
        &["outcome"], // "success", "retryable", "fatal", "capacity"
    )
    .unwrap()
});

/// Retries scheduled.
pub static RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("reelsmith_retries_total", "Total retries scheduled").unwrap()
});

/// Jobs the provider refused because its queue was full.
pub static CAPACITY_REJECTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "reelsmith_capacity_rejections_total",
        "Total submissions rejected for lack of provider capacity",
    )
    .unwrap()
});

/// End-to-end generation time per request, retries included.
pub static GENERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "reelsmith_generation_duration_seconds",
            "Duration of generation including retries",
        )
        .buckets(vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0]),
        &["result"], // "success", "failed"
    )
    .unwrap()
});

// =============================================================================
// Batch and Gate Metrics
// =============================================================================

/// Success rate of the most recent batch.
pub static BATCH_SUCCESS_RATE: Lazy<Gauge> = Lazy::new(|| {
    Gauge::new(
        "reelsmith_batch_success_rate",
        "Success rate of the most recent batch",
    )
    .unwrap()
});

/// Permits currently held on concurrency gates.
pub static GATE_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reelsmith_gate_in_flight",
        "Jobs currently holding a concurrency permit",
    )
    .unwrap()
});

/// All metrics in this module, for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Lifecycle
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(CANCELS.clone()),
        // Retries
        Box::new(ATTEMPTS.clone()),
        Box::new(RETRIES.clone()),
        Box::new(CAPACITY_REJECTIONS.clone()),
        Box::new(GENERATION_DURATION.clone()),
        // Batch and gate
        Box::new(BATCH_SUCCESS_RATE.clone()),
        Box::new(GATE_IN_FLIGHT.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        ATTEMPTS.with_label_values(&["success"]).inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "reelsmith_attempts_total"));
    }
}
