//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Pipeline loads and offline queue reconciliation
//! - Check-ins
//! - Credential verification
//! - Cache eviction

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Pipelines
// =============================================================================

/// Pipeline loads by result.
pub static PIPELINE_LOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gatehouse_pipeline_loads_total", "Total pipeline loads"),
        &["result"], // "success", "failure", "skipped"
    )
    .unwrap()
});

/// Pipeline load duration in seconds.
pub static PIPELINE_LOAD_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "gatehouse_pipeline_load_duration_seconds",
            "Duration of pipeline loads",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .unwrap()
});

/// Offline check-in reconciliation outcomes.
pub static OFFLINE_CHECKINS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gatehouse_offline_checkins_total",
            "Offline check-in reconciliation attempts",
        ),
        &["result"], // "checked_in", "already_checked_in", "failed"
    )
    .unwrap()
});

// =============================================================================
// Check-ins
// =============================================================================

/// Check-in actions by outcome.
pub static CHECKINS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gatehouse_checkins_total", "Total check-in actions"),
        &["result"],
    )
    .unwrap()
});

// =============================================================================
// Credentials
// =============================================================================

/// Completed verifications by outcome.
pub static CREDENTIAL_VERIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gatehouse_credential_verifications_total",
            "Total credential verifications",
        ),
        &["outcome"], // "valid" or a VerificationError reason
    )
    .unwrap()
});

/// Verifications answered from an in-flight or memoized result.
pub static CREDENTIAL_SINGLE_FLIGHT_HITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "gatehouse_credential_single_flight_hits_total",
        "Verifications served by an existing result",
    )
    .unwrap()
});

// =============================================================================
// Cache
// =============================================================================

/// Cache entries removed by eviction.
pub static CACHE_EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "gatehouse_cache_evictions_total",
        "Total cache entries evicted",
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Pipelines
        Box::new(PIPELINE_LOADS.clone()),
        Box::new(PIPELINE_LOAD_DURATION.clone()),
        Box::new(OFFLINE_CHECKINS.clone()),
        // Check-ins
        Box::new(CHECKINS.clone()),
        // Credentials
        Box::new(CREDENTIAL_VERIFICATIONS.clone()),
        Box::new(CREDENTIAL_SINGLE_FLIGHT_HITS.clone()),
        // Cache
        Box::new(CACHE_EVICTIONS.clone()),
    ]
}
