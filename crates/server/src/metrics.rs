//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the gatehouse server:
//! - HTTP request metrics (latency, counts, errors)
//! - Authentication failures on the operator surface
//! - Pipeline slot states (collected dynamically)
//!
//! Pipeline, check-in, credential and cache metrics live in
//! `gatehouse_core::metrics` and are registered here as well.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;

use gatehouse_core::SlotState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "gatehouse_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gatehouse_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "gatehouse_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Authentication failures.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gatehouse_auth_failures_total",
            "Total authentication failures",
        ),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// Pipeline Metrics (collected dynamically)
// =============================================================================

/// Pipeline slots by state.
pub static PIPELINE_SLOTS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("gatehouse_pipeline_slots", "Pipeline slots by state"),
        &["state"],
    )
    .unwrap()
});

/// Tickets currently loaded across running pipelines.
pub static TICKETS_LOADED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "gatehouse_tickets_loaded",
        "Tickets currently loaded across running pipelines",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();

    // Pipelines
    registry.register(Box::new(PIPELINE_SLOTS.clone())).unwrap();
    registry.register(Box::new(TICKETS_LOADED.clone())).unwrap();

    // Core metrics (loads, check-ins, credentials, cache)
    for metric in gatehouse_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

const SLOT_STATES: [(SlotState, &str); 6] = [
    (SlotState::Stopped, "stopped"),
    (SlotState::Starting, "starting"),
    (SlotState::Running, "running"),
    (SlotState::Reloading, "reloading"),
    (SlotState::Stopping, "stopping"),
    (SlotState::Failed, "failed"),
];

/// Collect dynamic metrics from current application state.
///
/// This is called before encoding metrics to update gauges with current
/// slot and instance values.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let scheduler = state.service().scheduler();

    let definitions = match scheduler.list_definitions() {
        Ok(definitions) => definitions,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list pipelines for metrics");
            return;
        }
    };

    let mut counts = [0i64; SLOT_STATES.len()];
    for definition in &definitions {
        if let Some(status) = scheduler.slot_status(&definition.id).await {
            if let Some(i) = SLOT_STATES.iter().position(|(s, _)| *s == status.state) {
                counts[i] += 1;
            }
        }
    }
    for ((_, label), count) in SLOT_STATES.iter().zip(counts) {
        PIPELINE_SLOTS.with_label_values(&[label]).set(count);
    }

    let mut loaded = 0usize;
    for instance in scheduler.get_all_instances().await {
        loaded += instance.tickets().await.len();
    }
    TICKETS_LOADED.set(loaded as i64);
}

static UUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static ROOT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9a-fA-F]{64}").unwrap());
static NUMERIC_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_PATTERN.replace_all(path, "{id}");
    let result = ROOT_PATTERN.replace_all(&result, "{root}");
    let result = NUMERIC_PATTERN.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/pipelines/550e8400-e29b-41d4-a716-446655440000/info";
        assert_eq!(normalize_path(path), "/api/v1/pipelines/{id}/info");
    }

    #[test]
    fn test_normalize_path_root() {
        let root = "ab".repeat(32);
        let path = format!("/api/v1/semaphore/p/g/{}", root);
        assert_eq!(normalize_path(&path), "/api/v1/semaphore/p/g/{root}");
    }

    #[test]
    fn test_normalize_path_numeric_middle() {
        let path = "/api/v1/pipelines/42/offline/7";
        assert_eq!(normalize_path(path), "/api/v1/pipelines/{id}/offline/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        let path = "/api/v1/health";
        assert_eq!(normalize_path(path), "/api/v1/health");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        PIPELINE_SLOTS.with_label_values(&["running"]).set(0);

        let output = encode_metrics();
        assert!(output.contains("gatehouse_http_requests_total"));
        assert!(output.contains("gatehouse_pipeline_slots"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
