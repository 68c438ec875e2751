//! # Observability
//!
//! Prometheus registry for the scrape endpoint plus the readiness report
//! types. Request counters and latency histograms are keyed by normalized
//! route and status; the cache client and rate-limit middleware feed their
//! own counters.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Metrics Registry
// ============================================================================

/// Process-wide metrics, registered once at startup.
pub struct Metrics {
    registry: Registry,
    /// Requests by normalized route, method, and status
    pub http_requests: IntCounterVec,
    /// Request latency histogram by normalized route and method
    pub http_duration: HistogramVec,
    /// Cache client hits
    pub cache_hits: IntCounter,
    /// Cache client misses
    pub cache_misses: IntCounter,
    /// Limiter blocks by bucket
    pub rate_limit_blocked: IntCounterVec,
    /// Open database pool connections
    pub db_pool_connections: IntGauge,
    /// Idle database pool connections
    pub db_pool_idle: IntGauge,
}

impl Metrics {
    /// Build and register every collector.
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("kollab_http_requests_total", "Requests by route, method, and status"),
            &["route", "method", "status"],
        )
        .expect("http_requests collector");

        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "kollab_http_request_duration_seconds",
                "Request latency by route and method",
            )
            .buckets(vec![0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["route", "method"],
        )
        .expect("http_duration collector");

        let cache_hits =
            IntCounter::new("kollab_cache_hits_total", "Cache client hits").expect("cache_hits");
        let cache_misses = IntCounter::new("kollab_cache_misses_total", "Cache client misses")
            .expect("cache_misses");

        let rate_limit_blocked = IntCounterVec::new(
            Opts::new("kollab_rate_limit_blocked_total", "Limiter blocks by bucket"),
            &["bucket"],
        )
        .expect("rate_limit_blocked collector");

        let db_pool_connections = IntGauge::new(
            "kollab_db_pool_connections",
            "Open database pool connections",
        )
        .expect("db_pool_connections");
        let db_pool_idle =
            IntGauge::new("kollab_db_pool_idle", "Idle database pool connections")
                .expect("db_pool_idle");

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(http_requests.clone()),
            Box::new(http_duration.clone()),
            Box::new(cache_hits.clone()),
            Box::new(cache_misses.clone()),
            Box::new(rate_limit_blocked.clone()),
            Box::new(db_pool_connections.clone()),
            Box::new(db_pool_idle.clone()),
        ];
        for collector in collectors {
            registry.register(collector).expect("collector registration");
        }

        Self {
            registry,
            http_requests,
            http_duration,
            cache_hits,
            cache_misses,
            rate_limit_blocked,
            db_pool_connections,
            db_pool_idle,
        }
    }

    /// Record one completed request.
    pub fn observe_request(&self, route: &str, method: &str, status: u16, duration: Duration) {
        self.http_requests
            .with_label_values(&[route, method, &status.to_string()])
            .inc();
        self.http_duration
            .with_label_values(&[route, method])
            .observe(duration.as_secs_f64());
    }

    /// Record a limiter block.
    pub fn record_block(&self, bucket: &str) {
        self.rate_limit_blocked.with_label_values(&[bucket]).inc();
    }

    /// Update pool gauges ahead of a scrape.
    pub fn set_pool_gauges(&self, open: u32, idle: usize) {
        self.db_pool_connections.set(i64::from(open));
        self.db_pool_idle.set(idle as i64);
    }

    /// Render the text exposition.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %err, "metrics encoding failed");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Readiness Report
// ============================================================================

/// Dependency health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Dependency reachable
    Healthy,
    /// Dependency unreachable
    Unhealthy,
}

/// One dependency check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    /// Check outcome
    pub status: HealthStatus,
    /// Probe latency when reachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Failure description when unreachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    /// Reachable with the probe latency.
    pub fn healthy(latency: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms: Some(latency.as_millis() as u64),
            message: None,
        }
    }

    /// Unreachable with a description.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }

    /// Whether the dependency is reachable.
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_series() {
        let metrics = Metrics::new();
        metrics.observe_request("/api/workspaces/:id/documents", "GET", 200, Duration::from_millis(12));
        metrics.record_block("auth");
        metrics.set_pool_gauges(8, 3);

        let exposition = metrics.render();
        assert!(exposition.contains("kollab_http_requests_total"));
        assert!(exposition.contains("kollab_rate_limit_blocked_total"));
        assert!(exposition.contains("kollab_db_pool_connections 8"));
    }

    #[test]
    fn test_component_health_shapes() {
        let healthy = ComponentHealth::healthy(Duration::from_millis(3));
        assert!(healthy.is_healthy());
        assert_eq!(healthy.latency_ms, Some(3));

        let down = ComponentHealth::unhealthy("connection refused");
        assert!(!down.is_healthy());
        assert!(down.latency_ms.is_none());
    }
}
