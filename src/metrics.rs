use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub outcome: Outcome,
}

/// How a proxied request was answered.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    /// Served from the local cache.
    Hit,
    /// Fetched from origin with a 2xx answer.
    Miss,
    /// Origin answered non-2xx; relayed without caching.
    Relayed,
    /// Origin could not be reached; answered 404.
    Unreachable,
    /// Malformed or traversing path; answered 400.
    Rejected,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the mirror.
pub struct Metrics {
    pub requests_total: Family<RequestLabels, Counter>,
    pub origin_fetch_duration_seconds: Histogram,
    pub cache_write_failures: Counter,
    pub cache_bytes_written: Counter,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "lazymirror_requests",
            "Asset requests by outcome",
            requests_total.clone(),
        );

        let origin_fetch_duration_seconds = Histogram::new(exponential_buckets(0.005, 2.0, 14));
        registry.register(
            "lazymirror_origin_fetch_duration_seconds",
            "Origin fetch latency in seconds, body included",
            origin_fetch_duration_seconds.clone(),
        );

        let cache_write_failures = Counter::default();
        registry.register(
            "lazymirror_cache_write_failures",
            "Fetched assets that could not be written to the cache",
            cache_write_failures.clone(),
        );

        let cache_bytes_written = Counter::default();
        registry.register(
            "lazymirror_cache_bytes_written",
            "Bytes written to the local cache",
            cache_bytes_written.clone(),
        );

        Self {
            requests_total,
            origin_fetch_duration_seconds,
            cache_write_failures,
            cache_bytes_written,
        }
    }

    pub fn record(&self, outcome: Outcome) {
        self.requests_total
            .get_or_create(&RequestLabels { outcome })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`crate::AppState`].
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_recorded_outcomes() {
        let registry = MetricsRegistry::new();
        registry.metrics.record(Outcome::Hit);
        registry.metrics.record(Outcome::Hit);
        registry.metrics.record(Outcome::Unreachable);

        let text = registry.encode().unwrap();

        assert!(text.contains(r#"lazymirror_requests_total{outcome="Hit"} 2"#));
        assert!(text.contains(r#"lazymirror_requests_total{outcome="Unreachable"} 1"#));
    }
}
