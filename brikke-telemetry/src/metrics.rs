//! ## brikke-telemetry::metrics
//! **Prometheus exporter for identity allocation traffic**
//!
//! ### Expectations:
//! - Counters for allocation/release throughput
//! - Gauge tracking the live identity population
//! - Histogram over change-propagation latency (nanoseconds)

use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: prometheus::Registry,
    pub allocations: prometheus::Counter,
    pub releases: prometheus::Counter,
    pub live_identities: prometheus::Gauge,
    pub propagation_latency: prometheus::Histogram,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();
        let allocations = Counter::new(
            "brikke_identity_allocations_total",
            "Total identity allocation requests served",
        )
        .unwrap();
        let releases = Counter::new(
            "brikke_identity_releases_total",
            "Total identity release requests served",
        )
        .unwrap();
        let live_identities = Gauge::new(
            "brikke_live_identities",
            "Number of currently live identities",
        )
        .unwrap();

        let propagation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "brikke_propagation_latency_ns",
                "Identity change fan-out and barrier time",
            )
            .buckets(vec![10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0]),
        )
        .unwrap();

        registry.register(Box::new(allocations.clone())).unwrap();
        registry.register(Box::new(releases.clone())).unwrap();
        registry
            .register(Box::new(live_identities.clone()))
            .unwrap();
        registry
            .register(Box::new(propagation_latency.clone()))
            .unwrap();

        Self {
            registry,
            allocations,
            releases,
            live_identities,
            propagation_latency,
        }
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathers_registered_metrics() {
        let recorder = MetricsRecorder::new();
        recorder.allocations.inc();
        recorder.live_identities.set(3.0);

        let rendered = recorder.gather_metrics().unwrap();
        assert!(rendered.contains("brikke_identity_allocations_total 1"));
        assert!(rendered.contains("brikke_live_identities 3"));
    }
}
