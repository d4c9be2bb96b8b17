//! ## brikke-telemetry::logging
//! **Structured logger with `tracing` and OpenTelemetry metadata**
//!
//! ### Expectations:
//! - Negligible overhead on the allocation fast path
//! - Structured audit trail for every identity lifecycle event
//!
//! ### Components:
//! - `metrics/`: Prometheus exporter with histograms
//! - `logging/`: audit events with OpenTelemetry key-values

use opentelemetry::KeyValue;
use tracing::{info_span, Instrument};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    pub fn init() {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_thread_names(true)
            .with_span_events(FmtSpan::ENTER)
            .init()
    }

    /// Emits a structured audit event for identity lifecycle transitions.
    pub async fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!(
            "identity_event",
            event_type = event_type,
            otel.kind = "INTERNAL"
        );

        async {
            tracing::info!(
                metadata = ?metadata,
                "Identity event occurred"
            );
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_logging() {
        tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(EventLogger::log_event(
                "identity_allocated",
                vec![KeyValue::new("numeric", "16777216")],
            ));
        assert!(logs_contain("Identity event occurred"));
    }
}
