//! Observability configuration.
//!
//! Parameters for system instrumentation:
//! - Metrics collection
//! - Distributed tracing

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

#[derive(Default, Debug, Serialize, Deserialize, Validate, Clone)]
pub struct MetricsConfig {}

#[derive(Default, Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TracingConfig {}

/// Telemetry configuration.
#[derive(Default, Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TelemetryConfig {
    /// Metrics collection parameters.
    #[validate(nested)]
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Distributed tracing parameters.
    #[validate(nested)]
    #[serde(default)]
    pub tracing: TracingConfig,
}
