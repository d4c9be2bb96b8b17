//! # Brikke Configuration System
//!
//! Hierarchical configuration management for the Brikke identity subsystem.
//!
//! ## Features
//! - **Unified Configuration**: Single source of truth across all components
//! - **Validation**: Runtime validation of critical parameters
//! - **Environment Awareness**: Automatic configuration for production/test runs

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod identity;
mod telemetry;
mod validation;

pub use error::ConfigError;
pub use identity::CheckpointConfig;
pub use identity::ClusterConfig;
pub use identity::IdentityConfig;
pub use telemetry::MetricsConfig;
pub use telemetry::TelemetryConfig;
pub use telemetry::TracingConfig;

/// Top-level configuration container for all Brikke components.
#[derive(Debug, Serialize, Deserialize, Validate, Default)]
pub struct BrikkeConfig {
    /// Identity allocator configuration (variant, sizing, persistence).
    #[validate(nested)]
    pub identity: IdentityConfig,

    /// Telemetry and observability configuration.
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl BrikkeConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/brikke.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<environment>.yaml` - Environment-specific overrides.
    /// 4. `BRIKKE_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        // Start with defaults.
        let mut figment = Figment::from(Serialized::defaults(BrikkeConfig::default()));

        if Path::new("config/brikke.yaml").exists() {
            figment = figment.merge(Yaml::file("config/brikke.yaml"));
        }

        let env = std::env::var("BRIKKE_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        figment
            .merge(Env::prefixed("BRIKKE_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }

    /// Load configuration from a specific path for testing/validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(
                path.to_string_lossy().to_string(),
            )));
        }

        Figment::from(Serialized::defaults(BrikkeConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("BRIKKE_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_validation() {
        let config = BrikkeConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn environment_override() {
        // Override a field via environment variable.
        std::env::set_var("BRIKKE_IDENTITY__LOCAL_IDENTITY_CAPACITY", "8192");
        let config = BrikkeConfig::load().unwrap();
        assert_eq!(config.identity.local_identity_capacity, 8192);
        std::env::remove_var("BRIKKE_IDENTITY__LOCAL_IDENTITY_CAPACITY");
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = BrikkeConfig::load_from_path("config/does-not-exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let mut config = BrikkeConfig::default();
        config.identity.local_identity_capacity = 1000;
        assert!(config.validate().is_err());
    }
}
