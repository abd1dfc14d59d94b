//! Configuration management.
//!
//! Values come from an optional file plus `SMA__`-prefixed environment
//! variables, e.g. `SMA__ADMISSION__MAX_CONCURRENT_REQUESTS=200` or
//! `SMA__RETRY__SWEEP_INTERVAL_MS=10000`. Every field has a default.

use serde::Deserialize;
use std::path::Path;

use crate::admission::AdmissionConfig;
use crate::error::Result;
use crate::retry::RetryConfig;
use crate::telemetry::TelemetryConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SMA";

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Admission controller configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Retry queue configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging and metrics configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from the environment only.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment())
            .build()?;

        Self::finish(config)
    }

    /// Load from a file, with environment variables taking precedence.
    ///
    /// The format follows the extension (`.toml`, `.yaml`, `.json`, ...).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        Self::finish(config)
    }

    fn finish(config: config::Config) -> Result<Self> {
        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;

        tracing::debug!(
            max_concurrent_requests = cfg.admission.max_concurrent_requests,
            sweep_interval_ms = cfg.retry.sweep_interval_ms,
            "Configuration loaded"
        );
        Ok(cfg)
    }

    /// Reject values that cannot work.
    pub fn validate(&self) -> Result<()> {
        self.admission.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
