//! Logging initialization.
//!
//! Installs a global `tracing` subscriber: an `EnvFilter` (from `RUST_LOG`,
//! falling back to the configured directive) and a fmt layer with targets
//! and thread ids.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Default filter when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "info,palisade=debug";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Configuration for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Include thread ids in log lines.
    pub thread_ids: bool,
    /// Emit ANSI colour codes.
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            thread_ids: true,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// The filter to install: `RUST_LOG` wins over the configured directive.
    pub fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => Ok(EnvFilter::try_new(&self.log_filter)?),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = config.env_filter()?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(config.thread_ids)
        .with_ansi(config.ansi);

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
        assert!(EnvFilter::try_new(&config.log_filter).is_ok());
    }

    #[test]
    fn test_config_from_toml_keeps_defaults() {
        let config: TelemetryConfig = toml::from_str("thread_ids = false").unwrap();
        assert!(!config.thread_ids);
        assert!(config.ansi);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }
}
