// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    DEFAULT_EXPORT_INTERVAL, DEFAULT_EXPORT_TIMEOUT, DEFAULT_SESSION_TIMEOUT, DEFAULT_SOURCE,
    DEFAULT_SWEEP_INTERVAL,
};
use crate::errors::ConfigError;
use std::env;
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the telemetry pipeline
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// OTLP/JSON metrics endpoint. Empty disables exporting.
    pub endpoint: String,
    /// Bearer credential sent to the sink
    pub api_key: Option<String>,
    /// Value of the `source` attribute on every metric
    pub source: String,
    pub export_interval: Duration,
    pub sweep_interval: Duration,
    /// Idle time after which a session stops counting as active
    pub session_timeout: Duration,
    /// Upper bound for a single export request
    pub export_timeout: Duration,
    pub https_proxy: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            source: DEFAULT_SOURCE.to_string(),
            export_interval: DEFAULT_EXPORT_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup, e.g. a map in tests
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|val| val.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let config = Self {
            endpoint: lookup("METRICS_URL")
                .map(|val| val.trim().to_string())
                .unwrap_or_default(),
            api_key: lookup("METRICS_API_KEY").filter(|val| !val.is_empty()),
            source: lookup("METRICS_SOURCE").unwrap_or(defaults.source),
            export_interval: secs("METRICS_EXPORT_INTERVAL_SECS", defaults.export_interval),
            sweep_interval: secs("METRICS_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            session_timeout: secs("METRICS_SESSION_TIMEOUT_SECS", defaults.session_timeout),
            export_timeout: secs("METRICS_EXPORT_TIMEOUT_SECS", defaults.export_timeout),
            https_proxy: lookup("METRICS_PROXY_HTTPS").or_else(|| lookup("HTTPS_PROXY")),
            log_level: lookup("METRICS_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "METRICS_SOURCE cannot be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("export interval", self.export_interval),
            ("sweep interval", self.sweep_interval),
            ("session timeout", self.session_timeout),
            ("export timeout", self.export_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn export_enabled(&self) -> bool {
        !self.endpoint.is_empty()
    }
}
