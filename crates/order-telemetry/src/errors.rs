// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors raised while loading or validating [`crate::config::TelemetryConfig`]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Reasons an export batch was dropped
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    /// The batch could not be turned into a request body
    #[error("Failed to prepare payload: {0}")]
    Payload(String),
    /// The sink was unreachable or answered with a non-2xx status
    #[error("Error shipping data: {0:?} {1}")]
    Destination(Option<StatusCode>, String),
}
