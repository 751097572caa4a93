// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types.
//!
//! Configuration and lifecycle errors are returned to the caller. Shipping
//! errors never leave the background flush task, they are logged there.

use reqwest::StatusCode;

/// Invalid or incomplete exporter configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors returned by the exporter lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No tokio runtime available to run the flush loop")]
    NoRuntime,

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Exporter not running")]
    NotRunning,

    #[error("Shutdown timeout exceeded, buffered events may have been lost")]
    ShutdownTimeout,
}

/// Failure to hand a batch of points to the sink.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    #[error("Error shipping data: {0:?} {1}")]
    Destination(Option<StatusCode>, String),

    #[error("Authentication failed: {0}")]
    Authentication(String),
}

impl ShippingError {
    /// Whether another attempt could succeed. Client errors other than
    /// timeouts and rate limiting are permanent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ShippingError::Payload(_) => false,
            ShippingError::Authentication(_) => true,
            ShippingError::Destination(Some(code), _) => {
                !code.is_client_error()
                    || *code == StatusCode::REQUEST_TIMEOUT
                    || *code == StatusCode::TOO_MANY_REQUESTS
            }
            ShippingError::Destination(None, _) => true,
        }
    }
}
