// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{Connection, ConnectionInfo};
use crate::constants::{
    DEFAULT_BATCH_POSTING_LIMIT, DEFAULT_DRAIN_TIMEOUT, DEFAULT_PERIOD, DEFAULT_QUEUE_LIMIT,
    DEFAULT_REQUEST_TIMEOUT,
};
use crate::errors::ConfigError;
use crate::event::Level;
use crate::flusher::RetryStrategy;
use crate::point::TimestampSource;
use crate::template::{DefaultFormatter, PropertyFormatter};

/// Delay between attempts when `INFLUXDB_RETRY_ATTEMPTS` asks for retries.
const ENV_RETRY_DELAY_MS: u64 = 1000;

/// Configuration for the log exporter
#[derive(Clone)]
pub struct ExporterConfig {
    /// Server address, bucket, organization and credentials
    pub connection: ConnectionInfo,
    /// Measurement name written on every point
    pub source: String,
    /// Maximum events per batch, and the size that triggers an early flush
    pub batch_posting_limit: usize,
    /// Time between periodic flushes
    pub period: Duration,
    /// Maximum events held in memory; extra events are dropped
    pub queue_limit: usize,
    /// Upper bound on the final flush during shutdown
    pub drain_timeout: Duration,
    /// Timeout for a single HTTP request
    pub request_timeout: Duration,
    pub retry_strategy: RetryStrategy,
    pub timestamp_source: TimestampSource,
    /// Events below this level are ignored by the tracing layer
    pub minimum_level: Level,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Renders property values into the message field
    pub formatter: Arc<dyn PropertyFormatter>,
}

impl fmt::Debug for ExporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterConfig")
            .field("connection", &self.connection)
            .field("source", &self.source)
            .field("batch_posting_limit", &self.batch_posting_limit)
            .field("period", &self.period)
            .field("queue_limit", &self.queue_limit)
            .field("drain_timeout", &self.drain_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("retry_strategy", &self.retry_strategy)
            .field("timestamp_source", &self.timestamp_source)
            .field("minimum_level", &self.minimum_level)
            .field("https_proxy", &self.https_proxy)
            .finish_non_exhaustive()
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionInfo::default(),
            source: String::new(),
            batch_posting_limit: DEFAULT_BATCH_POSTING_LIMIT,
            period: DEFAULT_PERIOD,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_strategy: RetryStrategy::default(),
            timestamp_source: TimestampSource::default(),
            minimum_level: Level::Verbose,
            https_proxy: None,
            formatter: Arc::new(DefaultFormatter),
        }
    }
}

fn parse_env<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{key} has an invalid value '{raw}'"))),
        _ => Ok(None),
    }
}

fn parse_level_env(key: &'static str) -> Result<Option<Level>, ConfigError> {
    env::var(key)
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| raw.parse::<Level>())
        .transpose()
}

impl ExporterConfig {
    /// Configuration with defaults for everything but the connection and source.
    #[must_use]
    pub fn new(connection: ConnectionInfo, source: impl Into<String>) -> Self {
        Self {
            connection,
            source: source.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let connection = ConnectionInfo {
            address: env::var("INFLUXDB_ADDRESS").unwrap_or_default(),
            bucket: env::var("INFLUXDB_BUCKET").ok(),
            organization: env::var("INFLUXDB_ORG").ok(),
            token: env::var("INFLUXDB_TOKEN").ok(),
            username: env::var("INFLUXDB_USERNAME").ok(),
            password: env::var("INFLUXDB_PASSWORD").ok(),
        };
        let defaults = Self::default();

        let retry_strategy = match parse_env::<u64>("INFLUXDB_RETRY_ATTEMPTS")? {
            Some(attempts) if attempts > 1 => {
                RetryStrategy::LinearBackoff(attempts, ENV_RETRY_DELAY_MS)
            }
            Some(_) | None => defaults.retry_strategy,
        };

        let config = Self {
            connection,
            source: env::var("INFLUXDB_SOURCE").unwrap_or_default(),
            batch_posting_limit: parse_env("INFLUXDB_BATCH_POSTING_LIMIT")?
                .unwrap_or(defaults.batch_posting_limit),
            period: parse_env("INFLUXDB_PERIOD_SECS")?
                .map_or(defaults.period, Duration::from_secs),
            queue_limit: parse_env("INFLUXDB_QUEUE_LIMIT")?.unwrap_or(defaults.queue_limit),
            drain_timeout: parse_env("INFLUXDB_DRAIN_TIMEOUT_SECS")?
                .map_or(defaults.drain_timeout, Duration::from_secs),
            request_timeout: parse_env("INFLUXDB_REQUEST_TIMEOUT_SECS")?
                .map_or(defaults.request_timeout, Duration::from_secs),
            retry_strategy,
            timestamp_source: parse_env("INFLUXDB_TIMESTAMP_SOURCE")?
                .unwrap_or(defaults.timestamp_source),
            minimum_level: parse_level_env("INFLUXDB_MINIMUM_LEVEL")?
                .unwrap_or(defaults.minimum_level),
            https_proxy: env::var("INFLUXDB_PROXY_HTTPS")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok()
                .filter(|p| !p.trim().is_empty()),
            formatter: defaults.formatter,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and resolve the connection
    pub fn validate(&self) -> Result<Connection, ConfigError> {
        if self.source.trim().is_empty() {
            return Err(ConfigError::Missing("source"));
        }

        if self.batch_posting_limit == 0 {
            return Err(ConfigError::Invalid(
                "batch posting limit must be greater than 0".to_string(),
            ));
        }

        if self.period.is_zero() {
            return Err(ConfigError::Invalid(
                "period must be greater than 0".to_string(),
            ));
        }

        if self.queue_limit < self.batch_posting_limit {
            return Err(ConfigError::Invalid(format!(
                "queue limit {} is smaller than the batch posting limit {}",
                self.queue_limit, self.batch_posting_limit
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request timeout must be greater than 0".to_string(),
            ));
        }

        self.connection.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ExporterConfig {
        ExporterConfig::new(
            ConnectionInfo::with_token("http://localhost:8086", "tok"),
            "app",
        )
    }

    #[test]
    fn test_defaults() {
        let config = valid();
        assert_eq!(config.batch_posting_limit, 100);
        assert_eq!(config.period, Duration::from_secs(30));
        assert_eq!(config.queue_limit, 100_000);
        assert_eq!(config.drain_timeout, Duration::from_secs(10));
        assert_eq!(config.retry_strategy, RetryStrategy::Immediate(1));
        assert_eq!(config.timestamp_source, TimestampSource::Event);
        assert_eq!(config.minimum_level, Level::Verbose);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_needs_connection_and_source() {
        let config = ExporterConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::Missing("source")));

        let config = ExporterConfig {
            source: "app".to_string(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Missing("address")));
    }

    #[test]
    fn test_validate_empty_source() {
        let config = ExporterConfig {
            source: "   ".to_string(),
            ..valid()
        };
        assert_eq!(config.validate(), Err(ConfigError::Missing("source")));
    }

    #[test]
    fn test_validate_invalid_limits() {
        let config = ExporterConfig {
            batch_posting_limit: 0,
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = ExporterConfig {
            period: Duration::ZERO,
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = ExporterConfig {
            batch_posting_limit: 50,
            queue_limit: 10,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_resolves_connection() {
        let connection = valid().validate().unwrap();
        assert_eq!(connection.bucket, "LogDb");
        assert_eq!(connection.authentication.scheme(), "token");
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("tok\""));
        assert!(rendered.contains("<redacted>"));
    }

    // Only test touching these variables, so no other test races on them.
    #[test]
    fn test_from_env() {
        env::set_var("INFLUXDB_ADDRESS", "http://influx:8086");
        env::set_var("INFLUXDB_TOKEN", "env-token");
        env::set_var("INFLUXDB_SOURCE", "env-app");
        env::set_var("INFLUXDB_BATCH_POSTING_LIMIT", "25");
        env::set_var("INFLUXDB_PERIOD_SECS", "5");
        env::set_var("INFLUXDB_RETRY_ATTEMPTS", "3");
        env::set_var("INFLUXDB_TIMESTAMP_SOURCE", "delivery");
        env::set_var("INFLUXDB_MINIMUM_LEVEL", "warn");

        let config = ExporterConfig::from_env().unwrap();
        assert_eq!(config.connection.address, "http://influx:8086");
        assert_eq!(config.source, "env-app");
        assert_eq!(config.batch_posting_limit, 25);
        assert_eq!(config.period, Duration::from_secs(5));
        assert_eq!(config.retry_strategy, RetryStrategy::LinearBackoff(3, 1000));
        assert_eq!(config.timestamp_source, TimestampSource::Delivery);
        assert_eq!(config.minimum_level, Level::Warning);

        env::set_var("INFLUXDB_BATCH_POSTING_LIMIT", "many");
        assert!(matches!(
            ExporterConfig::from_env(),
            Err(ConfigError::Invalid(_))
        ));

        for key in [
            "INFLUXDB_ADDRESS",
            "INFLUXDB_TOKEN",
            "INFLUXDB_SOURCE",
            "INFLUXDB_BATCH_POSTING_LIMIT",
            "INFLUXDB_PERIOD_SECS",
            "INFLUXDB_RETRY_ATTEMPTS",
            "INFLUXDB_TIMESTAMP_SOURCE",
            "INFLUXDB_MINIMUM_LEVEL",
        ] {
            env::remove_var(key);
        }
    }
}
