// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # InfluxDB logs
//!
//! Ships structured log events to an InfluxDB v2 server as time-series
//! points.
//!
//! Events are buffered in memory and flushed by a background tokio task,
//! either every `period` or as soon as `batch_posting_limit` events are
//! pending. Each event becomes one point: the configured source is the
//! measurement, level, hostname, exception type and message template are
//! tags, and every property plus the rendered message is a string field.
//!
//! Delivery is best effort. A failed batch is logged and dropped, it never
//! blocks later batches or the application.
//!
//! ```no_run
//! use influxdb_logs::{ConnectionInfo, Exporter, ExporterConfig, Level, LogEvent};
//!
//! # async fn run() -> Result<(), influxdb_logs::ExporterError> {
//! let config = ExporterConfig::new(
//!     ConnectionInfo::with_token("http://localhost:8086", "my-token").bucket("logs"),
//!     "checkout",
//! );
//! let mut exporter = Exporter::start(config)?;
//! exporter.enqueue(
//!     LogEvent::new(Level::Information, "User {user} did {count} things")
//!         .with_property("user", "alice")
//!         .with_property("count", 3),
//! );
//! exporter.shutdown().await
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod config;
pub mod connection;
pub mod constants;
pub mod errors;
pub mod event;
pub mod exporter;
pub mod flusher;
pub mod hostname;
pub mod influxdb;
pub mod layer;
pub mod point;
pub mod template;

pub use config::ExporterConfig;
pub use connection::{Authentication, Connection, ConnectionInfo};
pub use errors::{ConfigError, ExporterError, ShippingError};
pub use event::{ErrorInfo, Level, LogEvent, Value};
pub use exporter::{Exporter, ExporterHandle, ExporterStatus};
pub use flusher::{DeliveryOutcome, Flusher, RetryStrategy};
pub use influxdb::{InfluxDbApi, PointSink};
pub use layer::InfluxLayer;
pub use point::{Point, PointMapper, TimestampSource};
pub use template::{DefaultFormatter, MessageTemplate, PropertyFormatter};
