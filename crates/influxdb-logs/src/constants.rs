// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Default values for the exporter.
//!
//! Defaults are copied into [`crate::config::ExporterConfig`] and
//! [`crate::connection::ConnectionInfo`] at construction time, nothing here is
//! read again after an exporter starts.

use std::time::Duration;

/// Bucket written to when the connection does not name one.
pub const DEFAULT_BUCKET_NAME: &str = "LogDb";

/// Organization used when the connection does not name one.
pub const DEFAULT_ORGANIZATION_NAME: &str = "None";

/// Number of pending events that triggers an immediate flush, and the
/// maximum number of events written in a single request.
pub const DEFAULT_BATCH_POSTING_LIMIT: usize = 100;

/// Wake-up period of the flush loop.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(30);

/// Maximum number of events held in memory. Events past this are dropped.
pub const DEFAULT_QUEUE_LIMIT: usize = 100_000;

/// Upper bound on how long `shutdown` waits for the final flush.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout applied to every HTTP request made to InfluxDB.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Failed batches allowed to retry at the same time. Further failures are
/// dropped instead of queued behind them.
pub const MAX_RETRYING_BATCHES: usize = 4;

/// Idle pooled connections are closed after this long.
pub(crate) const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(270);

/// Hostname reported when nothing better can be resolved.
pub(crate) const UNKNOWN_HOSTNAME: &str = "unknown";

/// Tag keys written on every point.
pub(crate) const TAG_LEVEL: &str = "level";
pub(crate) const TAG_HOSTNAME: &str = "hostname";
pub(crate) const TAG_EXCEPTION_TYPE: &str = "exceptionType";
pub(crate) const TAG_MESSAGE_TEMPLATE: &str = "messageTemplate";

/// Field key holding the rendered message.
pub(crate) const FIELD_MESSAGE: &str = "message";
