// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Exporter lifecycle and the background flush loop.
//!
//! ```text
//!   producers ──enqueue──> EventBuffer ──take_batch──> Flusher ──> PointSink
//!                              │                          ^
//!                              └── filled / period ───────┘
//! ```
//!
//! One tokio task per exporter wakes every `period` and whenever a full
//! batch is pending. Retries of failed batches run beside it, never inside
//! it. On shutdown it finishes the delivery in progress, sends whatever is
//! still buffered, waits for retries and closes the sink.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::EventBuffer;
use crate::config::ExporterConfig;
use crate::errors::ExporterError;
use crate::event::{Level, LogEvent};
use crate::flusher::Flusher;
use crate::hostname::get_hostname;
use crate::influxdb::{InfluxDbApi, PointSink};
use crate::point::PointMapper;

/// Status of the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterStatus {
    /// Flush loop is accepting and shipping events.
    Running,
    /// Shutdown requested, the final flush is in progress.
    Draining,
    /// No flush loop. Enqueued events are dropped.
    Stopped,
}

/// Cheap, cloneable producer side of an [`Exporter`].
#[derive(Clone)]
pub struct ExporterHandle {
    buffer: Arc<EventBuffer>,
    status: Arc<RwLock<ExporterStatus>>,
    minimum_level: Level,
}

impl ExporterHandle {
    /// Buffers an event for the next flush. Never blocks on I/O and never
    /// fails; see [`EventBuffer::enqueue`] for when events are dropped.
    pub fn enqueue(&self, event: LogEvent) {
        self.buffer.enqueue(event);
    }

    #[must_use]
    pub fn status(&self) -> ExporterStatus {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lowest level forwarded by event sources such as the tracing layer.
    #[must_use]
    pub fn minimum_level(&self) -> Level {
        self.minimum_level
    }

    /// Number of events waiting for a flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn set_status(&self, status: ExporterStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }
}

/// Periodic batching exporter.
pub struct Exporter {
    handle: ExporterHandle,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl Exporter {
    /// Validates the configuration, builds the InfluxDB client and spawns
    /// the flush loop on the current tokio runtime.
    pub fn start(config: ExporterConfig) -> Result<Self, ExporterError> {
        let connection = config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ExporterError::NoRuntime)?;
        let api = InfluxDbApi::new(
            &connection,
            config.request_timeout,
            config.https_proxy.as_deref(),
        )?;
        info!(
            "INFLUXDB | Exporting to {} (bucket {}, organization {}, {} auth)",
            connection.address,
            connection.bucket,
            connection.organization,
            connection.authentication.scheme()
        );
        Ok(Self::spawn(config, Arc::new(api), &runtime))
    }

    /// Same lifecycle as [`Exporter::start`], writing to a caller-provided sink.
    pub fn start_with_sink(
        config: ExporterConfig,
        sink: Arc<dyn PointSink>,
    ) -> Result<Self, ExporterError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ExporterError::NoRuntime)?;
        Ok(Self::spawn(config, sink, &runtime))
    }

    fn spawn(
        config: ExporterConfig,
        sink: Arc<dyn PointSink>,
        runtime: &tokio::runtime::Handle,
    ) -> Self {
        let mapper = PointMapper::new(
            config.source.trim(),
            get_hostname(),
            Arc::clone(&config.formatter),
            config.timestamp_source,
        );
        let flusher = Flusher::new(sink, mapper).with_retry_strategy(config.retry_strategy);
        let handle = ExporterHandle {
            buffer: Arc::new(EventBuffer::new(
                config.batch_posting_limit,
                config.queue_limit,
            )),
            status: Arc::new(RwLock::new(ExporterStatus::Running)),
            minimum_level: config.minimum_level,
        };
        let cancel_token = CancellationToken::new();

        let task = runtime.spawn(run_flush_loop(
            handle.clone(),
            flusher,
            config.period,
            cancel_token.clone(),
        ));
        debug!(
            "INFLUXDB | Flush loop started: batch limit {}, period {:?}",
            config.batch_posting_limit, config.period
        );

        Exporter {
            handle,
            cancel_token,
            task: Some(task),
            drain_timeout: config.drain_timeout,
        }
    }

    pub fn enqueue(&self, event: LogEvent) {
        self.handle.enqueue(event);
    }

    #[must_use]
    pub fn handle(&self) -> ExporterHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn status(&self) -> ExporterStatus {
        self.handle.status()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status() == ExporterStatus::Running
    }

    /// Stops accepting events, flushes what is buffered and closes the sink.
    ///
    /// Waits at most the configured drain timeout. When it expires the flush
    /// loop is aborted, anything not yet delivered is lost and
    /// [`ExporterError::ShutdownTimeout`] is returned. The exporter is
    /// `Stopped` afterwards in both cases.
    pub async fn shutdown(&mut self) -> Result<(), ExporterError> {
        let Some(task) = self.task.take() else {
            return Err(ExporterError::NotRunning);
        };

        self.handle.set_status(ExporterStatus::Draining);
        self.handle.buffer.close();
        self.cancel_token.cancel();

        let abort_handle = task.abort_handle();
        let result = match tokio::time::timeout(self.drain_timeout, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("INFLUXDB | Flush loop ended abnormally: {}", e);
                Ok(())
            }
            Err(_) => {
                abort_handle.abort();
                warn!(
                    "INFLUXDB | Final flush did not finish within {:?}, {} events discarded",
                    self.drain_timeout,
                    self.handle.pending()
                );
                Err(ExporterError::ShutdownTimeout)
            }
        };

        self.handle.set_status(ExporterStatus::Stopped);
        info!("INFLUXDB | Exporter stopped");
        result
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        if self.task.is_some() {
            // The loop still drains, closes the sink and marks itself stopped.
            self.handle.set_status(ExporterStatus::Draining);
            self.handle.buffer.close();
            self.cancel_token.cancel();
        }
    }
}

async fn run_flush_loop(
    handle: ExporterHandle,
    flusher: Flusher,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let buffer = &handle.buffer;
    let mut flush_interval = interval(period);
    flush_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    flush_interval.tick().await; // discard first tick

    loop {
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            _ = flush_interval.tick() => flush_pending(buffer, &flusher).await,
            () = buffer.filled() => flush_full_batches(buffer, &flusher).await,
        }
    }

    debug!("INFLUXDB | Final flush");
    buffer.close();
    report_dropped(buffer);
    while let Some(batch) = buffer.take_batch(false) {
        flusher.deliver(batch).await;
    }
    flusher.close().await;
    handle.set_status(ExporterStatus::Stopped);
}

/// Timer wake: sends everything buffered at wake time, in batches of at most
/// the posting limit.
async fn flush_pending(buffer: &EventBuffer, flusher: &Flusher) {
    report_dropped(buffer);
    let mut remaining = buffer.len();
    while remaining > 0 {
        let Some(batch) = buffer.take_batch(false) else {
            break;
        };
        remaining = remaining.saturating_sub(batch.len());
        flusher.deliver(batch).await;
    }
}

/// Size wake: sends full batches only, the remainder waits.
async fn flush_full_batches(buffer: &EventBuffer, flusher: &Flusher) {
    report_dropped(buffer);
    while let Some(batch) = buffer.take_batch(true) {
        flusher.deliver(batch).await;
    }
}

fn report_dropped(buffer: &EventBuffer) {
    let dropped = buffer.take_dropped();
    if dropped > 0 {
        warn!(
            "INFLUXDB | Dropped {} events: buffer full or exporter shutting down",
            dropped
        );
    }
}
