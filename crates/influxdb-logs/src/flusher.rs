// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::constants::MAX_RETRYING_BATCHES;
use crate::event::LogEvent;
use crate::influxdb::PointSink;
use crate::point::{Point, PointMapper};

/// How many times a batch is attempted, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Up to `n` attempts, back to back.
    Immediate(u64),
    /// Up to `n` attempts, waiting `delay_ms * attempt` after each failure.
    LinearBackoff(u64, u64),
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Immediate(1)
    }
}

impl RetryStrategy {
    #[must_use]
    pub fn max_attempts(&self) -> u64 {
        match self {
            RetryStrategy::Immediate(n) | RetryStrategy::LinearBackoff(n, _) => (*n).max(1),
        }
    }

    /// Wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u64) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => {
                Duration::from_millis(delay_ms.saturating_mul(attempt))
            }
        }
    }
}

/// Result of handing one batch to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// All points of the batch were accepted.
    Delivered(usize),
    /// The first attempt failed and the batch was handed to a retry task.
    Retrying(usize),
    /// The batch was lost. The reason has already been logged.
    Failed(usize),
    /// Nothing to send.
    Skipped,
}

/// Maps batches to points and writes them to a [`PointSink`].
///
/// The first attempt is awaited by the caller. Further attempts allowed by
/// the [`RetryStrategy`] run in background tasks, at most
/// [`MAX_RETRYING_BATCHES`] at a time. Dropping the last clone of a flusher
/// aborts any retry still running.
#[derive(Clone)]
pub struct Flusher {
    sink: Arc<dyn PointSink>,
    mapper: PointMapper,
    retry_strategy: RetryStrategy,
    retries: Arc<Mutex<JoinSet<()>>>,
}

impl Flusher {
    #[must_use]
    pub fn new(sink: Arc<dyn PointSink>, mapper: PointMapper) -> Self {
        Flusher {
            sink,
            mapper,
            retry_strategy: RetryStrategy::default(),
            retries: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    #[must_use]
    pub fn with_retry_strategy(mut self, retry_strategy: RetryStrategy) -> Self {
        self.retry_strategy = retry_strategy;
        self
    }

    /// Makes one delivery attempt for the batch. Failures are logged and the
    /// batch is not requeued; a retryable failure may be handed to a retry
    /// task instead.
    pub async fn deliver(&self, batch: Vec<LogEvent>) -> DeliveryOutcome {
        if batch.is_empty() {
            return DeliveryOutcome::Skipped;
        }

        let now = SystemTime::now();
        let points: Vec<Point> = batch.iter().map(|e| self.mapper.map_at(e, now)).collect();
        drop(batch);

        let start = Instant::now();
        let count = points.len();
        let result = self.sink.write(&points).await;
        match result {
            Ok(()) => {
                debug!(
                    "INFLUXDB | Flushed {} events in {}ms",
                    count,
                    start.elapsed().as_millis()
                );
                DeliveryOutcome::Delivered(count)
            }
            Err(e) if e.is_retryable() && self.retry_strategy.max_attempts() > 1 => {
                if self.spawn_retry(points) {
                    debug!("INFLUXDB | Attempt 1 for {count} events failed, retrying: {e}");
                    DeliveryOutcome::Retrying(count)
                } else {
                    error!(
                        "INFLUXDB | Failed to deliver {} events, {} batches already retrying: {}",
                        count, MAX_RETRYING_BATCHES, e
                    );
                    DeliveryOutcome::Failed(count)
                }
            }
            Err(e) => {
                error!("INFLUXDB | Failed to deliver {} events: {}", count, e);
                DeliveryOutcome::Failed(count)
            }
        }
    }

    /// Number of batches currently being retried.
    #[must_use]
    pub fn retrying(&self) -> usize {
        let mut retries = self.retries.lock().unwrap_or_else(PoisonError::into_inner);
        while retries.try_join_next().is_some() {}
        retries.len()
    }

    fn spawn_retry(&self, points: Vec<Point>) -> bool {
        let mut retries = self.retries.lock().unwrap_or_else(PoisonError::into_inner);
        while retries.try_join_next().is_some() {}
        if retries.len() >= MAX_RETRYING_BATCHES {
            return false;
        }
        retries.spawn(retry_batch(
            Arc::clone(&self.sink),
            points,
            self.retry_strategy,
        ));
        true
    }

    /// Waits for pending retries, then closes the sink.
    pub async fn close(&self) {
        let mut retries = std::mem::take(
            &mut *self.retries.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if !retries.is_empty() {
            debug!("INFLUXDB | Waiting for {} retrying batches", retries.len());
        }
        while retries.join_next().await.is_some() {}
        self.sink.close().await;
    }
}

/// Attempts 2..=n of a batch whose first attempt already failed.
async fn retry_batch(sink: Arc<dyn PointSink>, points: Vec<Point>, strategy: RetryStrategy) {
    let max_attempts = strategy.max_attempts();
    for attempt in 2..=max_attempts {
        tokio::time::sleep(strategy.delay_after(attempt - 1)).await;
        match sink.write(&points).await {
            Ok(()) => {
                debug!(
                    "INFLUXDB | Flushed {} events on attempt {}/{}",
                    points.len(),
                    attempt,
                    max_attempts
                );
                return;
            }
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                debug!("INFLUXDB | Attempt {attempt}/{max_attempts} failed: {e}");
            }
            Err(e) => {
                error!(
                    "INFLUXDB | Failed to deliver {} events after {} attempts: {}",
                    points.len(),
                    attempt,
                    e
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ShippingError;
    use crate::event::Level;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<Vec<Point>>>,
        fail: AtomicBool,
        client_error: AtomicBool,
        closed: AtomicUsize,
    }

    impl RecordingSink {
        fn attempts(&self) -> usize {
            self.writes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PointSink for RecordingSink {
        async fn write(&self, points: &[Point]) -> Result<(), ShippingError> {
            self.writes.lock().unwrap().push(points.to_vec());
            if self.client_error.load(Ordering::SeqCst) {
                return Err(ShippingError::Destination(
                    Some(StatusCode::BAD_REQUEST),
                    "unable to parse points".to_string(),
                ));
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ShippingError::Destination(
                    Some(StatusCode::INTERNAL_SERVER_ERROR),
                    "internal error".to_string(),
                ));
            }
            Ok(())
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn flusher(sink: &Arc<RecordingSink>) -> Flusher {
        Flusher::new(
            Arc::clone(sink) as Arc<dyn PointSink>,
            PointMapper::with_defaults("app", "host"),
        )
    }

    fn batch(message: &str) -> Vec<LogEvent> {
        vec![LogEvent::new(Level::Error, message)]
    }

    #[test]
    fn test_retry_strategy_attempts() {
        assert_eq!(RetryStrategy::default().max_attempts(), 1);
        assert_eq!(RetryStrategy::Immediate(0).max_attempts(), 1);
        assert_eq!(RetryStrategy::LinearBackoff(3, 10).max_attempts(), 3);
    }

    #[test]
    fn test_retry_strategy_delays() {
        assert_eq!(RetryStrategy::Immediate(3).delay_after(2), Duration::ZERO);
        let linear = RetryStrategy::LinearBackoff(3, 100);
        assert_eq!(linear.delay_after(1), Duration::from_millis(100));
        assert_eq!(linear.delay_after(2), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_deliver_maps_whole_batch() {
        let sink = Arc::new(RecordingSink::default());
        let batch = vec![
            LogEvent::new(Level::Information, "first"),
            LogEvent::new(Level::Warning, "second"),
        ];

        let outcome = flusher(&sink).deliver(batch).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered(2));
        let writes = sink.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0][0].fields["message"], "first");
        assert_eq!(writes[0][1].tags["level"], "Warning");
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_sent() {
        let sink = Arc::new(RecordingSink::default());
        assert_eq!(flusher(&sink).deliver(Vec::new()).await, DeliveryOutcome::Skipped);
        assert!(sink.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_is_logged_not_returned() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);

        let outcome = flusher(&sink).deliver(batch("lost")).await;

        assert_eq!(outcome, DeliveryOutcome::Failed(1));
        assert!(logs_contain("INFLUXDB | Failed to deliver 1 events"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_run_after_deliver_returns() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let flusher = flusher(&sink).with_retry_strategy(RetryStrategy::LinearBackoff(3, 1000));

        let outcome = flusher.deliver(batch("later")).await;

        assert_eq!(outcome, DeliveryOutcome::Retrying(1));
        assert_eq!(sink.attempts(), 1);
        assert_eq!(flusher.retrying(), 1);

        // attempt 2 after 1s, attempt 3 after a further 2s
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(sink.attempts(), 2);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.attempts(), 3);
        assert_eq!(flusher.retrying(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_success() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let flusher = flusher(&sink).with_retry_strategy(RetryStrategy::Immediate(5));

        assert_eq!(
            flusher.deliver(batch("flaky")).await,
            DeliveryOutcome::Retrying(1)
        );
        sink.fail.store(false, Ordering::SeqCst);
        flusher.close().await;

        assert_eq!(sink.attempts(), 2);
        assert_eq!(sink.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let sink = Arc::new(RecordingSink::default());
        sink.client_error.store(true, Ordering::SeqCst);
        let flusher = flusher(&sink).with_retry_strategy(RetryStrategy::Immediate(3));

        assert_eq!(flusher.deliver(batch("bad")).await, DeliveryOutcome::Failed(1));
        flusher.close().await;
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_batches_are_bounded() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let flusher = flusher(&sink).with_retry_strategy(RetryStrategy::LinearBackoff(2, 60_000));

        for i in 0..MAX_RETRYING_BATCHES {
            assert_eq!(
                flusher.deliver(batch(&format!("batch {i}"))).await,
                DeliveryOutcome::Retrying(1)
            );
        }
        assert_eq!(
            flusher.deliver(batch("one too many")).await,
            DeliveryOutcome::Failed(1)
        );
        assert_eq!(flusher.retrying(), MAX_RETRYING_BATCHES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_flusher_aborts_retries() {
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let flusher = flusher(&sink).with_retry_strategy(RetryStrategy::LinearBackoff(3, 1000));

        flusher.deliver(batch("abandoned")).await;
        drop(flusher);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test]
    async fn test_close_reaches_sink() {
        let sink = Arc::new(RecordingSink::default());
        flusher(&sink).close().await;
        assert_eq!(sink.closed.load(Ordering::SeqCst), 1);
    }
}
