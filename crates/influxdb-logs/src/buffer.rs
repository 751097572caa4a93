// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pending events shared between producers and the flush task.
//!
//! Producers push from any thread without waiting on I/O. The flush task
//! takes batches out under the same lock, so an event is either still
//! buffered or in exactly one batch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::event::LogEvent;

pub struct EventBuffer {
    events: Mutex<VecDeque<LogEvent>>,
    batch_posting_limit: usize,
    queue_limit: usize,
    dropped: AtomicUsize,
    closed: AtomicBool,
    full: Notify,
}

impl EventBuffer {
    #[must_use]
    pub fn new(batch_posting_limit: usize, queue_limit: usize) -> Self {
        let batch_posting_limit = batch_posting_limit.max(1);
        Self {
            events: Mutex::new(VecDeque::new()),
            batch_posting_limit,
            queue_limit: queue_limit.max(batch_posting_limit),
            dropped: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            full: Notify::new(),
        }
    }

    // A producer that panicked mid-push cannot leave the deque half-written,
    // so the data behind a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an event. Never blocks on I/O and never fails; events that do
    /// not fit, or arrive after [`EventBuffer::close`], are counted as dropped.
    pub fn enqueue(&self, event: LogEvent) {
        let len = {
            let mut events = self.lock();
            // Checked under the lock so nothing lands after the final drain.
            if self.closed.load(Ordering::Acquire) || events.len() >= self.queue_limit {
                drop(events);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            events.push_back(event);
            events.len()
        };

        if len >= self.batch_posting_limit {
            self.full.notify_one();
        }
    }

    /// Removes up to `batch_posting_limit` of the oldest events.
    ///
    /// With `require_full` only a complete batch is taken, otherwise any
    /// non-empty remainder is. Returns `None` when nothing qualifies.
    pub fn take_batch(&self, require_full: bool) -> Option<Vec<LogEvent>> {
        let mut events = self.lock();
        if events.is_empty() || (require_full && events.len() < self.batch_posting_limit) {
            return None;
        }
        let n = events.len().min(self.batch_posting_limit);
        Some(events.drain(..n).collect())
    }

    /// Resolves once the buffer has held a full batch since the last wake.
    pub async fn filled(&self) {
        self.full.notified().await;
    }

    /// Stops accepting events. Once this returns, every later `enqueue` is
    /// counted as dropped.
    pub fn close(&self) {
        let _events = self.lock();
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns and resets the number of dropped events.
    pub fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn batch_posting_limit(&self) -> usize {
        self.batch_posting_limit
    }
}
