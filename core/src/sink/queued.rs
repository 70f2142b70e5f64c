//! In-memory queue sink for embedding the pipeline in another program.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{error, info, warn};

use crate::record::Record;
use crate::sink::{Lifecycle, OutputSink, SinkStatus};
use crate::telemetry::{MetricsSnapshot, SinkMetrics};

/// Holds normalized records until the embedding program dequeues them.
///
/// If the consumer falls more than `max_events` records behind, the backlog is
/// discarded before the next record is queued.
pub struct QueuedSink {
    queue: Mutex<VecDeque<Record>>,
    last_error: Mutex<Option<anyhow::Error>>,
    max_events: usize,
    lifecycle: Lifecycle,
    metrics: SinkMetrics,
}

impl QueuedSink {
    pub fn new(max_events: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            last_error: Mutex::new(None),
            max_events,
            lifecycle: Lifecycle::new(),
            metrics: SinkMetrics::default(),
        }
    }

    pub fn dequeue(&self) -> Option<Record> {
        self.queue().pop_front()
    }

    pub fn drain(&self) -> Vec<Record> {
        self.queue().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// The upstream error passed to `consume_error`, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|err| format!("{err:#}"))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Record>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutputSink for QueuedSink {
    async fn consume(&self, record: Record) {
        if !self.lifecycle.is_running() {
            self.metrics.record_dropped();
            return;
        }
        self.metrics.record_received();

        let mut queue = self.queue();
        if queue.len() > self.max_events {
            warn!(
                discarded = queue.len(),
                "queue consumer fell behind; discarding backlog"
            );
            queue.clear();
        }
        queue.push_back(record.normalize());
    }

    fn consume_error(&self, error: anyhow::Error) {
        if self.lifecycle.finish(SinkStatus::Failed) {
            error!(error = ?error, "upstream reported an error");
            *self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(error);
        }
    }

    async fn consume_completed(&self) {
        if self.lifecycle.finish(SinkStatus::Completed) {
            info!(queued = self.len(), "Stopping...");
        }
    }

    fn stop(&self) {
        self.lifecycle.finish(SinkStatus::Stopped);
        self.lifecycle.farewell();
    }

    fn status(&self) -> SinkStatus {
        self.lifecycle.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;

    #[tokio::test]
    async fn test_records_dequeue_in_order() {
        let sink = QueuedSink::new(100);
        for i in 0..3 {
            sink.consume([("seq", i)].into_iter().collect()).await;
        }

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.dequeue().unwrap().get("seq"), Some(&Value::Int(0)));
        let rest = sink.drain();
        assert_eq!(rest.len(), 2);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_backlog_is_cleared_past_max_events() {
        let sink = QueuedSink::new(2);
        for i in 0..4 {
            sink.consume([("seq", i)].into_iter().collect()).await;
        }

        // Three queued records exceed the bound, so the fourth starts a fresh queue.
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.dequeue().unwrap().get("seq"), Some(&Value::Int(3)));
    }

    #[tokio::test]
    async fn test_error_is_retained() {
        let sink = QueuedSink::new(10);
        sink.consume_error(anyhow::anyhow!("source closed unexpectedly"));

        assert_eq!(sink.status(), SinkStatus::Failed);
        assert_eq!(sink.last_error().as_deref(), Some("source closed unexpectedly"));

        sink.consume([("a", 1)].into_iter().collect()).await;
        assert!(sink.is_empty());
    }
}
