//! Console sink: forwards every record immediately, in its JSON form, to a handler.

use std::io::Write;

use serde_json::Value as JsonValue;
use tracing::{error, info};

use crate::record::Record;
use crate::sink::{Lifecycle, OutputSink, SinkStatus};
use crate::telemetry::{MetricsSnapshot, SinkMetrics};

/// Receives each record's normalized JSON form.
pub type RecordHandler = Box<dyn Fn(JsonValue) -> anyhow::Result<()> + Send + Sync>;

pub struct ConsoleSink {
    handler: RecordHandler,
    lifecycle: Lifecycle,
    metrics: SinkMetrics,
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleSink {
    /// Pretty-prints records to stdout.
    pub fn new() -> Self {
        Self::with_handler(print_json)
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(JsonValue) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            lifecycle: Lifecycle::new(),
            metrics: SinkMetrics::default(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn forward(&self, record: Record) -> anyhow::Result<()> {
        let json = record.normalize().to_json()?;
        (self.handler)(json)
    }
}

fn print_json(value: JsonValue) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(&value)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{text}")?;
    Ok(())
}

impl OutputSink for ConsoleSink {
    async fn consume(&self, record: Record) {
        if !self.lifecycle.is_running() {
            self.metrics.record_dropped();
            return;
        }
        self.metrics.record_received();

        if let Err(err) = self.forward(record) {
            self.lifecycle.fail();
            error!(error = ?err, "console sink failed; further records will be dropped");
        }
    }

    fn consume_error(&self, error: anyhow::Error) {
        if self.lifecycle.finish(SinkStatus::Failed) {
            error!(error = ?error, "upstream reported an error");
        }
    }

    async fn consume_completed(&self) {
        if self.lifecycle.finish(SinkStatus::Completed) {
            info!("Stopping...");
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
