pub mod console;
pub mod queued;
pub mod store;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tracing::info;

use crate::config::SinkConfig;
use crate::errors::SinkError;
use crate::record::Record;
use crate::store::RestConnection;
use crate::telemetry::MetricsSnapshot;

pub use console::{ConsoleSink, RecordHandler};
pub use queued::QueuedSink;
pub use store::{BatchingStoreSink, StoreSinkOptions};

/// The contract for any terminal consumer of the event stream.
///
/// Every method may be called concurrently from several upstream tasks. None of them
/// report failures to the caller: a sink that hits a fault logs it and stops accepting
/// records instead.
pub trait OutputSink: Send + Sync {
    /// Accepts one record. Ignored once the sink has left [`SinkStatus::Running`].
    fn consume(&self, record: Record) -> impl Future<Output = ()> + Send;

    /// Upstream failed. Marks the sink failed and logs `error`.
    fn consume_error(&self, error: anyhow::Error);

    /// Clean end of stream. Delivers anything still pending, then marks the sink completed.
    fn consume_completed(&self) -> impl Future<Output = ()> + Send;

    /// Process shutdown. Emits the farewell status once.
    fn stop(&self);

    fn status(&self) -> SinkStatus;

    fn is_running(&self) -> bool {
        self.status() == SinkStatus::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SinkStatus {
    Running = 0,
    Failed = 1,
    Completed = 2,
    Stopped = 3,
}

impl SinkStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SinkStatus::Running,
            1 => SinkStatus::Failed,
            2 => SinkStatus::Completed,
            _ => SinkStatus::Stopped,
        }
    }
}

/// Running flag shared by all sink variants.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    status: AtomicU8,
    farewell_sent: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            status: AtomicU8::new(SinkStatus::Running as u8),
            farewell_sent: AtomicBool::new(false),
        }
    }

    pub(crate) fn status(&self) -> SinkStatus {
        SinkStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.status() == SinkStatus::Running
    }

    /// Leaves `Running` for `to`. Returns false if the sink had already left it.
    pub(crate) fn finish(&self, to: SinkStatus) -> bool {
        self.status
            .compare_exchange(
                SinkStatus::Running as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Internal fault: failed regardless of the current status.
    pub(crate) fn fail(&self) {
        self.status.store(SinkStatus::Failed as u8, Ordering::Release);
    }

    pub(crate) fn farewell(&self) {
        if !self.farewell_sent.swap(true, Ordering::AcqRel) {
            info!("Completed!");
            info!("Thank you for using RealTimeKql!");
        }
    }
}

/// Sink variants selectable from configuration.
pub enum Sink {
    Console(ConsoleSink),
    Queued(QueuedSink),
    Store(BatchingStoreSink<RestConnection>),
}

impl Sink {
    pub fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        let sink = match config {
            SinkConfig::Console => Sink::Console(ConsoleSink::new()),
            SinkConfig::Queued(options) => Sink::Queued(QueuedSink::new(options.max_events)),
            SinkConfig::Store(options) => {
                options.validate()?;
                let connection = RestConnection::new(&options.connection_settings())?;
                Sink::Store(BatchingStoreSink::new(
                    connection,
                    StoreSinkOptions::from(options),
                ))
            }
        };
        Ok(sink)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Sink::Console(_) => "console",
            Sink::Queued(_) => "queued",
            Sink::Store(_) => "store",
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        match self {
            Sink::Console(sink) => sink.metrics(),
            Sink::Queued(sink) => sink.metrics(),
            Sink::Store(sink) => sink.metrics(),
        }
    }
}

impl OutputSink for Sink {
    async fn consume(&self, record: Record) {
        match self {
            Sink::Console(sink) => sink.consume(record).await,
            Sink::Queued(sink) => sink.consume(record).await,
            Sink::Store(sink) => sink.consume(record).await,
        }
    }

    fn consume_error(&self, error: anyhow::Error) {
        match self {
            Sink::Console(sink) => sink.consume_error(error),
            Sink::Queued(sink) => sink.consume_error(error),
            Sink::Store(sink) => sink.consume_error(error),
        }
    }

    async fn consume_completed(&self) {
        match self {
            Sink::Console(sink) => sink.consume_completed().await,
            Sink::Queued(sink) => sink.consume_completed().await,
            Sink::Store(sink) => sink.consume_completed().await,
        }
    }

    fn stop(&self) {
        match self {
            Sink::Console(sink) => sink.stop(),
            Sink::Queued(sink) => sink.stop(),
            Sink::Store(sink) => sink.stop(),
        }
    }

    fn status(&self) -> SinkStatus {
        match self {
            Sink::Console(sink) => sink.status(),
            Sink::Queued(sink) => sink.status(),
            Sink::Store(sink) => sink.status(),
        }
    }
}
