//! Batching store sink
//!
//! Buffers records and bulk-loads them into one table of the remote store.
//!
//! - The first record defines the table schema; the table is provisioned once,
//!   before any upload.
//! - A batch is flushed when it holds `batch_size` records or when more than
//!   `flush_interval` has passed since the previous flush. Both are checked when
//!   the next record arrives, before it is buffered.
//! - Batch state sits behind one async mutex that stays locked for the whole
//!   upload, so uploads are serialized and callers wait while one is in flight.
//! - Delivery is at-most-once. A failed upload or provisioning step stops the
//!   sink and later records are dropped; records buffered when an upstream error
//!   arrives are discarded.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::StoreOptions;
use crate::errors::SinkError;
use crate::record::{Batch, Record};
use crate::schema::{TableSchema, drop_table_command, ingestion_time_policy_command};
use crate::sink::{Lifecycle, OutputSink, SinkStatus};
use crate::store::{IngestionProperties, StoreConnection};
use crate::telemetry::{MetricsSnapshot, SinkMetrics};

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct StoreSinkOptions {
    pub database: String,
    pub table: String,
    pub reset_table: bool,
    pub ingestion_time_policy: bool,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl StoreSinkOptions {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            reset_table: false,
            ingestion_time_policy: false,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_reset_table(mut self, reset_table: bool) -> Self {
        self.reset_table = reset_table;
        self
    }

    pub fn with_ingestion_time_policy(mut self, enabled: bool) -> Self {
        self.ingestion_time_policy = enabled;
        self
    }
}

impl From<&StoreOptions> for StoreSinkOptions {
    fn from(options: &StoreOptions) -> Self {
        StoreSinkOptions::new(&options.database, &options.table)
            .with_batch_size(options.batch_size)
            .with_flush_interval(options.flush_interval())
            .with_reset_table(options.reset_table)
            .with_ingestion_time_policy(options.ingestion_time_policy)
    }
}

/// Mutable state, only touched while the sink's mutex is held.
struct BatchState {
    building: Batch,
    upload_in_flight: bool,
    last_flush: Instant,
    initialized: bool,
}

impl BatchState {
    fn new(now: Instant) -> Self {
        Self {
            building: Batch::new(),
            upload_in_flight: false,
            last_flush: now,
            initialized: false,
        }
    }

    fn should_flush(&self, batch_size: usize, flush_interval: Duration, now: Instant) -> bool {
        self.building.len() >= batch_size
            || now.saturating_duration_since(self.last_flush) > flush_interval
    }

    /// Hands the building batch over to an upload and starts a fresh one.
    ///
    /// # Panics
    ///
    /// If a previous upload has not finished. The mutex discipline makes this
    /// unreachable, so reaching it means the state is corrupt.
    fn begin_upload(&mut self) -> Batch {
        if self.upload_in_flight {
            panic!(
                "flush started while a previous batch is still uploading ({} records buffered)",
                self.building.len()
            );
        }
        self.upload_in_flight = true;
        std::mem::take(&mut self.building)
    }

    fn finish_upload(&mut self, now: Instant) {
        self.upload_in_flight = false;
        self.last_flush = now;
    }
}

pub struct BatchingStoreSink<C> {
    connection: C,
    options: StoreSinkOptions,
    properties: IngestionProperties,
    state: Mutex<BatchState>,
    lifecycle: Lifecycle,
    metrics: SinkMetrics,
}

impl<C: StoreConnection> BatchingStoreSink<C> {
    pub fn new(connection: C, options: StoreSinkOptions) -> Self {
        let properties = IngestionProperties::new(&options.database, &options.table);
        Self {
            connection,
            options,
            properties,
            state: Mutex::new(BatchState::new(Instant::now())),
            lifecycle: Lifecycle::new(),
            metrics: SinkMetrics::default(),
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn options(&self) -> &StoreSinkOptions {
        &self.options
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Records waiting in the building batch.
    pub async fn buffered(&self) -> usize {
        self.state.lock().await.building.len()
    }

    /// Uploads whatever is buffered now and returns the number of records submitted.
    /// Once the sink has stopped running nothing is uploaded.
    pub async fn flush(&self) -> Result<usize, SinkError> {
        let mut state = self.state.lock().await;
        if !self.lifecycle.is_running() {
            self.discard_buffered(&mut state);
            return Ok(0);
        }
        self.flush_locked(&mut state).await
    }

    async fn flush_locked(&self, state: &mut BatchState) -> Result<usize, SinkError> {
        let batch = state.begin_upload();
        let records = batch.len();

        let result = if records > 0 {
            self.connection
                .ingest(batch, &self.properties)
                .await
                .map_err(|source| SinkError::Upload {
                    table: self.properties.table.clone(),
                    records,
                    source,
                })
        } else {
            Ok(())
        };
        state.finish_upload(Instant::now());
        result?;

        if records > 0 {
            self.metrics.batch_uploaded(records);
            info!(records, table = %self.properties.table, "uploaded batch");
        }
        Ok(records)
    }

    /// Creates the destination table from the first record's shape.
    async fn provision(&self, first: &Record) -> Result<(), SinkError> {
        let table = &self.options.table;
        let schema = TableSchema::infer(table, first);

        let mut commands = Vec::with_capacity(3);
        if self.options.reset_table {
            commands.push(drop_table_command(table));
        }
        commands.push(schema.create_merge_command());
        if self.options.ingestion_time_policy {
            commands.push(ingestion_time_policy_command(table));
        }

        for command in commands {
            info!(database = %self.options.database, %command, "provisioning table");
            self.connection
                .execute(&self.options.database, &command)
                .await
                .map_err(|source| SinkError::Provisioning {
                    table: table.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn try_consume(&self, record: Record) -> Result<(), SinkError> {
        let record = record.normalize();

        let mut state = self.state.lock().await;
        // Another caller may have stopped the sink while this one waited for the lock.
        if !self.lifecycle.is_running() {
            self.metrics.record_dropped();
            self.discard_buffered(&mut state);
            return Ok(());
        }
        self.metrics.record_received();
        record.ensure_encodable()?;

        if !state.initialized {
            self.provision(&record).await?;
            state.initialized = true;
        }

        if state.should_flush(
            self.options.batch_size,
            self.options.flush_interval,
            Instant::now(),
        ) {
            self.flush_locked(&mut state).await?;
        }

        state.building.push(record);
        Ok(())
    }

    fn discard_buffered(&self, state: &mut BatchState) {
        // A completed sink still owes its final flush.
        if self.lifecycle.status() == SinkStatus::Completed {
            return;
        }
        let discarded = std::mem::take(&mut state.building).len();
        if discarded > 0 {
            warn!(discarded, table = %self.options.table, "discarding buffered records");
        }
    }

    /// Drops the building batch if no flush holds the lock. Otherwise the next
    /// caller to take the lock drops it.
    fn try_discard_buffered(&self) {
        if let Ok(mut state) = self.state.try_lock() {
            self.discard_buffered(&mut state);
        }
    }

    fn fail(&self, err: SinkError) {
        self.lifecycle.fail();
        error!(
            kind = err.kind(),
            error = ?err,
            table = %self.options.table,
            "store sink failed; further records will be dropped"
        );
    }
}

impl<C: StoreConnection> OutputSink for BatchingStoreSink<C> {
    async fn consume(&self, record: Record) {
        if !self.lifecycle.is_running() {
            self.metrics.record_dropped();
            return;
        }

        if let Err(err) = self.try_consume(record).await {
            self.fail(err);
        }
    }

    fn consume_error(&self, error: anyhow::Error) {
        if self.lifecycle.finish(SinkStatus::Failed) {
            error!(error = ?error, "upstream reported an error; buffered records are discarded");
            self.try_discard_buffered();
        }
    }

    async fn consume_completed(&self) {
        if !self.lifecycle.finish(SinkStatus::Completed) {
            return;
        }
        info!("Stopping...");

        let mut state = self.state.lock().await;
        if let Err(err) = self.flush_locked(&mut state).await {
            self.fail(err);
        }
    }

    fn stop(&self) {
        if self.lifecycle.finish(SinkStatus::Stopped) {
            self.try_discard_buffered();
        }
        self.lifecycle.farewell();
    }

    fn status(&self) -> SinkStatus {
        self.lifecycle.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConnectionError;
    use crate::record::Value;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeStore {
        commands: StdMutex<Vec<String>>,
        batches: StdMutex<Vec<Batch>>,
        reject_ingest: bool,
    }

    impl StoreConnection for FakeStore {
        async fn execute(&self, _database: &str, command: &str) -> Result<(), ConnectionError> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(())
        }

        async fn ingest(
            &self,
            batch: Batch,
            _properties: &IngestionProperties,
        ) -> Result<(), ConnectionError> {
            if self.reject_ingest {
                return Err(ConnectionError::Rejected {
                    endpoint: "fake".to_string(),
                    status: 500,
                    body: "ingestion failed".to_string(),
                });
            }
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }
    }

    fn record(seq: i64) -> Record {
        [("seq", Value::from(seq)), ("source", Value::from("test"))]
            .into_iter()
            .collect()
    }

    fn sink(store: FakeStore, batch_size: usize) -> BatchingStoreSink<FakeStore> {
        BatchingStoreSink::new(
            store,
            StoreSinkOptions::new("Telemetry", "Events")
                .with_batch_size(batch_size)
                .with_flush_interval(Duration::from_secs(3600)),
        )
    }

    #[test]
    fn test_should_flush_on_size_or_age() {
        let start = Instant::now();
        let mut state = BatchState::new(start);
        assert!(!state.should_flush(2, Duration::from_secs(1), start));

        state.building.push(record(1));
        state.building.push(record(2));
        assert!(state.should_flush(2, Duration::from_secs(1), start));

        state.building.clear();
        assert!(!state.should_flush(2, Duration::from_secs(1), start + Duration::from_secs(1)));
        assert!(state.should_flush(2, Duration::from_secs(1), start + Duration::from_millis(1001)));
    }

    #[test]
    fn test_begin_upload_swaps_batches() {
        let start = Instant::now();
        let mut state = BatchState::new(start);
        state.building.push(record(1));

        let uploading = state.begin_upload();
        assert_eq!(uploading.len(), 1);
        assert!(state.building.is_empty());

        state.finish_upload(start + Duration::from_secs(5));
        assert!(!state.upload_in_flight);
        assert_eq!(state.last_flush, start + Duration::from_secs(5));
    }

    #[test]
    #[should_panic(expected = "still uploading")]
    fn test_reentrant_flush_fails_fast() {
        let mut state = BatchState::new(Instant::now());
        let _first = state.begin_upload();
        let _second = state.begin_upload();
    }

    #[tokio::test]
    async fn test_three_records_with_batch_size_two() {
        let sink = sink(FakeStore::default(), 2);
        for seq in 1..=3 {
            sink.consume(record(seq)).await;
        }

        {
            let batches = sink.connection().batches.lock().unwrap();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0], vec![record(1), record(2)]);
        }
        assert_eq!(sink.buffered().await, 1);

        sink.consume_completed().await;
        let batches = sink.connection().batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1], vec![record(3)]);
        assert_eq!(sink.status(), SinkStatus::Completed);
    }

    #[tokio::test]
    async fn test_provisioning_commands() {
        let store = FakeStore::default();
        let sink = BatchingStoreSink::new(
            store,
            StoreSinkOptions::new("Telemetry", "Events")
                .with_reset_table(true)
                .with_ingestion_time_policy(true),
        );

        sink.consume(record(1)).await;
        sink.consume(record(2)).await;

        let commands = sink.connection().commands.lock().unwrap();
        assert_eq!(
            *commands,
            vec![
                ".drop table Events ifexists".to_string(),
                ".create-merge table Events (seq: int, source: string)".to_string(),
                ".alter table Events policy ingestiontime true".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_failure_stops_sink() {
        let store = FakeStore {
            reject_ingest: true,
            ..FakeStore::default()
        };
        let sink = sink(store, 1);

        sink.consume(record(1)).await;
        sink.consume(record(2)).await;
        assert_eq!(sink.status(), SinkStatus::Failed);

        sink.consume(record(3)).await;
        assert_eq!(sink.metrics().records_dropped, 1);
        assert_eq!(sink.metrics().records_uploaded, 0);
    }

    #[tokio::test]
    async fn test_error_discards_buffered_records() {
        let sink = sink(FakeStore::default(), 10);
        sink.consume(record(1)).await;
        sink.consume_error(anyhow::anyhow!("query failed"));
        sink.consume_completed().await;

        assert!(sink.connection().batches.lock().unwrap().is_empty());
        assert_eq!(sink.status(), SinkStatus::Failed);
    }

    #[tokio::test]
    async fn test_flush_after_error_uploads_nothing() {
        let sink = sink(FakeStore::default(), 10);
        sink.consume(record(1)).await;
        sink.consume_error(anyhow::anyhow!("query failed"));

        assert_eq!(sink.buffered().await, 0);
        assert_eq!(sink.flush().await.unwrap(), 0);
        assert!(sink.connection().batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_after_stop_uploads_nothing() {
        let sink = sink(FakeStore::default(), 10);
        sink.consume(record(1)).await;
        sink.consume(record(2)).await;
        sink.stop();

        assert_eq!(sink.flush().await.unwrap(), 0);
        assert!(sink.connection().batches.lock().unwrap().is_empty());
        assert_eq!(sink.metrics().records_uploaded, 0);
    }

    #[tokio::test]
    async fn test_unencodable_record_stops_sink() {
        let sink = sink(FakeStore::default(), 10);
        sink.consume(record(1)).await;
        sink.consume([("latency", f64::NAN)].into_iter().collect()).await;

        assert_eq!(sink.status(), SinkStatus::Failed);
        sink.consume_completed().await;
        assert!(sink.connection().batches.lock().unwrap().is_empty());
        assert_eq!(sink.metrics().records_received, 2);
    }

    #[tokio::test]
    async fn test_explicit_flush_returns_count() {
        let sink = sink(FakeStore::default(), 10);
        sink.consume(record(1)).await;
        sink.consume(record(2)).await;

        assert_eq!(sink.flush().await.unwrap(), 2);
        assert_eq!(sink.flush().await.unwrap(), 0);
        assert_eq!(sink.metrics().batches_uploaded, 1);
    }
}
