use futures::{Stream, StreamExt, future};
use tracing::debug;

use crate::record::Record;
use crate::sink::OutputSink;

/// The ingestor drives an upstream record stream into a sink.
pub struct Ingestor<S> {
    sink: S,
    concurrency: usize,
}

impl<S: OutputSink> Ingestor<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            concurrency: 1,
        }
    }

    /// Number of `consume` calls allowed in flight at once. Above one, record order
    /// within the window is not preserved.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Forwards every record of `records` and returns how many were forwarded.
    ///
    /// High-level logic:
    /// 1. Each `Ok` record goes to `consume`.
    /// 2. The first `Err` stops reading and is reported through `consume_error`.
    /// 3. If the stream ends cleanly, `consume_completed` flushes the sink.
    pub async fn run<St>(&self, records: St) -> usize
    where
        St: Stream<Item = anyhow::Result<Record>>,
    {
        let mut upstream_error = None;

        let forwarded = records
            .scan((), |_, item| {
                future::ready(match item {
                    Ok(record) => Some(record),
                    Err(err) => {
                        upstream_error = Some(err);
                        None
                    }
                })
            })
            .map(|record| self.sink.consume(record))
            .buffer_unordered(self.concurrency)
            .count()
            .await;

        match upstream_error {
            Some(err) => self.sink.consume_error(err),
            None => self.sink.consume_completed().await,
        }
        debug!(forwarded, "upstream stream finished");
        forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::sink::{QueuedSink, SinkStatus};
    use futures::stream;

    fn record(seq: i64) -> anyhow::Result<Record> {
        Ok([("seq", Value::from(seq))].into_iter().collect())
    }

    #[tokio::test]
    async fn test_clean_stream_completes_sink() {
        let ingestor = Ingestor::new(QueuedSink::new(100));
        let forwarded = ingestor
            .run(stream::iter(vec![record(1), record(2), record(3)]))
            .await;

        assert_eq!(forwarded, 3);
        assert_eq!(ingestor.sink().len(), 3);
        assert_eq!(ingestor.sink().status(), SinkStatus::Completed);
    }

    #[tokio::test]
    async fn test_upstream_error_stops_reading() {
        let ingestor = Ingestor::new(QueuedSink::new(100));
        let items = vec![
            record(1),
            Err(anyhow::anyhow!("event source disconnected")),
            record(3),
        ];

        let forwarded = ingestor.run(stream::iter(items)).await;

        assert_eq!(forwarded, 1);
        assert_eq!(ingestor.sink().status(), SinkStatus::Failed);
        assert_eq!(
            ingestor.sink().last_error().as_deref(),
            Some("event source disconnected")
        );
    }

    #[tokio::test]
    async fn test_concurrent_forwarding_delivers_everything() {
        let ingestor = Ingestor::new(QueuedSink::new(1000)).with_concurrency(8);
        let forwarded = ingestor
            .run(stream::iter((0..200).map(record)))
            .await;

        assert_eq!(forwarded, 200);
        assert_eq!(ingestor.sink().len(), 200);
    }
}
