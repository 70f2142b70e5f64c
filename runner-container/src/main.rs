use anyhow::{Context, Result};
use futures::{Stream, stream};
use output_core::telemetry::init_tracing;
use output_core::{Ingestor, OutputSink, Record, Sink, load_config};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// This is the entry point for running the output stage as a long-running process
/// on container hosting services.
///
/// What it does at a high-level:
///     Load config from the file named by the first argument, or from `OUTPUT_CONFIG`.
///     Read newline-delimited JSON records from stdin and forward them to the sink
///     until stdin closes or a shutdown signal is received.
///     Stop the sink and report its counters.
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config =
        load_config(config_path.as_deref()).context("Failed to load output configuration")?;
    let sink = Sink::from_config(&config.sink).context("Failed to build sink")?;
    info!(sink = sink.kind(), "output pipeline starting");

    let ingestor = Ingestor::new(sink);
    tokio::select! {
        forwarded = ingestor.run(stdin_records()) => {
            info!(forwarded, "input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received");
        }
    }

    let sink = ingestor.sink();
    sink.stop();
    let metrics = sink.metrics();
    info!(
        received = metrics.records_received,
        dropped = metrics.records_dropped,
        uploaded = metrics.records_uploaded,
        batches = metrics.batches_uploaded,
        status = ?sink.status(),
        "output pipeline finished"
    );
    Ok(())
}

/// Parses stdin as one JSON object per line. Blank lines are skipped; the first
/// unreadable or malformed line ends the stream with an error.
fn stdin_records() -> impl Stream<Item = Result<Record>> {
    let lines = BufReader::new(tokio::io::stdin()).lines();
    stream::unfold(Some(lines), |state| async move {
        let mut lines = state?;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some((parse_record(&line), Some(lines))),
                Ok(None) => return None,
                Err(e) => return Some((Err(e).context("Failed to read stdin"), None)),
            }
        }
    })
}

fn parse_record(line: &str) -> Result<Record> {
    let json: serde_json::Value =
        serde_json::from_str(line).context("Input line is not valid JSON")?;
    Ok(Record::from_json(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use output_core::Value;

    #[test]
    fn test_parse_record_keeps_field_order() {
        let record = parse_record(r#"{"b": 1, "a": "x"}"#).unwrap();
        let names: Vec<_> = record.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(record.get("a"), Some(&Value::from("x")));
    }

    #[test]
    fn test_parse_record_rejects_non_objects() {
        assert!(parse_record("[1, 2]").is_err());
        assert!(parse_record("{not json").is_err());
    }
}
