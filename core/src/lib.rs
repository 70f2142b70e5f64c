pub mod config;
pub mod errors;
pub mod ingestor;
pub mod record;
pub mod schema;
pub mod sink;
pub mod store;
pub mod telemetry;

pub use config::{OutputConfig, SinkConfig, load_config};
pub use errors::SinkError;
pub use ingestor::Ingestor;
pub use record::{Batch, Record, Value};
pub use sink::{BatchingStoreSink, ConsoleSink, OutputSink, QueuedSink, Sink, SinkStatus, StoreSinkOptions};
pub use store::{ConnectionSettings, Credential, IngestionProperties, RestConnection, StoreConnection};
