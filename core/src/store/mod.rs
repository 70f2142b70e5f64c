pub mod rest;

use std::future::Future;
use std::sync::Arc;

use crate::errors::ConnectionError;
use crate::record::Batch;

pub use rest::RestConnection;

pub const DEFAULT_AUTHORITY: &str = "microsoft.com";
pub const DEFAULT_LOGIN_HOST: &str = "https://login.microsoftonline.com";

/// Target of one bulk ingestion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionProperties {
    pub database: String,
    pub table: String,
}

impl IngestionProperties {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

/// Application credential used to authenticate against the store.
#[derive(Clone)]
pub struct Credential {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Connection parameters for one remote cluster.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Cluster address without scheme, e.g. `mycluster.westus.kusto.windows.net`.
    pub cluster: String,
    pub credential: Credential,
    pub authority: String,
    pub login_host: String,
    /// Send bulk ingestion to the data endpoint instead of the ingestion endpoint.
    pub direct_ingest: bool,
}

impl ConnectionSettings {
    pub fn new(cluster: impl Into<String>, credential: Credential) -> Self {
        Self {
            cluster: cluster.into(),
            credential,
            authority: DEFAULT_AUTHORITY.to_string(),
            login_host: DEFAULT_LOGIN_HOST.to_string(),
            direct_ingest: false,
        }
    }

    pub fn data_endpoint(&self) -> String {
        format!("https://{}:443", self.cluster)
    }

    pub fn ingest_endpoint(&self) -> String {
        if self.direct_ingest {
            self.data_endpoint()
        } else {
            format!("https://ingest-{}:443", self.cluster)
        }
    }
}

/// The remote analytical store as seen by a sink.
///
/// Implementations are shared between concurrent callers and must be thread-safe.
/// Request timeouts are the implementation's concern.
pub trait StoreConnection: Send + Sync {
    /// Runs a management command (table DDL) against `database`.
    fn execute(
        &self,
        database: &str,
        command: &str,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Bulk-loads `batch` into the table named by `properties`.
    fn ingest(
        &self,
        batch: Batch,
        properties: &IngestionProperties,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}

impl<C: StoreConnection> StoreConnection for Arc<C> {
    fn execute(
        &self,
        database: &str,
        command: &str,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send {
        (**self).execute(database, command)
    }

    fn ingest(
        &self,
        batch: Batch,
        properties: &IngestionProperties,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send {
        (**self).ingest(batch, properties)
    }
}
