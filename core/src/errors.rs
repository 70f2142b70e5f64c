use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Failed to provision table {table}")]
    Provisioning {
        table: String,
        #[source]
        source: ConnectionError,
    },

    #[error("Failed to ingest {records} records into table {table}")]
    Upload {
        table: String,
        records: usize,
        #[source]
        source: ConnectionError,
    },

    #[error("Store connection error: {0}")]
    Connection(#[from] ConnectionError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Failed to load configuration from {origin}: {error}")]
    LoadFailed {
        origin: String,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to acquire access token from {authority}: {reason}")]
    Authentication { authority: String, reason: String },

    #[error("Request to {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {endpoint} was rejected with status {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Failed to encode request body: {0}")]
    Encoding(#[from] SerializationError),
}

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {reason}")]
    Json { reason: String },

    #[error("Record must be a JSON object, got {found}")]
    NotAnObject { found: String },

    #[error("Field {field} holds a non-finite real number")]
    NonFiniteReal { field: String },
}

impl SinkError {
    /// Short category label used in fault logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SinkError::Config(_) => "config",
            SinkError::Serialization(_) => "serialization",
            SinkError::Provisioning { .. } => "provisioning",
            SinkError::Upload { .. } => "upload",
            SinkError::Connection(_) => "connection",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_keeps_source_chain() {
        let err = SinkError::Upload {
            table: "Events".to_string(),
            records: 42,
            source: ConnectionError::Rejected {
                endpoint: "https://ingest-example:443".to_string(),
                status: 503,
                body: "busy".to_string(),
            },
        };

        assert_eq!(err.kind(), "upload");
        assert_eq!(err.to_string(), "Failed to ingest 42 records into table Events");
        let source = std::error::Error::source(&err).expect("upload error has a source");
        assert!(source.to_string().contains("503"));
    }

    #[test]
    fn test_serialization_error_converts() {
        let err: SinkError = SerializationError::NonFiniteReal {
            field: "latency".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "serialization");
        assert_eq!(
            err.to_string(),
            "Serialization error: Field latency holds a non-finite real number"
        );
    }
}
