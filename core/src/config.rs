use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::store::{ConnectionSettings, Credential, DEFAULT_AUTHORITY, DEFAULT_LOGIN_HOST};

pub const CONFIG_ENV_VAR: &str = "OUTPUT_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    pub version: u32,
    pub sink: SinkConfig,
}

/// Sink variant selected at configuration time.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    Console,
    Queued(QueuedOptions),
    Store(StoreOptions),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueuedOptions {
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

impl Default for QueuedOptions {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreOptions {
    pub cluster: String,
    pub database: String,
    pub table: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_authority")]
    pub authority: String,
    #[serde(default = "default_login_host")]
    pub login_host: String,
    /// Drop the destination table before the first batch.
    #[serde(default)]
    pub reset_table: bool,
    #[serde(default)]
    pub direct_ingest: bool,
    #[serde(default)]
    pub ingestion_time_policy: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl StoreOptions {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            cluster: self.cluster.clone(),
            credential: Credential {
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
            },
            authority: self.authority.clone(),
            login_host: self.login_host.clone(),
            direct_ingest: self.direct_ingest,
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("cluster", &self.cluster),
            ("database", &self.database),
            ("table", &self.table),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "batch_size must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn default_max_events() -> usize {
    1_000_000
}

fn default_authority() -> String {
    DEFAULT_AUTHORITY.to_string()
}

fn default_login_host() -> String {
    DEFAULT_LOGIN_HOST.to_string()
}

fn default_batch_size() -> usize {
    10_000
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

pub fn load_config(config_path: Option<&str>) -> Result<OutputConfig, ConfigError> {
    let config = match config_path {
        Some(path) => OutputConfig::from_file(path)?,
        None => OutputConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

impl OutputConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            origin: path.to_string(),
            error: Box::new(e),
        })?;
        Self::from_yaml(&content, path)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let config_str = std::env::var(CONFIG_ENV_VAR).map_err(|_| ConfigError::MissingField {
            field: CONFIG_ENV_VAR.to_string(),
        })?;
        Self::from_yaml(&config_str, CONFIG_ENV_VAR)
    }

    fn from_yaml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::LoadFailed {
            origin: origin.to_string(),
            error: Box::new(e),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid {
                message: format!("unsupported config version {}", self.version),
            });
        }
        match &self.sink {
            SinkConfig::Console => Ok(()),
            SinkConfig::Queued(options) if options.max_events == 0 => {
                Err(ConfigError::ValidationFailed {
                    reason: "max_events must be greater than zero".to_string(),
                })
            }
            SinkConfig::Queued(_) => Ok(()),
            SinkConfig::Store(options) => options.validate(),
        }
    }
}
