use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::{ConnectionError, SerializationError};
use crate::record::{Batch, Record};
use crate::store::{ConnectionSettings, Credential, IngestionProperties, StoreConnection};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Store connection over the cluster's REST management and streaming ingestion API.
///
/// Holds two handles: management commands go to the data endpoint, batches go to the
/// ingestion endpoint. Both share one bearer token obtained with the client credentials.
pub struct RestConnection {
    http: Client,
    data_endpoint: String,
    ingest_endpoint: String,
    token_endpoint: String,
    scope: String,
    authority: String,
    credential: Credential,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

impl RestConnection {
    pub fn new(settings: &ConnectionSettings) -> Result<Self, ConnectionError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConnectionError::Transport {
                endpoint: settings.data_endpoint(),
                source: e,
            })?;

        Ok(Self {
            http,
            data_endpoint: settings.data_endpoint(),
            ingest_endpoint: settings.ingest_endpoint(),
            token_endpoint: format!(
                "{}/{}/oauth2/v2.0/token",
                settings.login_host.trim_end_matches('/'),
                settings.authority
            ),
            scope: format!("https://{}/.default", settings.cluster),
            authority: settings.authority.clone(),
            credential: settings.credential.clone(),
            token: Mutex::new(None),
        })
    }

    /// Points both handles at explicit base URLs, e.g. a local emulator.
    pub fn with_endpoints(mut self, data: impl Into<String>, ingest: impl Into<String>) -> Self {
        self.data_endpoint = data.into();
        self.ingest_endpoint = ingest.into();
        self
    }

    pub fn data_endpoint(&self) -> &str {
        &self.data_endpoint
    }

    pub fn ingest_endpoint(&self) -> &str {
        &self.ingest_endpoint
    }

    async fn access_token(&self) -> Result<String, ConnectionError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let auth_error = |reason: String| ConnectionError::Authentication {
            authority: self.authority.clone(),
            reason,
        };

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credential.client_id.as_str()),
                ("client_secret", self.credential.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| auth_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(auth_error(format!("status {}: {}", status.as_u16(), body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| auth_error(e.to_string()))?;
        debug!(expires_in = token.expires_in, "acquired store access token");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(token.access_token)
    }

    async fn send(&self, endpoint: String, request: RequestBuilder) -> Result<(), ConnectionError> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ConnectionError::Transport {
                endpoint: endpoint.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectionError::Rejected {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

impl StoreConnection for RestConnection {
    async fn execute(&self, database: &str, command: &str) -> Result<(), ConnectionError> {
        let endpoint = format!("{}/v1/rest/mgmt", self.data_endpoint);
        debug!(database, command, "executing management command");
        let request = self
            .http
            .post(&endpoint)
            .json(&json!({ "db": database, "csl": command }));
        self.send(endpoint, request).await
    }

    async fn ingest(
        &self,
        batch: Batch,
        properties: &IngestionProperties,
    ) -> Result<(), ConnectionError> {
        let endpoint = format!(
            "{}/v1/rest/ingest/{}/{}",
            self.ingest_endpoint, properties.database, properties.table
        );
        let body = encode_multijson(&batch)?;
        let request = self
            .http
            .post(&endpoint)
            .query(&[("streamFormat", "multijson")])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        self.send(endpoint, request).await
    }
}

/// One JSON object per line.
pub fn encode_multijson(batch: &[Record]) -> Result<String, SerializationError> {
    let mut body = String::new();
    for record in batch {
        let line = serde_json::to_string(&record.to_json()?).map_err(|e| {
            SerializationError::Json {
                reason: e.to_string(),
            }
        })?;
        body.push_str(&line);
        body.push('\n');
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;

    #[test]
    fn test_encode_multijson_one_line_per_record() {
        let batch: Batch = vec![
            [("id", Value::from(1)), ("name", Value::from("a"))]
                .into_iter()
                .collect(),
            [("id", Value::from(2)), ("name", Value::from("b"))]
                .into_iter()
                .collect(),
        ];

        let body = encode_multijson(&batch).unwrap();
        assert_eq!(body, "{\"id\":1,\"name\":\"a\"}\n{\"id\":2,\"name\":\"b\"}\n");
    }

    #[test]
    fn test_encode_multijson_propagates_bad_values() {
        let batch: Batch = vec![[("x", f64::INFINITY)].into_iter().collect()];
        assert!(encode_multijson(&batch).is_err());
    }
}
