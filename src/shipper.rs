use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use google_logging2::api::{LogEntry, MonitoredResource, WriteLogEntriesRequest};
use reqwest::{Client, Response};

use crate::error::Error;
use crate::sink::{Connector, LogSink};

const DEFAULT_SERVICE_ENDPOINT: &str = "https://logging.googleapis.com";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Token caching
#[derive(Default)]
struct Token {
    token: Option<String>,
    renew_after: DateTime<Utc>,
}

async fn get_error_response(response: Response, context: String) -> Error {
    let status = response.status();

    let body = match response.bytes().await {
        Ok(bytes) => match serde_json::from_slice::<String>(&bytes) {
            Ok(json) => json,
            Err(_) => String::from_utf8_lossy(&bytes).to_string(),
        },
        Err(e) => format!("could not decode body of HTTP Error response: {e}"),
    };

    Error::HttpResponseError {
        context,
        status,
        body,
    }
}

impl Token {
    fn renew_after_from_expires_in(expires_in: u64) -> DateTime<Utc> {
        let renew_after = TimeDelta::seconds(expires_in.saturating_sub(60) as i64);
        Utc::now() + renew_after
    }

    async fn fetch_access_token(&mut self, client: &Client) -> Result<String, Error> {
        if let Some(token) = &self.token {
            if Utc::now() < self.renew_after {
                return Ok(token.clone());
            }
        }

        let response = client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| Error::ReqwestError {
                context: "performing HTTP GET token credentials from metadata server".to_string(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(get_error_response(response, "fetching token".to_string()).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::ReqwestError {
                context: "consuming response body of access token request".to_string(),
                source: e,
            })?;
        let token_data: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| Error::SerializeError {
                context: "deserializing token data".to_string(),
                source: e,
            })?;
        let token_str = token_data["access_token"]
            .as_str()
            .ok_or(Error::TokenNotFound)?
            .to_string();
        let expires_in = token_data["expires_in"]
            .as_u64()
            .ok_or(Error::TokenExpiryNotFound)?;

        self.token = Some(token_str.clone());
        self.renew_after = Self::renew_after_from_expires_in(expires_in);
        Ok(token_str)
    }
}

/// Buffers log entries in memory and sends them to the
/// [Google Logging API](https://cloud.google.com/logging/docs/reference/v2/rest)
/// on flush.
///
/// Only works in the context of
/// [workload identity](https://cloud.google.com/iam/docs/workload-identity-federation):
/// access tokens come from the GCE metadata server and are cached until
/// shortly before expiry.
///
/// Entries of a failed flush are dropped, not retried.
pub struct Shipper {
    client: Client,
    api_base_url: String,
    log_name: String,
    resource: MonitoredResource,
    buffer: Mutex<Vec<LogEntry>>,
    token: tokio::sync::Mutex<Token>,
}

impl Shipper {
    /// Creates a `Shipper` for the given project and log id, talking to the
    /// production API endpoint.
    pub fn new(project_id: &str, log_name: &str) -> Self {
        Self::with_api_base(project_id, log_name, DEFAULT_SERVICE_ENDPOINT)
    }

    /// Same as [`new`](Shipper::new) with the service endpoint replaced, for
    /// tests or API-compatible proxies.
    pub fn with_api_base(project_id: &str, log_name: &str, api_base: &str) -> Self {
        Shipper {
            client: Client::new(),
            api_base_url: api_base.trim_end_matches('/').to_string(),
            log_name: format!("projects/{}/logs/{}", project_id, log_name),
            resource: MonitoredResource {
                type_: Some("global".to_string()),
                labels: Some(HashMap::from([(
                    "project_id".to_string(),
                    project_id.to_string(),
                )])),
            },
            buffer: Mutex::new(Vec::new()),
            token: tokio::sync::Mutex::new(Token::default()),
        }
    }

    fn write_request(&self, entries: Vec<LogEntry>) -> WriteLogEntriesRequest {
        WriteLogEntriesRequest {
            log_name: Some(self.log_name.clone()),
            resource: Some(self.resource.clone()),
            entries: Some(entries),
            ..Default::default()
        }
    }

    async fn send_entries(&self, token: &str, body: WriteLogEntriesRequest) -> Result<(), Error> {
        let url = format!("{}/v2/entries:write", self.api_base_url);

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(get_error_response(
                response,
                "response when sending log entries to the Google Logging API".to_string(),
            )
            .await)
        }
    }
}

#[async_trait]
impl LogSink for Shipper {
    fn log(&self, mut entry: LogEntry) {
        if entry.timestamp.is_none() {
            entry.timestamp = Some(Utc::now());
        }
        self.buffer.lock().unwrap().push(entry);
    }

    async fn flush(&self) -> Result<(), Error> {
        let entries = {
            let mut buffer = self.buffer.lock().unwrap();
            std::mem::take(&mut *buffer)
        };
        if entries.is_empty() {
            return Ok(());
        }

        let token = {
            let mut token = self.token.lock().await;
            token.fetch_access_token(&self.client).await?
        };

        self.send_entries(&token, self.write_request(entries)).await
    }
}

/// [`Connector`] for the production API, used unless the builder is given
/// another one.
#[derive(Debug, Default)]
pub struct ApiConnector {
    api_base_url: Option<String>,
}

impl ApiConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points connected shippers at a replacement service endpoint.
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        ApiConnector {
            api_base_url: Some(api_base.into()),
        }
    }
}

impl Connector for ApiConnector {
    fn connect(&self, project_id: &str, log_name: &str) -> Result<Arc<dyn LogSink>, Error> {
        if project_id.is_empty() {
            return Err(Error::InvalidConfig("project id may not be empty".to_string()));
        }
        if log_name.is_empty() {
            return Err(Error::InvalidConfig("log name may not be empty".to_string()));
        }

        let api_base = self
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_ENDPOINT);
        Ok(Arc::new(Shipper::with_api_base(project_id, log_name, api_base)))
    }
}
