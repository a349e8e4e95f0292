//! JSON-over-HTTP endpoints for the failover client
//!
//! A connection is a cloned reqwest client bound to one base URL. Timeouts,
//! transport failures and retryable statuses (408, 429, 5xx) are
//! recoverable; any other non-2xx answer means the request itself was
//! rejected and is returned without trying another endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::failover::EndpointConnector;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("{endpoint}: request timed out")]
    Timeout { endpoint: String },

    #[error("{endpoint}: HTTP {status}: {body}")]
    BadStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint}: network error: {message}")]
    Network { endpoint: String, message: String },

    #[error("{endpoint}: request rejected with HTTP {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },
}

impl EndpointError {
    /// Classify a non-2xx status.
    pub fn from_status(endpoint: &str, status: u16, body: impl Into<String>) -> Self {
        let endpoint = endpoint.to_string();
        let body = body.into();
        match status {
            408 | 429 | 500..=599 => Self::BadStatus {
                endpoint,
                status,
                body,
            },
            _ => Self::Rejected {
                endpoint,
                status,
                body,
            },
        }
    }

    fn from_reqwest(endpoint: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else {
            Self::Network {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Live handle on one endpoint.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpEndpoint {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, EndpointError> {
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| EndpointError::from_reqwest(&self.base_url, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EndpointError::from_reqwest(&self.base_url, e))?;

        if !status.is_success() {
            return Err(EndpointError::from_status(&self.base_url, status.as_u16(), body));
        }

        // An empty 2xx body decodes as JSON null
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| EndpointError::Network {
            endpoint: self.base_url.clone(),
            message: format!("invalid response body: {}", e),
        })
    }

    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, EndpointError> {
        self.send(self.client.get(self.url(path))).await
    }

    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, EndpointError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send(self.client.post(self.url(path)).json(body)).await
    }
}

/// Connector that optionally checks a health path before handing out the
/// connection.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Client,
    health_path: Option<String>,
}

impl HttpConnector {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            health_path: None,
        }
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = Some(path.into());
        self
    }
}

#[async_trait]
impl EndpointConnector for HttpConnector {
    type Connection = HttpEndpoint;
    type Error = EndpointError;

    async fn connect(&self, endpoint: &str, timeout: Duration) -> Result<HttpEndpoint, EndpointError> {
        let connection = HttpEndpoint {
            client: self.client.clone(),
            base_url: endpoint.trim_end_matches('/').to_string(),
            timeout,
        };

        if let Some(path) = &self.health_path {
            let response = self
                .client
                .get(connection.url(path))
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| EndpointError::from_reqwest(&connection.base_url, e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(EndpointError::BadStatus {
                    endpoint: connection.base_url.clone(),
                    status: status.as_u16(),
                    body: "health check failed".to_string(),
                });
            }
            tracing::debug!(endpoint = %connection.base_url, "Health check passed");
        }

        Ok(connection)
    }

    fn is_recoverable(&self, error: &EndpointError) -> bool {
        error.is_recoverable()
    }
}
