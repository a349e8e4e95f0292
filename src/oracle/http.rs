//! HTTP transport and the shared JSON request helper used by every source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::error::{classify, ApiKind, ErrorContext, NetworkKind, OracleError, RawFailure, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw HTTP response handed back by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Raw `Retry-After` header value, if present
    pub retry_after: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below the HTTP layer (DNS, TCP, TLS, timeout).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(format!("request timed out: {}", e))
        } else if e.is_connect() {
            Self::new(format!("connection failed: {}", e))
        } else {
            Self::new(format!("request failed: {}", e))
        }
    }
}

/// Transport contract for plain GET requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<HttpResponse, TransportError>;
}

/// Production transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> std::result::Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("oracle-feeder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(TransportError::from)?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<HttpResponse, TransportError> {
        let response = self.client.get(url).timeout(timeout).send().await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Shared request helper: hard timeout, status interpretation, JSON decode.
#[derive(Clone)]
pub struct JsonFetcher {
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl JsonFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET `url` and decode the body as JSON.
    ///
    /// The in-flight call is dropped once the timeout elapses, even if the
    /// transport does not enforce it itself.
    pub async fn get_json(&self, exchange: &str, operation: &str, url: &str) -> Result<Value> {
        let context = ErrorContext::new(operation).with_exchange(exchange);

        tracing::debug!(exchange = %exchange, url = %url, "Requesting price");

        let response = match tokio::time::timeout(self.timeout, self.transport.get(url, self.timeout)).await {
            Err(_) => {
                return Err(OracleError::network(
                    NetworkKind::Timeout,
                    format!(
                        "{}: request timed out after {}ms",
                        exchange,
                        self.timeout.as_millis()
                    ),
                    context,
                ))
            }
            Ok(Err(e)) => {
                return Err(classify(&RawFailure::message(e.message()), context).with_cause(e))
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            return Err(classify(
                &RawFailure::status(response.status, response.retry_after),
                context,
            ));
        }

        serde_json::from_str(&response.body).map_err(|e| {
            OracleError::api(
                ApiKind::InvalidResponse,
                format!("{}: response is not valid JSON: {}", exchange, e),
                context,
            )
            .with_cause(e)
        })
    }
}
