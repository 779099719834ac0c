//! Transport seam between the request pipeline and the wire.
//!
//! The pipeline, the refresh coordinator, and the test suite all talk to the
//! same narrow trait, so the refresh call can bypass the authenticated
//! pipeline and tests can inject scripted transports.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::config::ClientConfig;
use crate::error::ApiError;

/// A fully prepared outgoing request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

/// A received response, body parsed as JSON when possible.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Option<serde_json::Value>,
    /// Raw response body size in bytes.
    pub body_len: u64,
}

/// Failure before any HTTP status was received.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("network unreachable")]
    Offline,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Other(String),
}

impl From<TransportError> for ApiError {
    fn from(error: TransportError) -> Self {
        ApiError::Network {
            reason: error.to_string(),
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by a configured `reqwest` client.
///
/// The per-request deadline is enforced by the pipeline, not here, so that
/// injected transports are covered by the same timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        let body_len = bytes.len() as u64;
        let body = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };

        Ok(TransportResponse {
            status,
            body,
            body_len,
        })
    }
}
