use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::ApiError;
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = concat!("tavola-client/", env!("CARGO_PKG_VERSION"));

/// Identification headers attached to every request.
pub const HEADER_CLIENT_TYPE: &str = "x-client-type";
pub const HEADER_API_VERSION: &str = "x-api-version";
pub const HEADER_REQUESTED_WITH: &str = "x-requested-with";

/// Configurable options for the API client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Origin of the platform API, e.g. `https://api.tavola.example`.
    pub base_url: Url,

    /// Path of the login endpoint.
    pub login_path: String,

    /// Path of the token refresh endpoint.
    pub refresh_path: String,

    /// Origin-relative path prefixes that never receive an Authorization
    /// header and never trigger refresh logic. Auth endpoints must be listed
    /// here or a rejected login would try to refresh itself.
    pub public_paths: Vec<String>,

    /// Overall deadline for a single request attempt.
    ///
    /// The source platform never pinned one down; 30 seconds is this client's
    /// documented default.
    pub request_timeout: Duration,

    /// Connection timeout (time to establish the initial connection).
    pub connect_timeout: Duration,

    /// Value of the `x-client-type` identification header.
    pub client_type: String,

    /// Value of the `x-api-version` identification header.
    pub api_version: String,

    /// User agent string.
    pub user_agent: String,

    /// Retry behavior for transient failures on idempotent requests.
    pub retry: RetryPolicy,

    /// Capacity of the request telemetry ring buffer.
    pub telemetry_capacity: usize,
}

impl ClientConfig {
    /// Create a config for the given API origin with default settings.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            login_path: "/api/auth/login".to_string(),
            refresh_path: "/api/auth/refresh".to_string(),
            public_paths: Self::default_public_paths(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            client_type: "desktop".to_string(),
            api_version: "v1".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry: RetryPolicy::default(),
            telemetry_capacity: 256,
        }
    }

    /// Auth endpoints plus the public content prefixes.
    pub fn default_public_paths() -> Vec<String> {
        [
            "/api/auth/login",
            "/api/auth/register",
            "/api/auth/password-reset",
            "/api/auth/refresh",
            "/public/",
            "/health",
            "/docs",
            "/static/",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Whether a request path is public (no credentials, no refresh logic).
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Resolve an origin-relative path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::invalid_url(path, e.to_string()))
    }

    /// Fixed identification headers sent with every request.
    ///
    /// Fails fast if a configured value is not a valid header value, so the
    /// client refuses to construct rather than failing per request.
    pub fn identification_headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static(HEADER_REQUESTED_WITH),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers.insert(
            HeaderName::from_static(HEADER_CLIENT_TYPE),
            HeaderValue::from_str(&self.client_type)
                .map_err(|e| ApiError::configuration(format!("invalid client type: {e}")))?,
        );
        headers.insert(
            HeaderName::from_static(HEADER_API_VERSION),
            HeaderValue::from_str(&self.api_version)
                .map_err(|e| ApiError::configuration(format!("invalid API version: {e}")))?,
        );
        Ok(headers)
    }
}
