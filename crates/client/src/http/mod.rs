//! The request pipeline: credential attachment, dispatch, 401 recovery,
//! transient retry, and telemetry for every attempt.

mod transport;

pub use transport::{
    HttpTransport, ReqwestTransport, TransportError, TransportRequest, TransportResponse,
};

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{AuthResponse, LoginRequest, RefreshCoordinator};
use crate::config::ClientConfig;
use crate::error::{ApiError, ErrorBody};
use crate::notify::{ClientEvent, Notice};
use crate::session::{Credentials, SessionStore};
use crate::telemetry::RequestLog;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// An outgoing API request. Paths are origin-relative and start with `/`.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::PUT,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }
}

/// A successful response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Option<serde_json::Value>,
}

impl ApiResponse {
    /// Deserialize the response body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let value = self.body.clone().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value).map_err(|e| ApiError::decode(e.to_string()))
    }
}

/// Authenticated client for the platform API.
///
/// Owns the session store, the refresh coordinator, and the telemetry log;
/// cheap to clone and share. All state is per client instance, nothing is
/// global, so tests can run as many isolated clients as they want.
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    transport: Arc<dyn HttpTransport>,
    session: Arc<SessionStore>,
    refresh: Arc<RefreshCoordinator>,
    telemetry: Arc<RequestLog>,
    events: broadcast::Sender<ClientEvent>,
    identification_headers: HeaderMap,
}

impl ApiClient {
    /// Build a client with the production `reqwest` transport.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Self::with_transport(config, transport)
    }

    /// Build a client over an injected transport.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ApiError> {
        let identification_headers = config.identification_headers()?;
        let refresh_url = config.endpoint(&config.refresh_path)?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let session = Arc::new(SessionStore::new());
        let telemetry = Arc::new(RequestLog::new(config.telemetry_capacity));
        let refresh = Arc::new(RefreshCoordinator::new(
            transport.clone(),
            session.clone(),
            events.clone(),
            refresh_url,
            identification_headers.clone(),
            config.request_timeout,
        ));

        Ok(Self {
            config: Arc::new(config),
            transport,
            session,
            refresh,
            telemetry,
            events,
            identification_headers,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn telemetry(&self) -> &RequestLog {
        &self.telemetry
    }

    /// Subscribe to client events (notices, session expiry).
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Number of token refresh calls issued over this client's lifetime.
    pub fn refresh_call_count(&self) -> u64 {
        self.refresh.refresh_call_count()
    }

    pub fn current_user(&self) -> Option<serde_json::Value> {
        self.session.current_user()
    }

    /// Authenticate and store the session credentials plus the current-user
    /// blob from the response.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let body = serde_json::to_value(LoginRequest { username, password })
            .map_err(|e| ApiError::decode(e.to_string()))?;
        let response = self
            .dispatch(ApiRequest::post(self.config.login_path.clone(), body))
            .await?;

        let auth: AuthResponse = response.json()?;
        let credentials = Credentials::from_expires_in(
            auth.access_token,
            auth.refresh_token,
            auth.expires_in,
        );
        self.session.store_credentials(&credentials);
        if let Some(user) = auth.user {
            self.session.store_current_user(user);
        }

        info!(username = %username, expires_at = %credentials.expires_at, "login successful");
        Ok(())
    }

    /// End the session locally. Wipes the whole session area, including any
    /// cached values unrelated to credentials.
    pub fn logout(&self) {
        info!("logging out; wiping session state");
        self.session.clear_all();
    }

    /// Send a request through the full pipeline.
    ///
    /// Public paths get no credentials and never trigger refresh logic. A 401
    /// on a protected path goes through the refresh coordinator and the
    /// request is retried exactly once with the new token; transient failures
    /// on idempotent requests are retried per the configured policy. Every
    /// attempt lands in telemetry, and surfaced errors emit a notice.
    pub async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.config.endpoint(&request.path)?;
        let public = self.config.is_public_path(&request.path);

        let mut retries_spent: u32 = 0;
        let mut auth_retried = false;

        loop {
            match self.send_once(&request, &url, public).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !public
                        && !auth_retried
                        && error.status() == Some(StatusCode::UNAUTHORIZED)
                    {
                        auth_retried = true;
                        match self.refresh.fresh_token().await {
                            Ok(_) => {
                                debug!(path = %request.path, "token refreshed; retrying request once");
                                continue;
                            }
                            Err(auth_error) => return Err(auth_error),
                        }
                    }

                    let decision =
                        self.config
                            .retry
                            .decision(&request.method, &error, retries_spent);
                    if decision.should_retry {
                        retries_spent += 1;
                        warn!(
                            path = %request.path,
                            attempt = retries_spent,
                            delay_ms = decision.delay.as_millis() as u64,
                            error = %error,
                            "retrying after transient failure"
                        );
                        tokio::time::sleep(decision.delay).await;
                        continue;
                    }

                    self.emit_notice(&error);
                    return Err(error);
                }
            }
        }
    }

    /// One attempt: headers, timeout, telemetry, status check.
    async fn send_once(
        &self,
        request: &ApiRequest,
        url: &Url,
        public: bool,
    ) -> Result<ApiResponse, ApiError> {
        let mut headers = self.identification_headers.clone();
        if !public && let Some(credentials) = self.session.credentials() {
            let bearer = format!("Bearer {}", credentials.access_token);
            let value = HeaderValue::from_str(&bearer)
                .map_err(|e| ApiError::configuration(format!("invalid access token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let pending = self
            .telemetry
            .begin(&request.method, url.as_str(), request.body.as_ref());

        let transport_request = TransportRequest {
            method: request.method.clone(),
            url: url.clone(),
            headers,
            body: request.body.clone(),
        };

        let outcome = tokio::time::timeout(
            self.config.request_timeout,
            self.transport.send(transport_request),
        )
        .await;

        match outcome {
            Err(_) => {
                self.telemetry.complete(pending, None, None);
                Err(ApiError::Timeout {
                    after: self.config.request_timeout,
                })
            }
            Ok(Err(transport_error)) => {
                self.telemetry.complete(pending, None, None);
                Err(ApiError::from(transport_error))
            }
            Ok(Ok(response)) => {
                self.telemetry
                    .complete(pending, Some(response.status), Some(response.body_len));
                if response.status.is_success() {
                    Ok(ApiResponse {
                        status: response.status,
                        body: response.body,
                    })
                } else {
                    let body = response
                        .body
                        .as_ref()
                        .map(ErrorBody::parse)
                        .unwrap_or_default();
                    Err(ApiError::Status {
                        status: response.status,
                        url: url.to_string(),
                        body,
                    })
                }
            }
        }
    }

    /// Session-expiry notices come from the coordinator's forced logout;
    /// everything else is notified here when it surfaces to the caller.
    fn emit_notice(&self, error: &ApiError) {
        if matches!(error, ApiError::SessionExpired) {
            return;
        }
        debug!(category = ?error.category(), error = %error, "surfacing error to caller");
        let _ = self.events.send(ClientEvent::Notice(Notice::from_error(error)));
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url.as_str())
            .field("telemetry_len", &self.telemetry.len())
            .finish()
    }
}
