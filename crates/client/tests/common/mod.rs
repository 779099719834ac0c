//! Shared test support: a scriptable in-memory transport and client helpers.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use serde_json::json;
use url::Url;

use tavola_client::{
    ApiClient, ClientConfig, Credentials, HttpTransport, RetryPolicy, TransportError,
    TransportRequest, TransportResponse,
};

pub const STALE_TOKEN: &str = "stale-token";
pub const FRESH_TOKEN: &str = "fresh-token";
pub const LOGIN_TOKEN: &str = "login-token";
pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGIN_PATH: &str = "/api/auth/login";

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One request as seen by the fake server.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub bearer: Option<String>,
    pub headers: HeaderMap,
}

/// How the fake refresh endpoint behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    Grant,
    Reject,
    NetworkFail,
}

/// A scripted response for one call to a path.
#[derive(Debug, Clone)]
pub enum Scripted {
    Status(u16),
    Fail(TransportError),
    Delay(Duration, u16),
}

/// In-memory stand-in for the platform API.
///
/// Scripted responses (per path, consumed in order) take precedence. With no
/// script, the refresh and login endpoints follow their configured behavior
/// and every other path acts as a protected resource: 200 when the bearer
/// token matches `accept_token`, 401 otherwise.
pub struct MockTransport {
    refresh_mode: RefreshMode,
    refresh_delay: Duration,
    accept_token: Option<String>,
    script: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<RecordedCall>>,
    refresh_calls: AtomicU64,
}

impl MockTransport {
    pub fn new(refresh_mode: RefreshMode) -> Self {
        Self {
            refresh_mode,
            refresh_delay: Duration::from_millis(50),
            accept_token: None,
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            refresh_calls: AtomicU64::new(0),
        }
    }

    pub fn with_accept_token(mut self, token: &str) -> Self {
        self.accept_token = Some(token.to_string());
        self
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn script_path(&self, path: &str, responses: impl IntoIterator<Item = Scripted>) {
        self.script
            .lock()
            .entry(path.to_string())
            .or_default()
            .extend(responses);
    }

    pub fn refresh_call_count(&self) -> u64 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to_prefix(&self, prefix: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.path.starts_with(prefix))
            .cloned()
            .collect()
    }
}

fn status_response(code: u16) -> TransportResponse {
    let status = StatusCode::from_u16(code).expect("valid status code");
    let body = status.is_success().then(|| json!({ "ok": true }));
    let body_len = body.as_ref().map(|b| b.to_string().len() as u64).unwrap_or(0);
    TransportResponse {
        status,
        body,
        body_len,
    }
}

fn json_response(code: u16, body: serde_json::Value) -> TransportResponse {
    let body_len = body.to_string().len() as u64;
    TransportResponse {
        status: StatusCode::from_u16(code).expect("valid status code"),
        body: Some(body),
        body_len,
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let path = request.url.path().to_string();
        let bearer = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);

        self.calls.lock().push(RecordedCall {
            method: request.method.to_string(),
            path: path.clone(),
            bearer: bearer.clone(),
            headers: request.headers.clone(),
        });

        let scripted = {
            let mut script = self.script.lock();
            script.get_mut(&path).and_then(VecDeque::pop_front)
        };
        if let Some(item) = scripted {
            return match item {
                Scripted::Status(code) => Ok(status_response(code)),
                Scripted::Fail(error) => Err(error),
                Scripted::Delay(delay, code) => {
                    tokio::time::sleep(delay).await;
                    Ok(status_response(code))
                }
            };
        }

        if path == REFRESH_PATH {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.refresh_delay).await;
            return match self.refresh_mode {
                RefreshMode::Grant => Ok(json_response(
                    200,
                    json!({
                        "accessToken": FRESH_TOKEN,
                        "refreshToken": "rotated-refresh",
                        "expiresIn": 3600
                    }),
                )),
                RefreshMode::Reject => Ok(status_response(401)),
                RefreshMode::NetworkFail => Err(TransportError::Offline),
            };
        }

        if path == LOGIN_PATH {
            return Ok(json_response(
                200,
                json!({
                    "accessToken": LOGIN_TOKEN,
                    "refreshToken": "login-refresh",
                    "expiresIn": 3600,
                    "user": { "id": 7, "name": "Ada" }
                }),
            ));
        }

        if self.accept_token.is_some() && bearer == self.accept_token {
            Ok(json_response(200, json!({ "ok": true })))
        } else {
            Ok(status_response(401))
        }
    }
}

/// Fast-retry config pointed at the fake server.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new(Url::parse("https://api.tavola.example").unwrap());
    config.retry = RetryPolicy {
        max_retries: 2,
        delay_unit_ms: 1,
        max_delay_ms: 10,
        use_jitter: false,
    };
    config.request_timeout = Duration::from_secs(2);
    config
}

pub fn client_with(transport: Arc<MockTransport>) -> ApiClient {
    ApiClient::with_transport(test_config(), transport).expect("client should build")
}

/// Store credentials whose access token the fake server will reject.
pub fn seed_stale_credentials(client: &ApiClient) {
    client
        .session()
        .store_credentials(&Credentials::from_expires_in(
            STALE_TOKEN,
            "initial-refresh",
            3600,
        ));
}
