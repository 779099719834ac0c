//! Authenticated HTTP client for the Tavola platform API.
//!
//! The client wraps every request in a resilience pipeline:
//!
//! - credentials are attached automatically, except on allow-listed public
//!   paths (auth endpoints, public content);
//! - an expired access token is refreshed transparently, with a single-flight
//!   guarantee: no matter how many requests hit a 401 at once, exactly one
//!   refresh call goes out and everyone else queues behind it;
//! - failures are classified into a fixed set of categories, transient ones
//!   are retried with bounded backoff on idempotent requests, and the rest
//!   surface as normalized errors plus user-facing notices;
//! - every dispatch is recorded in a bounded telemetry ring buffer, with
//!   sensitive fields redacted.
//!
//! ```no_run
//! use tavola_client::{ApiClient, ApiRequest, ClientConfig};
//! use url::Url;
//!
//! # async fn run() -> Result<(), tavola_client::ApiError> {
//! let config = ClientConfig::new(Url::parse("https://api.tavola.example").unwrap());
//! let client = ApiClient::new(config)?;
//!
//! client.login("ada", "correct horse battery staple").await?;
//! let orders = client.dispatch(ApiRequest::get("/api/orders")).await?;
//! # let _ = orders;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod notify;
pub mod retry;
pub mod session;
pub mod telemetry;

pub use auth::{AuthResponse, RefreshCoordinator};
pub use config::ClientConfig;
pub use error::{ApiError, ErrorBody, ErrorCategory};
pub use http::{
    ApiClient, ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, TransportError,
    TransportRequest, TransportResponse,
};
pub use notify::{ClientEvent, Notice, Severity};
pub use retry::{RetryDecision, RetryPolicy};
pub use session::{Credentials, SessionStore};
pub use telemetry::{RequestLog, RequestLogEntry};
