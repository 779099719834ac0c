//! Single-flight token refresh.
//!
//! Any number of requests can hit a 401 at the same time; only the first one
//! issues the refresh call. Everyone else queues behind it and is released,
//! in arrival order, with the outcome of that one call. A failed refresh is
//! fatal for the session: the store is wiped and the embedding app is told to
//! send the user back to login.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Method;
use reqwest::header::HeaderMap;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{AuthResponse, RefreshRequest};
use crate::error::ApiError;
use crate::http::{HttpTransport, TransportRequest};
use crate::notify::{ClientEvent, Notice};
use crate::session::{Credentials, SessionStore};

/// Why a refresh cycle ended without a new token. Cloned into every waiter.
#[derive(Debug, Clone, thiserror::Error)]
enum RefreshFailure {
    #[error("refresh rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("network failure during refresh: {reason}")]
    Network { reason: String },

    #[error("malformed refresh response: {reason}")]
    Malformed { reason: String },
}

type RefreshOutcome = Result<String, RefreshFailure>;
type Waiter = oneshot::Sender<RefreshOutcome>;

enum RefreshState {
    Idle,
    /// One refresh call in flight; everyone else waits here, FIFO.
    Refreshing { waiters: Vec<Waiter> },
}

enum Role {
    Leader,
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

/// Coordinates token refresh across concurrent requests.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    transport: Arc<dyn HttpTransport>,
    session: Arc<SessionStore>,
    events: broadcast::Sender<ClientEvent>,
    refresh_url: Url,
    headers: HeaderMap,
    request_timeout: Duration,
    /// Total refresh calls actually issued, for diagnostics.
    refresh_calls: AtomicU64,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<SessionStore>,
        events: broadcast::Sender<ClientEvent>,
        refresh_url: Url,
        headers: HeaderMap,
        request_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            transport,
            session,
            events,
            refresh_url,
            headers,
            request_timeout,
            refresh_calls: AtomicU64::new(0),
        }
    }

    /// Number of refresh HTTP calls issued so far.
    pub fn refresh_call_count(&self) -> u64 {
        self.refresh_calls.load(Ordering::Relaxed)
    }

    /// Resolve a 401 into a fresh access token, or a terminal session failure.
    ///
    /// The lock is never held across an await: arrival order decides who
    /// refreshes and who waits, then the leader runs the call unlocked and
    /// drains the queue when it resolves.
    pub async fn fresh_token(&self) -> Result<String, ApiError> {
        let Some(refresh_token) = self.session.refresh_token() else {
            debug!("401 with no stored refresh token; forcing logout without a refresh call");
            self.force_logout();
            return Err(ApiError::SessionExpired);
        };

        let role = {
            let mut state = self.state.lock();
            match &mut *state {
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing {
                        waiters: Vec::new(),
                    };
                    Role::Leader
                }
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    debug!(queued = waiters.len(), "refresh in flight; queueing request");
                    Role::Waiter(rx)
                }
            }
        };

        match role {
            Role::Leader => {
                let outcome = self.run_refresh(&refresh_token).await;

                // Drain and go idle atomically so late arrivals start a new
                // cycle instead of waiting on a resolved one.
                let waiters = {
                    let mut state = self.state.lock();
                    match std::mem::replace(&mut *state, RefreshState::Idle) {
                        RefreshState::Refreshing { waiters } => waiters,
                        RefreshState::Idle => Vec::new(),
                    }
                };

                debug!(waiters = waiters.len(), success = outcome.is_ok(), "releasing queued requests");
                for waiter in waiters {
                    let _ = waiter.send(outcome.clone());
                }

                match outcome {
                    Ok(token) => Ok(token),
                    Err(failure) => {
                        warn!(error = %failure, "token refresh failed; session is over");
                        self.force_logout();
                        Err(ApiError::SessionExpired)
                    }
                }
            }
            Role::Waiter(rx) => match rx.await {
                Ok(Ok(token)) => Ok(token),
                Ok(Err(_)) | Err(_) => Err(ApiError::SessionExpired),
            },
        }
    }

    /// Issue the one refresh call for this cycle, straight through the
    /// transport so it is never intercepted for auth itself.
    async fn run_refresh(&self, refresh_token: &str) -> RefreshOutcome {
        self.refresh_calls.fetch_add(1, Ordering::Relaxed);
        info!("refreshing access token");

        let body = serde_json::to_value(RefreshRequest { refresh_token }).map_err(|e| {
            RefreshFailure::Malformed {
                reason: e.to_string(),
            }
        })?;
        let request = TransportRequest {
            method: Method::POST,
            url: self.refresh_url.clone(),
            headers: self.headers.clone(),
            body: Some(body),
        };

        let response =
            match tokio::time::timeout(self.request_timeout, self.transport.send(request)).await {
                Err(_) => {
                    return Err(RefreshFailure::Network {
                        reason: "refresh request timed out".to_string(),
                    });
                }
                Ok(Err(e)) => {
                    return Err(RefreshFailure::Network {
                        reason: e.to_string(),
                    });
                }
                Ok(Ok(response)) => response,
            };

        if !response.status.is_success() {
            return Err(RefreshFailure::Rejected {
                status: response.status.as_u16(),
            });
        }

        let body = response.body.ok_or_else(|| RefreshFailure::Malformed {
            reason: "empty refresh response".to_string(),
        })?;
        let auth: AuthResponse =
            serde_json::from_value(body).map_err(|e| RefreshFailure::Malformed {
                reason: e.to_string(),
            })?;

        let credentials = Credentials::from_expires_in(
            auth.access_token.clone(),
            auth.refresh_token,
            auth.expires_in,
        );
        self.session.store_credentials(&credentials);
        info!(expires_at = %credentials.expires_at, "access token refreshed");

        Ok(auth.access_token)
    }

    /// Fatal path: wipe the session and tell the embedding app.
    fn force_logout(&self) {
        warn!("session expired; wiping session state");
        self.session.clear_all();
        let _ = self.events.send(ClientEvent::SessionExpired);
        let _ = self.events.send(ClientEvent::Notice(Notice::session_expired()));
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_url", &self.refresh_url.as_str())
            .field("refresh_calls", &self.refresh_call_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{TransportError, TransportResponse};
    use async_trait::async_trait;
    use reqwest::StatusCode;

    /// Transport that must never be called.
    struct UnreachableTransport;

    #[async_trait]
    impl HttpTransport for UnreachableTransport {
        async fn send(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            panic!("no request expected, got {} {}", request.method, request.url);
        }
    }

    fn coordinator(session: Arc<SessionStore>) -> RefreshCoordinator {
        let (events, _) = broadcast::channel(16);
        RefreshCoordinator::new(
            Arc::new(UnreachableTransport),
            session,
            events,
            Url::parse("https://api.tavola.example/api/auth/refresh").unwrap(),
            HeaderMap::new(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn missing_refresh_token_logs_out_without_a_call() {
        let session = Arc::new(SessionStore::new());
        session.insert("cart.draft", serde_json::json!(["pizza"]));
        let coordinator = coordinator(session.clone());
        let mut events = coordinator.events.subscribe();

        let result = coordinator.fresh_token().await;

        assert!(matches!(result, Err(ApiError::SessionExpired)));
        assert_eq!(coordinator.refresh_call_count(), 0);
        // Forced logout wiped the whole session area.
        assert!(session.is_empty());
        assert!(matches!(events.try_recv(), Ok(ClientEvent::SessionExpired)));
    }

    #[tokio::test]
    async fn rejected_refresh_maps_to_session_expired() {
        struct Reject401;

        #[async_trait]
        impl HttpTransport for Reject401 {
            async fn send(
                &self,
                _request: TransportRequest,
            ) -> Result<TransportResponse, TransportError> {
                Ok(TransportResponse {
                    status: StatusCode::UNAUTHORIZED,
                    body: None,
                    body_len: 0,
                })
            }
        }

        let session = Arc::new(SessionStore::new());
        session.store_credentials(&Credentials::from_expires_in("stale", "ref-1", 3600));
        let (events, _) = broadcast::channel(16);
        let coordinator = RefreshCoordinator::new(
            Arc::new(Reject401),
            session.clone(),
            events,
            Url::parse("https://api.tavola.example/api/auth/refresh").unwrap(),
            HeaderMap::new(),
            Duration::from_secs(5),
        );

        let result = coordinator.fresh_token().await;

        assert!(matches!(result, Err(ApiError::SessionExpired)));
        assert_eq!(coordinator.refresh_call_count(), 1);
        assert!(session.is_empty());
    }
}
