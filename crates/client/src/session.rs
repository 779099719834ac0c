//! Session-scoped state: credentials and cached session values.
//!
//! The backing store is an in-process map with tab-session semantics: nothing
//! survives a restart. Credentials are mutated only by login, refresh-success,
//! and logout; logout wipes the whole session area, not just the credential
//! keys.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

pub const KEY_ACCESS_TOKEN: &str = "auth.access_token";
pub const KEY_REFRESH_TOKEN: &str = "auth.refresh_token";
pub const KEY_TOKEN_EXPIRY: &str = "auth.token_expiry";
pub const KEY_CURRENT_USER: &str = "auth.current_user";

/// Bearer credentials for the platform API.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry of the access token, derived from the most recent
    /// login or refresh response.
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    /// Build credentials from an auth response's relative expiry.
    pub fn from_expires_in(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_secs: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: Utc::now() + Duration::seconds(expires_in_secs as i64),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Session-scoped key-value area shared by the whole client.
///
/// Holds the credential keys, the current-user blob, and whatever else the
/// embedding app caches for the session. `clear_all` is the logout path and
/// removes everything at once.
#[derive(Debug, Default)]
pub struct SessionStore {
    values: RwLock<HashMap<String, Value>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.values.write().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.write().remove(key)
    }

    /// Wipe the entire session area. Used by logout and forced logout.
    pub fn clear_all(&self) {
        let mut values = self.values.write();
        let dropped = values.len();
        values.clear();
        debug!(dropped_keys = dropped, "session store cleared");
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Read stored credentials, failing closed on expiry.
    ///
    /// An expired access token behaves as if no credentials exist: the access
    /// token and expiry are dropped from the store. The refresh token is kept;
    /// it is the input to the next refresh cycle and has its own lifetime.
    pub fn credentials(&self) -> Option<Credentials> {
        let snapshot = {
            let values = self.values.read();
            let access = values.get(KEY_ACCESS_TOKEN)?.as_str()?.to_string();
            let refresh = values.get(KEY_REFRESH_TOKEN)?.as_str()?.to_string();
            let expires_at = values
                .get(KEY_TOKEN_EXPIRY)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<DateTime<Utc>>().ok())?;
            Credentials {
                access_token: access,
                refresh_token: refresh,
                expires_at,
            }
        };

        if snapshot.is_expired() {
            debug!(expires_at = %snapshot.expires_at, "stored access token expired; dropping it");
            let mut values = self.values.write();
            values.remove(KEY_ACCESS_TOKEN);
            values.remove(KEY_TOKEN_EXPIRY);
            return None;
        }

        Some(snapshot)
    }

    /// Store credentials from a login or refresh-success response.
    pub fn store_credentials(&self, credentials: &Credentials) {
        let mut values = self.values.write();
        values.insert(
            KEY_ACCESS_TOKEN.to_string(),
            Value::String(credentials.access_token.clone()),
        );
        values.insert(
            KEY_REFRESH_TOKEN.to_string(),
            Value::String(credentials.refresh_token.clone()),
        );
        values.insert(
            KEY_TOKEN_EXPIRY.to_string(),
            Value::String(credentials.expires_at.to_rfc3339()),
        );
    }

    /// Drop the credential keys only. The rest of the session survives.
    pub fn clear_credentials(&self) {
        let mut values = self.values.write();
        values.remove(KEY_ACCESS_TOKEN);
        values.remove(KEY_REFRESH_TOKEN);
        values.remove(KEY_TOKEN_EXPIRY);
    }

    /// The refresh token, readable even when the access token has expired.
    pub fn refresh_token(&self) -> Option<String> {
        self.values
            .read()
            .get(KEY_REFRESH_TOKEN)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn store_current_user(&self, user: Value) {
        self.insert(KEY_CURRENT_USER, user);
    }

    pub fn current_user(&self) -> Option<Value> {
        self.get(KEY_CURRENT_USER)
    }
}
