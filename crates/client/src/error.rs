use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Category assigned to a failed request.
///
/// Recomputed for every failure from the response metadata; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport-level failure: offline, connection refused, timed out.
    Network,
    /// HTTP 401: credentials missing, expired, or rejected.
    Authentication,
    /// HTTP 403: authenticated but not allowed.
    Authorization,
    /// HTTP 400 carrying a field-level error map.
    Validation,
    /// Domain-level rejection (plain 400, 404, 409, 422).
    Business,
    /// Server-side or unexpected failure (5xx and everything unclassified).
    System,
}

impl ErrorCategory {
    /// Classify a failed response. First match wins:
    ///
    /// 1. no connectivity or no HTTP status at all (transport failure)
    /// 2. 401
    /// 3. 403
    /// 4. 400 with field errors / 400 without
    /// 5. 404, 409, 422
    /// 6. 5xx
    /// 7. fallback
    pub fn classify(offline: bool, status: Option<StatusCode>, body: Option<&ErrorBody>) -> Self {
        if offline {
            return Self::Network;
        }
        let Some(status) = status else {
            return Self::Network;
        };
        match status.as_u16() {
            401 => Self::Authentication,
            403 => Self::Authorization,
            400 => {
                if body.is_some_and(ErrorBody::has_field_errors) {
                    Self::Validation
                } else {
                    Self::Business
                }
            }
            404 | 409 | 422 => Self::Business,
            _ => Self::System,
        }
    }
}

/// Error payload returned by the platform API, parsed leniently.
///
/// Validation failures carry `fieldErrors`, a map of field name to the list of
/// messages for that field. Anything the server sends that does not match this
/// shape degrades to an empty body rather than a parse error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorBody {
    /// Human-readable message from the server.
    pub message: Option<String>,
    /// Field name to error messages, present on validation failures.
    pub field_errors: Option<BTreeMap<String, Vec<String>>>,
}

impl ErrorBody {
    /// Parse a JSON value into an error body, tolerating unknown shapes.
    pub fn parse(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn has_field_errors(&self) -> bool {
        self.field_errors.as_ref().is_some_and(|m| !m.is_empty())
    }

    /// Aggregate all field errors into a single message, field by field in
    /// alphabetical order.
    pub fn aggregate_field_errors(&self) -> Option<String> {
        let fields = self.field_errors.as_ref()?;
        if fields.is_empty() {
            return None;
        }
        let joined = fields
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
            .collect::<Vec<_>>()
            .join("; ");
        Some(joined)
    }
}

/// Normalized error surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {reason}")]
    Network { reason: String },

    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("request failed with HTTP {status} for {url}")]
    Status {
        status: StatusCode,
        url: String,
        body: ErrorBody,
    },

    /// The session is no longer usable: the refresh token was missing, or the
    /// refresh call was rejected. The session store has already been wiped.
    #[error("session expired")]
    SessionExpired,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("unexpected response body: {reason}")]
    Decode { reason: String },
}

impl ApiError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// The HTTP status behind this error, if one was received at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message sent by the server, if the failure carried one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => body.message.as_deref(),
            _ => None,
        }
    }

    /// Field-level validation errors, if the failure carried them.
    pub fn error_body(&self) -> Option<&ErrorBody> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => ErrorCategory::Network,
            Self::Status { status, body, .. } => {
                ErrorCategory::classify(false, Some(*status), Some(body))
            }
            Self::SessionExpired => ErrorCategory::Authentication,
            Self::InvalidUrl { .. } | Self::Configuration { .. } | Self::Decode { .. } => {
                ErrorCategory::System
            }
        }
    }

    /// Whether the failure is transient enough to retry at all.
    ///
    /// Whether a retry actually happens is decided by [`crate::RetryPolicy`],
    /// which also checks the request method and attempt budget.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::SessionExpired
            | Self::InvalidUrl { .. }
            | Self::Configuration { .. }
            | Self::Decode { .. } => false,
        }
    }
}
