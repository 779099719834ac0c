//! Error-to-notice mapping.
//!
//! The client does not render anything; it emits [`Notice`] descriptors on the
//! event channel and the embedding app decides how to present them.

use std::time::Duration;

use crate::error::{ApiError, ErrorCategory};

const SHORT_NOTICE: Duration = Duration::from_secs(5);
const MEDIUM_NOTICE: Duration = Duration::from_secs(6);
const LONG_NOTICE: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A user-facing message derived from a failed request.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    /// Suggested display duration. `None` means the notice must stay until
    /// dismissed; only authentication failures use it, since they require the
    /// user to sign in again.
    pub duration: Option<Duration>,
}

impl Notice {
    pub fn is_persistent(&self) -> bool {
        self.duration.is_none()
    }

    /// The notice emitted on forced logout.
    pub fn session_expired() -> Self {
        Self {
            severity: Severity::Error,
            message: "Your session has expired. Please sign in again.".to_string(),
            duration: None,
        }
    }

    /// Map a surfaced error to its notice.
    ///
    /// Validation failures aggregate field errors into one message; business
    /// failures show the server message as-is.
    pub fn from_error(error: &ApiError) -> Self {
        match error.category() {
            ErrorCategory::Network => Self {
                severity: Severity::Warning,
                message: "Unable to reach the server. Check your connection and try again."
                    .to_string(),
                duration: Some(LONG_NOTICE),
            },
            ErrorCategory::Authentication => Self::session_expired(),
            ErrorCategory::Authorization => Self {
                severity: Severity::Error,
                message: "You do not have permission to perform this action.".to_string(),
                duration: Some(MEDIUM_NOTICE),
            },
            ErrorCategory::Validation => {
                let message = error
                    .error_body()
                    .and_then(|body| body.aggregate_field_errors())
                    .unwrap_or_else(|| "Please correct the highlighted fields.".to_string());
                Self {
                    severity: Severity::Warning,
                    message,
                    duration: Some(MEDIUM_NOTICE),
                }
            }
            ErrorCategory::Business => {
                let message = error
                    .server_message()
                    .unwrap_or("The request could not be completed.")
                    .to_string();
                Self {
                    severity: Severity::Warning,
                    message,
                    duration: Some(SHORT_NOTICE),
                }
            }
            ErrorCategory::System => Self {
                severity: Severity::Error,
                message: "Something went wrong on our side. Please try again shortly.".to_string(),
                duration: Some(LONG_NOTICE),
            },
        }
    }
}

/// Events broadcast by the client to the embedding app.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The session was forcibly ended (refresh failed or no refresh token).
    SessionExpired,
    /// A user-facing notice derived from a surfaced error.
    Notice(Notice),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorBody;
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn authentication_notices_are_persistent() {
        let notice = Notice::from_error(&ApiError::SessionExpired);
        assert_eq!(notice.severity, Severity::Error);
        assert!(notice.is_persistent());
    }

    #[test]
    fn validation_notice_aggregates_field_errors() {
        let error = ApiError::Status {
            status: StatusCode::BAD_REQUEST,
            url: "https://api.tavola.example/api/restaurants".to_string(),
            body: ErrorBody::parse(&json!({
                "fieldErrors": {
                    "name": ["is required"],
                    "phone": ["must be a valid phone number"]
                }
            })),
        };
        let notice = Notice::from_error(&error);
        assert_eq!(notice.severity, Severity::Warning);
        assert_eq!(
            notice.message,
            "name: is required; phone: must be a valid phone number"
        );
        assert!(!notice.is_persistent());
    }

    #[test]
    fn business_notice_uses_server_message() {
        let error = ApiError::Status {
            status: StatusCode::CONFLICT,
            url: "https://api.tavola.example/api/orders".to_string(),
            body: ErrorBody::parse(&json!({ "message": "This table is already reserved" })),
        };
        let notice = Notice::from_error(&error);
        assert_eq!(notice.message, "This table is already reserved");
    }

    #[test]
    fn network_and_system_notices_auto_dismiss() {
        let network = Notice::from_error(&ApiError::Network {
            reason: "offline".to_string(),
        });
        assert!(!network.is_persistent());

        let system = Notice::from_error(&ApiError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            url: "https://api.tavola.example/api/orders".to_string(),
            body: ErrorBody::default(),
        });
        assert!(!system.is_persistent());
        assert_eq!(system.severity, Severity::Error);
    }
}
