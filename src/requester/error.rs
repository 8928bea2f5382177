//! Failure taxonomy for remote calls
//!
//! Every non-2xx response and transport failure is classified into one of
//! these variants before it reaches a collector or worker, so callers branch
//! on the kind of failure instead of on raw status codes.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Words in an error description that mean the platform restricted the account
const RESTRICTION_MARKERS: &[&str] = &["spam", "banned", "suspended", "abuse", "violation"];

/// Error body value the platform uses for an exhausted request budget
const THRESHOLD_ERROR: &str = "user_api_threshold";

/// Errors surfaced by the requester
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("Rate limited (HTTP {status})")]
    RateLimited {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("Authentication failed (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Account restricted (HTTP {status}): {message}")]
    AccountRestricted { status: u16, message: String },

    #[error("Client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response body: {0}")]
    Decode(String),
}

/// Coarse classification used by the worker to pick a reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    Auth,
    AccountRestricted,
    Client,
    Server,
    Network,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Auth => "auth",
            Self::AccountRestricted => "account_restricted",
            Self::Client => "client",
            Self::Server => "server",
            Self::Network => "network",
        }
    }
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::AccountRestricted { .. } => ErrorKind::AccountRestricted,
            Self::Client { .. } => ErrorKind::Client,
            // A malformed body from a 2xx is the server's fault
            Self::Server { .. } | Self::Decode(_) => ErrorKind::Server,
            Self::Network(_) => ErrorKind::Network,
        }
    }

    /// HTTP status carried by the error, if there was a response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { status, .. }
            | Self::Auth { status, .. }
            | Self::AccountRestricted { status, .. }
            | Self::Client { status, .. }
            | Self::Server { status, .. } => Some(*status),
            Self::Network(_) | Self::Decode(_) => None,
        }
    }

    /// Returns true for failures that may succeed if the same request is repeated
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Server | ErrorKind::Network)
    }

    /// Returns true for account-level faults that must stop a worker
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Auth | ErrorKind::AccountRestricted)
    }

    /// Returns true if the target itself no longer exists
    pub fn is_target_gone(&self) -> bool {
        matches!(self, Self::Client { status: 404 | 410, .. })
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network("request timed out".to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {}", err))
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Classifies a response into success or a [`RequestError`]
///
/// # Arguments
///
/// * `status` - HTTP status code
/// * `retry_after` - Parsed and capped `Retry-After` header, if any
/// * `body` - Response body parsed as JSON (`Value::Null` if it was not JSON)
///
/// # Returns
///
/// * `Ok(())` - The call succeeded
/// * `Err(RequestError)` - The failure, classified
pub fn classify_response(
    status: u16,
    retry_after: Option<Duration>,
    body: &Value,
) -> Result<(), RequestError> {
    let error_code = body.get("error").and_then(Value::as_str).unwrap_or("");
    let description = body
        .get("error_description")
        .and_then(Value::as_str)
        .unwrap_or("");

    // The budget signal can arrive with any status, including 200
    if status == 429 || status == 503 || error_code == THRESHOLD_ERROR {
        return Err(RequestError::RateLimited {
            status,
            retry_after,
        });
    }

    if (200..300).contains(&status) {
        return Ok(());
    }

    let message = describe(status, error_code, description);

    if (400..500).contains(&status) && is_restriction(description) {
        return Err(RequestError::AccountRestricted { status, message });
    }

    match status {
        401 | 403 => {
            let expired = error_code == "invalid_token"
                || description.to_ascii_lowercase().contains("expired");
            let message = if expired {
                "access token expired".to_string()
            } else {
                message
            };
            Err(RequestError::Auth { status, message })
        }
        500..=599 => Err(RequestError::Server { status, message }),
        _ => Err(RequestError::Client { status, message }),
    }
}

fn describe(status: u16, error_code: &str, description: &str) -> String {
    match (error_code.is_empty(), description.is_empty()) {
        (_, false) => description.to_string(),
        (false, true) => error_code.to_string(),
        (true, true) => format!("HTTP {}", status),
    }
}

fn is_restriction(description: &str) -> bool {
    let lower = description.to_ascii_lowercase();
    RESTRICTION_MARKERS.iter().any(|marker| lower.contains(marker))
}
