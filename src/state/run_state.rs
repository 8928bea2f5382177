//! Worker lifecycle states
//!
//! A worker moves `not_started -> running -> stopping -> stopped`. When it
//! stops, the reason is kept so callers can tell an operator's `stop()` apart
//! from a fatal condition.

use serde::Serialize;
use std::fmt;

/// Lifecycle state of a background worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

impl RunState {
    /// Returns true while the worker task is expected to be alive
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop()` was called
    Requested,

    /// The remote API rejected the credentials
    AuthError,

    /// Too many consecutive failures
    CircuitBreaker,

    /// The platform reported the account as restricted
    AccountRestricted,

    /// The worker task ended without going through `stop()`
    Crashed,
}

impl StopReason {
    /// Returns true if the worker stopped on its own because of a fault
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Requested)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::AuthError => "auth_error",
            Self::CircuitBreaker => "circuit_breaker",
            Self::AccountRestricted => "account_restricted",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
