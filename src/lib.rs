//! Feedpace: a rate-limited worker and pagination engine
//!
//! This crate automates repetitive interactions with a content platform's REST API
//! on behalf of a single account: it walks offset-paginated feeds into persistent
//! work queues, then drains each queue with a background worker that performs one
//! write action per item while honoring the server's `Retry-After` signals.

pub mod automation;
pub mod collector;
pub mod config;
pub mod content;
pub mod output;
pub mod queue;
pub mod requester;
pub mod state;
pub mod storage;
pub mod worker;

use thiserror::Error;

/// Main error type for Feedpace operations
#[derive(Debug, Error)]
pub enum FeedpaceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Request failed: {0}")]
    Request(#[from] requester::RequestError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Content selection failed: {0}")]
    Content(#[from] ContentError),

    #[error("Queue invariant violated for '{key}': {from} -> {to}")]
    QueueInvariantViolation {
        key: String,
        from: state::ItemStatus,
        to: state::ItemStatus,
    },

    #[error("Collection from '{feed}' aborted after {pages} page(s): {cause}")]
    Collect {
        feed: String,
        pages: u32,
        report: collector::CollectReport,
        #[source]
        cause: Box<FeedpaceError>,
    },

    #[error("Unknown feed source: {0}")]
    UnknownSource(String),

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Worker must be started from within a tokio runtime")]
    NoRuntime,

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors raised while choosing or rendering the text sent with an action
#[derive(Debug, Clone, Error)]
pub enum ContentError {
    #[error("No content available for this action")]
    NoContentAvailable,

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
}

/// Result type alias for Feedpace operations
pub type Result<T> = std::result::Result<T, FeedpaceError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use automation::{Automation, AutomationSet};
pub use collector::{CollectReport, FeedCollector};
pub use config::Config;
pub use queue::{QueueItem, QueueStats, UpsertOutcome, WorkQueue};
pub use requester::{ErrorKind, RequestError, Requester};
pub use state::{ItemStatus, RunState, StopReason};
pub use worker::{StartOptions, WorkerLoop, WorkerStatus};
