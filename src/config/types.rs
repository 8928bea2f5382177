use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Feedpace
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
}

impl Config {
    /// Looks up a feed by its source name
    pub fn feed(&self, source: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.source == source)
    }

    /// Looks up the action configured for a queue
    pub fn action(&self, queue: &str) -> Option<&ActionConfig> {
        self.actions.iter().find(|a| a.queue == queue)
    }

    /// Returns the templates attached to a queue
    pub fn templates_for<'a>(&'a self, queue: &'a str) -> impl Iterator<Item = &'a TemplateConfig> {
        self.templates.iter().filter(move |t| t.queue == queue)
    }
}

/// Remote API endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL that feed and action paths are appended to
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (milliseconds)
    #[serde(rename = "request-timeout-ms", default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// OAuth access token; may also come from the environment
    #[serde(rename = "access-token", default)]
    pub access_token: Option<String>,
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_user_agent() -> String {
    format!("feedpace/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Request pacing and backoff configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Delay recommended when the server sent no `Retry-After` (milliseconds)
    #[serde(rename = "default-delay-ms")]
    pub default_delay_ms: u64,

    /// Upper bound applied to any server `Retry-After` value (milliseconds)
    #[serde(rename = "max-retry-after-ms")]
    pub max_retry_after_ms: u64,

    /// Internal retries for idempotent GET requests on transient failures
    #[serde(rename = "transient-retries")]
    pub transient_retries: u32,

    /// First backoff step for transient retries (milliseconds)
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,

    /// Largest backoff step for transient retries (milliseconds)
    #[serde(rename = "backoff-max-ms")]
    pub backoff_max_ms: u64,

    /// Share one requester (and pacing watermark) across all queues
    #[serde(rename = "shared-pacing")]
    pub shared_pacing: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 5_000,
            max_retry_after_ms: 60_000,
            transient_retries: 2,
            backoff_base_ms: 5_000,
            backoff_max_ms: 60_000,
            shared_pacing: false,
        }
    }
}

impl RateLimitConfig {
    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    pub fn max_retry_after(&self) -> Duration {
        Duration::from_millis(self.max_retry_after_ms)
    }
}

/// Background worker behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Attempts before an item is marked failed
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Consecutive non-rate-limit failures that stop the worker
    #[serde(rename = "max-consecutive-failures")]
    pub max_consecutive_failures: u32,

    /// Sleep between polls of an empty queue (milliseconds)
    #[serde(rename = "idle-poll-interval-ms")]
    pub idle_poll_interval_ms: u64,

    /// How long `shutdown` waits for the worker task (milliseconds)
    #[serde(rename = "shutdown-timeout-ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_consecutive_failures: 5,
            idle_poll_interval_ms: 2_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl WorkerConfig {
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// A paginated listing that feeds one queue
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Unique name of this collector; also the cursor key
    pub source: String,

    /// Queue that collected items are upserted into
    pub queue: String,

    /// Listing path relative to the API base URL
    pub path: String,

    /// Items requested per page
    #[serde(rename = "page-limit", default = "default_page_limit")]
    pub page_limit: u32,

    /// Pages fetched per collection run; unlimited when absent
    #[serde(rename = "max-pages", default)]
    pub max_pages: Option<u32>,

    /// Rate-limit retries for a single page before the run is aborted
    #[serde(rename = "max-rate-limit-retries", default = "default_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Extra query parameters sent with every page request
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Where the normalized fields live in each result object
    #[serde(default)]
    pub fields: FieldMap,
}

fn default_page_limit() -> u32 {
    50
}

fn default_rate_limit_retries() -> u32 {
    3
}

/// Dotted paths locating item fields inside a listing result
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FieldMap {
    pub key: String,
    pub title: String,
    pub author: String,
    pub url: String,
    pub ts: String,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            key: "deviationid".to_string(),
            title: "title".to_string(),
            author: "author.username".to_string(),
            url: "url".to_string(),
            ts: "published_time".to_string(),
        }
    }
}

/// The write action a queue's worker performs
#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    /// Queue this action drains
    pub queue: String,

    pub kind: ActionKind,

    /// Action path relative to the API base URL; the item key is appended
    pub path: String,

    /// Form field that carries the selected content
    #[serde(rename = "content-field", default = "default_content_field")]
    pub content_field: String,
}

fn default_content_field() -> String {
    "body".to_string()
}

/// Kinds of remote write actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Favourite,
    Comment,
    Broadcast,
}

impl ActionKind {
    /// Returns true if the action sends rendered text along with the request
    pub fn needs_content(&self) -> bool {
        matches!(self, Self::Comment | Self::Broadcast)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Favourite => "favourite",
            Self::Comment => "comment",
            Self::Broadcast => "broadcast",
        }
    }
}

/// A message template attached to a queue
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    pub queue: String,
    pub name: String,
    /// Text with optional `{a|b|c}` choice blocks
    pub body: String,
}
