//! Shared fixtures for integration tests

use feedpace::config::{
    ActionConfig, ActionKind, ApiConfig, Config, FeedConfig, FieldMap, RateLimitConfig,
    StorageConfig, TemplateConfig, WorkerConfig,
};
use feedpace::AutomationSet;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::MockServer;

pub const TOKEN: &str = "test-token";

/// Creates a test configuration against a mock server
///
/// Two categories: `faves` (fed by the `newest` feed) and `comments` (fed by
/// the `watch` feed, one template). Pacing is shortened to milliseconds.
pub fn create_test_config(server: &MockServer, db_path: &str) -> Config {
    Config {
        api: ApiConfig {
            base_url: format!("{}/api", server.uri()),
            user_agent: "feedpace-test/1.0".to_string(),
            request_timeout_ms: 5_000,
            access_token: Some(TOKEN.to_string()),
        },
        rate_limit: RateLimitConfig {
            default_delay_ms: 10,
            max_retry_after_ms: 60_000,
            transient_retries: 0,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            shared_pacing: false,
        },
        worker: WorkerConfig {
            max_attempts: 3,
            max_consecutive_failures: 3,
            idle_poll_interval_ms: 20,
            shutdown_timeout_ms: 2_000,
        },
        storage: StorageConfig {
            database_path: db_path.to_string(),
        },
        feeds: vec![
            FeedConfig {
                source: "newest".to_string(),
                queue: "faves".to_string(),
                path: "/browse/newest".to_string(),
                page_limit: 2,
                max_pages: None,
                max_rate_limit_retries: 2,
                params: Default::default(),
                fields: FieldMap::default(),
            },
            FeedConfig {
                source: "watch".to_string(),
                queue: "comments".to_string(),
                path: "/browse/watch".to_string(),
                page_limit: 2,
                max_pages: None,
                max_rate_limit_retries: 2,
                params: Default::default(),
                fields: FieldMap::default(),
            },
        ],
        actions: vec![
            ActionConfig {
                queue: "faves".to_string(),
                kind: ActionKind::Favourite,
                path: "/collections/fave".to_string(),
                content_field: "body".to_string(),
            },
            ActionConfig {
                queue: "comments".to_string(),
                kind: ActionKind::Comment,
                path: "/comments/post".to_string(),
                content_field: "body".to_string(),
            },
        ],
        templates: vec![TemplateConfig {
            queue: "comments".to_string(),
            name: "thanks".to_string(),
            body: "Thanks for sharing!".to_string(),
        }],
    }
}

/// A mock server plus automations over a temporary database
pub struct Harness {
    pub server: MockServer,
    pub config: Config,
    pub set: AutomationSet,
    _dir: TempDir,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(adjust: impl FnOnce(&mut Config)) -> Self {
        let server = MockServer::start().await;
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = dir.path().join("feedpace.db");

        let mut config = create_test_config(&server, &db_path.to_string_lossy());
        adjust(&mut config);
        let set = AutomationSet::from_config(&config, TOKEN).expect("Failed to build automations");

        Self {
            server,
            config,
            set,
            _dir: dir,
        }
    }
}

/// One listing result in the platform's shape
pub fn deviation(id: &str, published: i64) -> Value {
    json!({
        "deviationid": id,
        "title": format!("Deviation {}", id),
        "url": format!("https://example.com/art/{}", id),
        "published_time": published.to_string(),
        "author": {"username": "artist"}
    })
}

/// Polls `condition` until it holds, panicking after a few seconds
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
