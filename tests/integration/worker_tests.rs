//! Worker loops against a mock action endpoint

use crate::common::{wait_until, Harness, TOKEN};
use feedpace::queue::ItemMetadata;
use feedpace::storage::{self, ActionOutcome, Storage};
use feedpace::{Automation, ItemStatus, RunState, StartOptions, StopReason};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

const FAVE_PATH: &str = r"^/api/collections/fave/.+$";

fn seed(automation: &Automation, items: &[(&str, i64)]) {
    for (key, ts) in items {
        automation
            .queue()
            .upsert(key, *ts, "manual", &ItemMetadata::default())
            .expect("Failed to seed item");
    }
}

fn attempts(automation: &Automation, key: &str) -> u32 {
    automation.queue().get(key).unwrap().unwrap().attempts
}

#[tokio::test]
async fn test_worker_drains_queue_newest_first() {
    let h = Harness::start().await;
    let faves = h.set.get("faves").unwrap();
    seed(faves, &[("old", 1), ("new", 2)]);

    Mock::given(method("POST"))
        .and(path_regex(FAVE_PATH))
        .and(body_string_contains(format!("access_token={}", TOKEN)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "fave-1"})))
        .expect(2)
        .mount(&h.server)
        .await;

    let status = faves.start(StartOptions::default()).unwrap();
    assert!(status.running);

    wait_until("queue drained", || {
        faves.get_status().queue_stats.map(|s| s.done) == Some(2)
    })
    .await;
    let status = faves.shutdown(Duration::from_secs(2)).await;

    assert!(!status.running);
    assert_eq!(status.stop_reason, Some(StopReason::Requested));
    assert_eq!(status.processed, 2);
    assert_eq!(status.errors, 0);

    let requests = h.server.received_requests().await.unwrap();
    let paths: Vec<_> = requests.iter().map(|r| r.url.path().to_string()).collect();
    assert_eq!(
        paths,
        vec!["/api/collections/fave/new", "/api/collections/fave/old"]
    );

    let item = faves.queue().get("new").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Done);
    assert_eq!(item.remote_id.as_deref(), Some("fave-1"));

    let log = faves.recent_actions(10).unwrap();
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn test_comment_sends_template_content() {
    let h = Harness::start().await;
    let comments = h.set.get("comments").unwrap();
    seed(comments, &[("d1", 1)]);

    Mock::given(method("POST"))
        .and(path("/api/comments/post/d1"))
        .and(body_string_contains("body=Thanks+for+sharing%21"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"commentid": "x"})))
        .expect(1)
        .mount(&h.server)
        .await;

    comments
        .start(StartOptions {
            template: Some("thanks".to_string()),
        })
        .unwrap();
    wait_until("comment sent", || {
        comments.get_status().processed == 1
    })
    .await;
    comments.shutdown(Duration::from_secs(2)).await;

    let log = comments.recent_actions(1).unwrap();
    assert_eq!(log[0].content.as_deref(), Some("Thanks for sharing!"));
    assert_eq!(log[0].remote_id, None);
}

#[tokio::test]
async fn test_rate_limit_leaves_item_pending() {
    let h = Harness::start().await;
    let faves = h.set.get("faves").unwrap();
    seed(faves, &[("a", 1)]);

    Mock::given(method("POST"))
        .and(path_regex(FAVE_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&h.server)
        .await;

    faves.start(StartOptions::default()).unwrap();
    wait_until("rate limit observed", || {
        faves.get_status().last_error.is_some()
    })
    .await;

    let status = faves.get_status();
    assert!(status.running);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.errors, 0);

    let item = faves.queue().get("a").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.attempts, 0);
    assert!(!item.claimed);

    // The worker is now sleeping for the server's Retry-After
    assert_eq!(faves.requester().recommended_delay(), Duration::from_secs(30));

    // stop() interrupts the pacing sleep
    let status = faves.shutdown(Duration::from_secs(2)).await;
    assert_eq!(status.state, RunState::Stopped);
    assert_eq!(h.server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_auth_error_stops_worker() {
    let h = Harness::start().await;
    let faves = h.set.get("faves").unwrap();
    seed(faves, &[("a", 1), ("b", 2)]);

    Mock::given(method("POST"))
        .and(path_regex(FAVE_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_token",
            "error_description": "Expired oAuth2 user token. The client should request a new one."
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    faves.start(StartOptions::default()).unwrap();
    wait_until("worker stopped", || {
        faves.get_status().state == RunState::Stopped
    })
    .await;

    let status = faves.get_status();
    assert!(!status.running);
    assert_eq!(status.stop_reason, Some(StopReason::AuthError));
    assert!(status.last_error.unwrap().contains("expired"));

    // An account-level fault is not the item's fault
    assert_eq!(attempts(faves, "b"), 0);
    assert_eq!(faves.queue_stats().unwrap().pending, 2);
}

#[tokio::test]
async fn test_restricted_account_stops_worker() {
    let h = Harness::start().await;
    let faves = h.set.get("faves").unwrap();
    seed(faves, &[("a", 1)]);

    Mock::given(method("POST"))
        .and(path_regex(FAVE_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_request",
            "error_description": "Account suspended for spam."
        })))
        .mount(&h.server)
        .await;

    faves.start(StartOptions::default()).unwrap();
    wait_until("worker stopped", || {
        faves.get_status().state == RunState::Stopped
    })
    .await;

    let status = faves.get_status();
    assert_eq!(status.stop_reason, Some(StopReason::AccountRestricted));
    assert_eq!(attempts(faves, "a"), 0);
}

#[tokio::test]
async fn test_circuit_breaker_trips() {
    let h = Harness::start_with(|c| c.worker.max_attempts = 10).await;
    let faves = h.set.get("faves").unwrap();
    seed(faves, &[("a", 1), ("b", 2), ("c", 3), ("d", 4), ("e", 5)]);

    Mock::given(method("POST"))
        .and(path_regex(FAVE_PATH))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&h.server)
        .await;

    faves.start(StartOptions::default()).unwrap();
    wait_until("circuit breaker", || {
        faves.get_status().state == RunState::Stopped
    })
    .await;

    let status = faves.get_status();
    assert!(!status.running);
    assert_eq!(status.stop_reason, Some(StopReason::CircuitBreaker));
    assert_eq!(status.errors, 3);
    assert_eq!(status.consecutive_failures, 3);

    // Writes are never retried internally: one request per counted failure
    assert_eq!(h.server.received_requests().await.unwrap().len(), 3);

    let total: u32 = faves
        .list_queue(None, 10)
        .unwrap()
        .iter()
        .map(|i| i.attempts)
        .sum();
    assert_eq!(total, 3);
    assert_eq!(faves.queue_stats().unwrap().failed, 0);
}

#[tokio::test]
async fn test_failures_exhaust_attempts_then_reset() {
    let h = Harness::start_with(|c| {
        c.worker.max_attempts = 2;
        c.worker.max_consecutive_failures = 2;
    })
    .await;
    let faves = h.set.get("faves").unwrap();
    seed(faves, &[("a", 1)]);

    Mock::given(method("POST"))
        .and(path_regex(FAVE_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&h.server)
        .await;

    faves.start(StartOptions::default()).unwrap();
    wait_until("worker stopped", || {
        faves.get_status().state == RunState::Stopped
    })
    .await;

    let item = faves.queue().get("a").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.attempts, 2);
    assert!(item.last_error.unwrap().contains("500"));

    assert_eq!(faves.reset_failed().unwrap(), 1);
    let item = faves.queue().get("a").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.attempts, 0);
}

#[tokio::test]
async fn test_deleted_target_fails_immediately() {
    let h = Harness::start().await;
    let faves = h.set.get("faves").unwrap();
    seed(faves, &[("gone", 2), ("ok", 1)]);

    Mock::given(method("POST"))
        .and(path("/api/collections/fave/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "invalid_request",
            "error_description": "Deviation not found."
        })))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/collections/fave/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&h.server)
        .await;

    faves.start(StartOptions::default()).unwrap();
    wait_until("both items handled", || {
        faves
            .queue_stats()
            .map(|s| s.pending == 0)
            .unwrap_or(false)
    })
    .await;
    let status = faves.shutdown(Duration::from_secs(2)).await;

    assert_eq!(status.processed, 1);
    assert_eq!(status.errors, 1);
    assert_eq!(status.consecutive_failures, 0);

    let gone = faves.queue().get("gone").unwrap().unwrap();
    assert_eq!(gone.status, ItemStatus::Failed);
    assert_eq!(gone.attempts, 1);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let h = Harness::start().await;
    let faves = h.set.get("faves").unwrap();

    faves.start(StartOptions::default()).unwrap();
    let stopping = faves.stop();
    assert!(!stopping.running);
    assert!(matches!(
        stopping.state,
        RunState::Stopping | RunState::Stopped
    ));

    wait_until("worker stopped", || {
        faves.get_status().state == RunState::Stopped
    })
    .await;

    let restarted = faves.start(StartOptions::default()).unwrap();
    assert!(restarted.running);
    assert!(restarted.stop_reason.is_none());
    faves.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_new_token_after_auth_error() {
    let h = Harness::start().await;
    let faves = h.set.get("faves").unwrap();
    seed(faves, &[("a", 1)]);

    Mock::given(method("POST"))
        .and(path_regex(FAVE_PATH))
        .and(body_string_contains(format!("access_token={}", TOKEN)))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_token",
            "error_description": "Expired oAuth2 user token."
        })))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(FAVE_PATH))
        .and(body_string_contains("access_token=fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "r-1"})))
        .expect(1)
        .mount(&h.server)
        .await;

    faves.start(StartOptions::default()).unwrap();
    wait_until("worker stopped", || {
        faves.get_status().state == RunState::Stopped
    })
    .await;
    assert_eq!(faves.get_status().stop_reason, Some(StopReason::AuthError));

    h.set.set_access_token("fresh");
    faves.start(StartOptions::default()).unwrap();
    wait_until("item done", || {
        faves.get_status().processed == 1
    })
    .await;
    faves.shutdown(Duration::from_secs(2)).await;

    let item = faves.queue().get("a").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Done);
    assert_eq!(item.remote_id.as_deref(), Some("r-1"));
}

#[tokio::test]
async fn test_logged_send_is_not_repeated_after_restart() {
    let h = Harness::start().await;
    let faves = h.set.get("faves").unwrap();
    seed(faves, &[("a", 1)]);

    // A previous run sent the action but never marked the item done
    faves.queue().claim_one_pending().unwrap().unwrap();
    storage::lock(h.set.storage())
        .unwrap()
        .record_action("faves", "a", ActionOutcome::Sent, Some("r-7"), None, None)
        .unwrap();

    Mock::given(method("POST"))
        .and(path_regex(FAVE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "again"})))
        .expect(0)
        .mount(&h.server)
        .await;

    faves.start(StartOptions::default()).unwrap();
    let item = faves.queue().get("a").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Done);
    assert_eq!(item.remote_id.as_deref(), Some("r-7"));
    assert!(!item.claimed);

    let status = faves.shutdown(Duration::from_secs(2)).await;
    assert_eq!(status.processed, 0);
}
