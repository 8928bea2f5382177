//! Collection runs against a mock listing endpoint

use crate::common::{deviation, Harness, TOKEN};
use feedpace::{FeedpaceError, ItemStatus};
use serde_json::json;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const NEWEST: &str = "/api/browse/newest";

async fn mount_page(h: &Harness, offset: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(NEWEST))
        .and(query_param("offset", offset))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&h.server)
        .await;
}

#[tokio::test]
async fn test_two_page_collection() {
    let h = Harness::start().await;

    mount_page(
        &h,
        "0",
        json!({
            "results": [deviation("a", 100), deviation("b", 200)],
            "has_more": true,
            "next_offset": 50
        }),
    )
    .await;
    mount_page(
        &h,
        "50",
        json!({"results": [deviation("c", 300)], "has_more": false}),
    )
    .await;

    let report = h.set.collect("newest", None).await.expect("Collection failed");
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.items_added, 3);
    assert_eq!(report.start_offset, 0);
    assert_eq!(report.final_offset, 50);

    let faves = h.set.get("faves").unwrap();
    let stats = faves.queue_stats().unwrap();
    assert_eq!(stats.pending, 3);

    // Page 2 carried no next_offset, so the cursor stays at the last advance
    assert_eq!(faves.cursor("newest").unwrap(), Some(50));

    let keys: Vec<_> = faves
        .list_pending(10)
        .unwrap()
        .into_iter()
        .map(|i| i.key)
        .collect();
    assert_eq!(keys, vec!["c", "b", "a"]);

    let item = faves.queue().get("c").unwrap().unwrap();
    assert_eq!(item.title.as_deref(), Some("Deviation c"));
    assert_eq!(item.author.as_deref(), Some("artist"));
    assert_eq!(item.source, "newest");
    assert_eq!(item.ordering_ts, 300);
}

#[tokio::test]
async fn test_requests_carry_token_and_limit() {
    let h = Harness::start().await;

    Mock::given(method("GET"))
        .and(path(NEWEST))
        .and(query_param("access_token", TOKEN))
        .and(query_param("limit", "2"))
        .and(query_param("offset", "0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"results": [deviation("a", 1)], "has_more": false})),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let report = h.set.collect("newest", None).await.unwrap();
    assert_eq!(report.items_added, 1);
}

#[tokio::test]
async fn test_max_pages_halts_despite_has_more() {
    let h = Harness::start().await;

    mount_page(
        &h,
        "0",
        json!({
            "results": [deviation("a", 1), deviation("b", 2)],
            "has_more": true,
            "next_offset": 2
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(NEWEST))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [deviation("c", 3)],
            "has_more": true,
            "next_offset": 4
        })))
        .expect(0)
        .mount(&h.server)
        .await;

    let report = h.set.collect("newest", Some(1)).await.unwrap();
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.final_offset, 2);
}

#[tokio::test]
async fn test_has_more_false_halts_before_max_pages() {
    let h = Harness::start().await;

    mount_page(
        &h,
        "0",
        json!({"results": [deviation("a", 1)], "has_more": false, "next_offset": 1}),
    )
    .await;

    let report = h.set.collect("newest", Some(10)).await.unwrap();
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.final_offset, 1);
}

#[tokio::test]
async fn test_next_run_resumes_from_cursor() {
    let h = Harness::start().await;

    mount_page(
        &h,
        "0",
        json!({"results": [deviation("a", 1), deviation("b", 2)], "has_more": true, "next_offset": 2}),
    )
    .await;
    mount_page(
        &h,
        "2",
        json!({"results": [deviation("c", 3)], "has_more": false}),
    )
    .await;

    let first = h.set.collect("newest", Some(1)).await.unwrap();
    assert_eq!(first.final_offset, 2);

    let second = h.set.collect("newest", Some(1)).await.unwrap();
    assert_eq!(second.start_offset, 2);
    assert_eq!(second.items_added, 1);

    // Resetting the cursor starts from the top again; known keys are not re-added
    h.set.get("faves").unwrap().reset_cursor("newest").unwrap();
    let third = h.set.collect("newest", Some(1)).await.unwrap();
    assert_eq!(third.start_offset, 0);
    assert_eq!(third.items_added, 0);
}

#[tokio::test]
async fn test_empty_page_without_new_offset_ends_listing() {
    let h = Harness::start().await;

    Mock::given(method("GET"))
        .and(path(NEWEST))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"results": [], "has_more": true})),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let report = h.set.collect("newest", None).await.unwrap();
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.final_offset, 0);
}

#[tokio::test]
async fn test_stuck_offset_ends_listing() {
    let h = Harness::start().await;

    Mock::given(method("GET"))
        .and(path(NEWEST))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"results": [deviation("a", 1)], "has_more": true})),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let report = tokio::time::timeout(Duration::from_secs(5), h.set.collect("newest", None))
        .await
        .expect("Collection did not terminate")
        .unwrap();
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.items_added, 1);
    assert_eq!(report.final_offset, 0);
}

#[tokio::test]
async fn test_pacing_follows_retry_after_between_pages() {
    let h = Harness::start().await;

    Mock::given(method("GET"))
        .and(path(NEWEST))
        .and(query_param("offset", "0"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Retry-After", "1")
                .set_body_json(json!({
                    "results": [deviation("a", 1)],
                    "has_more": true,
                    "next_offset": 2
                })),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    // The last page asks for a long pause that must not be taken
    Mock::given(method("GET"))
        .and(path(NEWEST))
        .and(query_param("offset", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Retry-After", "5")
                .set_body_json(json!({"results": [deviation("b", 2)], "has_more": false})),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let started = Instant::now();
    let report = h.set.collect("newest", None).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.pages_fetched, 2);
    assert!(elapsed >= Duration::from_secs(1), "paused only {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "paused after last page: {:?}", elapsed);
}

#[tokio::test]
async fn test_keyless_results_counted_once() {
    let h = Harness::start().await;

    mount_page(
        &h,
        "0",
        json!({
            "results": [deviation("a", 1), {"title": "no key"}],
            "has_more": true,
            "next_offset": 2
        }),
    )
    .await;
    mount_page(
        &h,
        "2",
        json!({"results": [deviation("b", 2)], "has_more": false}),
    )
    .await;

    let report = h.set.collect("newest", None).await.unwrap();
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.items_added, 2);
    assert_eq!(report.items_skipped, 1);
}

#[tokio::test]
async fn test_rate_limited_page_is_retried() {
    let h = Harness::start().await;

    Mock::given(method("GET"))
        .and(path(NEWEST))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&h.server)
        .await;
    mount_page(
        &h,
        "0",
        json!({"results": [deviation("a", 1)], "has_more": false}),
    )
    .await;

    let report = h.set.collect("newest", None).await.unwrap();
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.items_added, 1);
}

#[tokio::test]
async fn test_threshold_body_is_rate_limit() {
    let h = Harness::start_with(|c| c.feeds[0].max_rate_limit_retries = 0).await;

    Mock::given(method("GET"))
        .and(path(NEWEST))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"error": "user_api_threshold"})),
        )
        .mount(&h.server)
        .await;

    let err = h.set.collect("newest", None).await.unwrap_err();
    match err {
        FeedpaceError::Collect { cause, .. } => {
            assert!(
                matches!(*cause, FeedpaceError::Request(feedpace::RequestError::RateLimited { .. })),
                "unexpected cause {:?}",
                cause
            );
        }
        other => panic!("expected Collect error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_page_aborts_and_keeps_cursor() {
    let h = Harness::start().await;

    mount_page(
        &h,
        "0",
        json!({"results": [deviation("a", 1), deviation("b", 2)], "has_more": true, "next_offset": 2}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(NEWEST))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&h.server)
        .await;

    let err = h.set.collect("newest", None).await.unwrap_err();
    match err {
        FeedpaceError::Collect {
            feed,
            pages,
            report,
            ..
        } => {
            assert_eq!(feed, "newest");
            assert_eq!(pages, 1);
            assert_eq!(report.items_added, 2);
        }
        other => panic!("expected Collect error, got {:?}", other),
    }

    // Items from the successful page stay; the cursor was never advanced
    let faves = h.set.get("faves").unwrap();
    assert_eq!(faves.queue_stats().unwrap().pending, 2);
    assert_eq!(faves.cursor("newest").unwrap(), None);
}

#[tokio::test]
async fn test_done_items_are_not_revived() {
    let h = Harness::start().await;

    mount_page(
        &h,
        "0",
        json!({"results": [deviation("a", 1)], "has_more": false}),
    )
    .await;

    h.set.collect("newest", None).await.unwrap();
    let faves = h.set.get("faves").unwrap();
    faves.queue().mark_done("a", Some("r-1")).unwrap();

    faves.reset_cursor("newest").unwrap();
    h.server.reset().await;
    mount_page(
        &h,
        "0",
        json!({"results": [deviation("a", 999)], "has_more": false}),
    )
    .await;

    let report = h.set.collect("newest", None).await.unwrap();
    assert_eq!(report.items_added, 0);
    assert_eq!(report.items_updated, 0);

    let item = faves.queue().get("a").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Done);
    assert_eq!(item.remote_id.as_deref(), Some("r-1"));
}

#[tokio::test]
async fn test_unknown_source() {
    let h = Harness::start().await;
    let err = h.set.collect("nope", None).await.unwrap_err();
    assert!(matches!(err, FeedpaceError::UnknownSource(_)));
}
