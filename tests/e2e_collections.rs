//! E2E tests for collection traversal and polling
//!
//! Paged collections are served by the mock server and walked over HTTP.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::TestHarness;
use fedisim::HarnessError;
use fedisim::collection::{EventualConsistencyPoller, collect_item_uris, collection_pages};
use fedisim::remote::{RequestNotifier, RequestRecorder};
use http::Method;
use serde_json::json;

#[test]
fn test_collects_items_across_pages() {
    let harness = TestHarness::new();
    let actor = harness.session.remote_actor("remote_actor").unwrap();
    let server = &harness.session.server;
    let outbox = harness.url("/remote_actor/outbox");

    server
        .serve_document(
            &outbox,
            json!({
                "id": outbox,
                "type": "OrderedCollection",
                "totalItems": 3,
                "first": format!("{}?page=1", outbox),
            }),
        )
        .unwrap();
    server
        .serve_document(
            &format!("{}?page=1", outbox),
            json!({
                "type": "OrderedCollectionPage",
                "orderedItems": [{"id": "http://sut/a", "type": "Create"}, "http://sut/b"],
                "next": format!("{}?page=2", outbox),
            }),
        )
        .unwrap();
    server
        .serve_document(
            &format!("{}?page=2", outbox),
            json!({"type": "OrderedCollectionPage", "orderedItems": ["http://sut/c"]}),
        )
        .unwrap();

    let uris = collect_item_uris(&actor, &outbox, None).unwrap();
    assert_eq!(uris, vec!["http://sut/a", "http://sut/b", "http://sut/c"]);

    let pages: Vec<_> = collection_pages(&actor, &outbox)
        .map(|page| page.unwrap().uri)
        .collect();
    assert_eq!(
        pages,
        vec![
            outbox.clone(),
            format!("{}?page=1", outbox),
            format!("{}?page=2", outbox)
        ]
    );
}

#[test]
fn test_max_count_limits_fetches() {
    let harness = TestHarness::new();
    let actor = harness.session.remote_actor("remote_actor").unwrap();
    let server = &harness.session.server;
    let collection = actor
        .setup_collection(
            json!({"orderedItems": ["http://sut/1", "http://sut/2"], "next": harness.url("/page2")}),
            true,
            "likes",
        )
        .unwrap();
    let recorder = Arc::new(RequestRecorder::new());
    server.add_observer(recorder.clone());

    let uris = collect_item_uris(&actor, collection["id"].as_str().unwrap(), Some(2)).unwrap();

    assert_eq!(uris, vec!["http://sut/1", "http://sut/2"]);
    assert!(!recorder.paths(&Method::GET).contains(&"/page2".to_string()));
}

#[test]
fn test_missing_collection_is_an_http_error() {
    let harness = TestHarness::new();
    let actor = harness.session.remote_actor("remote_actor").unwrap();

    let result = collect_item_uris(&actor, &harness.url("/missing"), None);
    assert!(matches!(
        result,
        Err(HarnessError::HttpStatus { status: 404, .. })
    ));
}

#[test]
fn test_poller_observes_late_item() {
    let harness = TestHarness::new();
    let actor = harness.session.remote_actor("remote_actor").unwrap();
    let followers = harness.url("/remote_actor/followers");
    let server = harness.session.server.clone();
    server
        .serve_document(&followers, json!({"type": "Collection", "items": []}))
        .unwrap();

    let publisher = {
        let followers = followers.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            server
                .serve_document(
                    &followers,
                    json!({"type": "Collection", "items": ["http://sut/alice"]}),
                )
                .unwrap();
        })
    };

    let poller = EventualConsistencyPoller::new(50, Duration::from_millis(20));
    let uris = poller
        .assert_eventually_contains(&actor, &followers, "http://sut/alice")
        .unwrap();
    publisher.join().unwrap();

    assert_eq!(uris, vec!["http://sut/alice"]);
}

#[test]
fn test_poller_gives_up_after_configured_tries() {
    let harness = TestHarness::new();
    let actor = harness.session.remote_actor("remote_actor").unwrap();
    let recorder = Arc::new(RequestRecorder::new());
    let fetched = Arc::new(RequestNotifier::for_method(Method::GET));
    harness.session.server.add_observer(recorder.clone());
    harness.session.server.add_observer(fetched.clone());

    let poller = harness.session.poller();
    let result = poller.assert_eventually_contains(&actor, &actor.inbox(), "http://sut/never");

    match result {
        Err(HarnessError::NotObserved { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(fetched.wait_for(3, Duration::from_secs(5)));
    assert_eq!(recorder.paths(&Method::GET).len(), 3);
}
