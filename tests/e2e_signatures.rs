//! E2E tests for HTTP Signatures
//!
//! Remote actors sign requests to the mock server; the recorded requests
//! are then verified against the key published in the actor profile, the
//! way a receiving server would.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TestHarness;
use fedisim::client::{ActorClient, HttpActor};
use fedisim::config::ClientConfig;
use fedisim::federation::{
    DEFAULT_SIGNED_HEADERS, SignatureError, TokenAuth, fetch_public_key, key_id_matches_actor,
    public_key_from_pem, signature_fields_from_headers, verify_request, verify_signed_request,
};
use serde_json::json;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn test_signed_post_verifies_against_published_key() {
    let harness = TestHarness::new();
    let actor = harness.session.remote_actor("remote_actor").unwrap();
    let activity = actor.make_activity(json!({"type": "Like", "object": "http://sut/note/1"}), true);

    let response = actor.post(&harness.url("/shared/inbox"), &activity).unwrap();
    assert!(response.is_success());

    let recorded = harness.session.server.most_recent_post(WAIT).unwrap().unwrap();
    let fields = signature_fields_from_headers(&recorded.headers).unwrap();
    assert_eq!(fields.key_id(), actor.key_id());
    assert_eq!(fields.algorithm(), Some("rsa-sha256"));
    assert_eq!(fields.headers(), DEFAULT_SIGNED_HEADERS.to_vec());

    // Resolve the key the way a receiving server would
    let fetcher = HttpActor::unauthenticated(&ClientConfig::default()).unwrap();
    let pem = fetch_public_key(&fetcher, fields.key_id()).unwrap();
    let public_key = public_key_from_pem(&pem).unwrap();

    let key_id = verify_request(&recorded.to_http_request(), &DEFAULT_SIGNED_HEADERS, &public_key)
        .unwrap();
    assert_eq!(key_id, actor.key_id());
    assert!(key_id_matches_actor(&key_id, activity["actor"].as_str().unwrap()));
}

#[test]
fn test_tampered_body_fails_digest_check() {
    let harness = TestHarness::new();
    let actor = harness.session.remote_actor("remote_actor").unwrap();

    actor
        .post(&harness.url("/inbox"), &json!({"type": "Create", "content": "original"}))
        .unwrap();

    let mut recorded = harness.session.server.most_recent_post(WAIT).unwrap().unwrap();
    recorded.body = br#"{"type":"Create","content":"forged"}"#.to_vec();

    let public_key = public_key_from_pem(&actor.key_pair().public_key_pem).unwrap();
    assert_eq!(
        verify_request(&recorded.to_http_request(), &DEFAULT_SIGNED_HEADERS, &public_key),
        Err(SignatureError::DigestMismatch)
    );
}

#[test]
fn test_signature_from_other_actor_is_rejected() {
    let harness = TestHarness::new();
    let signer = harness.session.remote_actor("signer").unwrap();
    let other = harness.session.remote_actor("other").unwrap();

    signer.post(&harness.url("/inbox"), &json!({"type": "Create"})).unwrap();
    let recorded = harness.session.server.most_recent_post(WAIT).unwrap().unwrap();

    let wrong_key = public_key_from_pem(&other.key_pair().public_key_pem).unwrap();
    assert_eq!(
        verify_signed_request(&recorded.to_http_request(), &wrong_key),
        Err(SignatureError::Verification)
    );
}

#[test]
fn test_signed_get_verifies_with_claimed_headers() {
    let harness = TestHarness::new();
    let actor = harness.session.remote_actor("remote_actor").unwrap();

    let profile = actor.get_json(actor.id()).unwrap();
    assert_eq!(profile["id"], actor.id());

    let requests = harness.session.server.requests().unwrap();
    let recorded = requests.last().unwrap();
    assert!(recorded.headers.contains_key("digest"));

    let public_key = public_key_from_pem(&actor.key_pair().public_key_pem).unwrap();
    let key_id = verify_signed_request(&recorded.to_http_request(), &public_key).unwrap();
    assert_eq!(key_id, actor.key_id());
}

#[test]
fn test_unauthenticated_actor_sends_no_signature() {
    let harness = TestHarness::new();
    let actor = harness.session.unauthenticated_actor("anonymous").unwrap();
    assert!(!actor.is_authenticated());

    actor.post(&harness.url("/inbox"), &json!({"type": "Create"})).unwrap();
    let recorded = harness.session.server.most_recent_post(WAIT).unwrap().unwrap();

    assert!(!recorded.headers.contains_key("signature"));
    assert_eq!(
        signature_fields_from_headers(&recorded.headers),
        Err(SignatureError::Missing)
    );
}

#[test]
fn test_token_auth_sends_bearer_header() {
    let harness = TestHarness::new();
    let client = HttpActor::new(
        &ClientConfig::default(),
        Some(Arc::new(TokenAuth::new("s3cret"))),
    )
    .unwrap();

    client.post(&harness.url("/api/outbox"), &json!({"type": "Note"})).unwrap();
    let recorded = harness.session.server.most_recent_post(WAIT).unwrap().unwrap();

    assert_eq!(recorded.headers["authorization"], "Bearer s3cret");
    assert_eq!(
        recorded.headers["content-type"],
        ClientConfig::default().media_type.as_str()
    );
}

#[test]
fn test_actors_share_cached_keys_by_name() {
    let harness = TestHarness::new();
    let first = harness.session.remote_actor("remote_actor").unwrap();
    let again = harness.session.remote_actor("remote_actor").unwrap();
    let other = harness.session.remote_actor("remote_actor2").unwrap();

    assert_eq!(first.key_pair(), again.key_pair());
    assert_ne!(first.key_pair(), other.key_pair());
    assert_eq!(harness.session.keys.len(), 2);
}
