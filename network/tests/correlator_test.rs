use std::time::Duration;

use libp2p::PeerId;
use serde_json::json;

use network::correlator::RequestCorrelator;
use network::error::NetworkError;
use network::packet::Packet;

#[tokio::test]
async fn response_resolves_the_waiter() {
    let correlator = RequestCorrelator::new(Duration::from_secs(5));
    let pending = correlator.start(PeerId::random());
    let id = pending.request_id().to_string();
    assert_eq!(correlator.pending_count(), 1);

    let response = Packet::response(&id, json!(["llama3.2:latest"]));
    assert!(correlator.complete(&id, response.clone()));
    assert_eq!(correlator.pending_count(), 0);

    let got = pending.wait().await.unwrap();
    assert_eq!(got, response);
}

#[tokio::test]
async fn expiry_fires_exactly_once() {
    let correlator = RequestCorrelator::new(Duration::from_millis(50));
    let pending = correlator.start(PeerId::random());
    let id = pending.request_id().to_string();

    match pending.wait().await {
        Err(NetworkError::Timeout(d)) => assert_eq!(d, Duration::from_millis(50)),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(correlator.pending_count(), 0);

    // A response arriving after expiry has no one to deliver to.
    assert!(!correlator.complete(&id, Packet::response(&id, json!([]))));
}

#[tokio::test]
async fn duplicate_responses_are_ignored() {
    let correlator = RequestCorrelator::new(Duration::from_secs(5));
    let pending = correlator.start(PeerId::random());
    let id = pending.request_id().to_string();

    assert!(correlator.complete(&id, Packet::response(&id, json!(1))));
    assert!(!correlator.complete(&id, Packet::response(&id, json!(2))));

    let got = pending.wait().await.unwrap();
    assert_eq!(got.data, json!(1));
}

#[tokio::test]
async fn unknown_request_id_is_rejected() {
    let correlator = RequestCorrelator::new(Duration::from_secs(5));
    assert!(!correlator.complete("no-such-id", Packet::response("no-such-id", json!([]))));
}

#[tokio::test]
async fn concurrent_requests_resolve_independently() {
    let correlator = RequestCorrelator::new(Duration::from_secs(5));
    let a = correlator.start(PeerId::random());
    let b = correlator.start(PeerId::random());
    assert_ne!(a.request_id(), b.request_id());
    assert_eq!(correlator.pending_count(), 2);

    let b_id = b.request_id().to_string();
    assert!(correlator.complete(&b_id, Packet::response(&b_id, json!("b"))));

    assert_eq!(b.wait().await.unwrap().data, json!("b"));
    assert_eq!(correlator.pending_count(), 1);

    let a_id = a.request_id().to_string();
    assert!(correlator.complete(&a_id, Packet::response(&a_id, json!("a"))));
    assert_eq!(a.wait().await.unwrap().data, json!("a"));
}
