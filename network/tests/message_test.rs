mod common;

use std::sync::Arc;

use futures::StreamExt;
use libp2p::PeerId;
use serde_json::json;

use common::{stream_pair, MockBackend, MockSubstrate};
use network::backend::{ChatMessage, ChatRequest};
use network::catalog::content_address;
use network::codec::{read_packet, write_packet};
use network::directory::PeerDirectory;
use network::error::NetworkError;
use network::message::{completion_chunks, MessageClient, MessageHandler};
use network::metrics::NetworkMetrics;
use network::packet::{Packet, PacketEvent, StopStatus};
use network::substrate::MESSAGE_PROTOCOL;

fn scripted_chunks() -> Vec<serde_json::Value> {
    vec![
        json!({"message": {"role": "assistant", "content": "Hel"}, "done": false}),
        json!({"message": {"role": "assistant", "content": "lo"}, "done": false}),
        json!({"message": {"role": "assistant", "content": "!"}, "done": true}),
    ]
}

fn chat_request(model: &str) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::user("say hello")],
        stream: true,
    }
}

#[tokio::test]
async fn handler_relays_chunks_in_order_then_stops() {
    let backend = Arc::new(MockBackend::new(vec![], scripted_chunks()));
    let handler = MessageHandler::new(
        backend.clone(),
        "llama3.2:latest".to_string(),
        Arc::new(NetworkMetrics::default()),
    );
    let (mut client, server) = stream_pair();
    tokio::spawn(async move { handler.handle(PeerId::random(), server).await });

    // Ask for a different model without streaming; the handler pins both.
    let mut request = chat_request("whatever:model");
    request.stream = false;
    let data = serde_json::to_value(&request).unwrap();
    write_packet(&mut client, &Packet::message(data)).await.unwrap();

    for expected in scripted_chunks() {
        let packet = read_packet(&mut client).await.unwrap().unwrap();
        assert_eq!(packet.event, PacketEvent::CompletionPacket);
        assert_eq!(packet.data, expected);
    }

    let stop = read_packet(&mut client).await.unwrap().unwrap();
    assert_eq!(stop.event, PacketEvent::CompletionStop);
    assert_eq!(
        serde_json::from_value::<StopStatus>(stop.data).unwrap(),
        StopStatus::Done
    );
    assert!(read_packet(&mut client).await.unwrap().is_none());

    let requests = backend.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "llama3.2:latest");
    assert!(requests[0].stream);
}

#[tokio::test]
async fn backend_failure_ends_the_relay_with_an_error_stop() {
    let mut backend = MockBackend::new(vec![], scripted_chunks()[..1].to_vec());
    backend.trailing_error = Some("model crashed".to_string());
    let handler = MessageHandler::new(
        Arc::new(backend),
        "llama3.2:latest".to_string(),
        Arc::new(NetworkMetrics::default()),
    );
    let (mut client, server) = stream_pair();
    tokio::spawn(async move { handler.handle(PeerId::random(), server).await });

    let data = serde_json::to_value(&chat_request("llama3.2:latest")).unwrap();
    write_packet(&mut client, &Packet::message(data)).await.unwrap();

    let first = read_packet(&mut client).await.unwrap().unwrap();
    assert_eq!(first.event, PacketEvent::CompletionPacket);

    let stop = read_packet(&mut client).await.unwrap().unwrap();
    assert_eq!(stop.event, PacketEvent::CompletionStop);
    match serde_json::from_value::<StopStatus>(stop.data).unwrap() {
        StopStatus::Error { error } => assert!(error.contains("model crashed")),
        other => panic!("expected error stop, got {other:?}"),
    }
}

#[tokio::test]
async fn unexpected_first_packet_is_refused() {
    let handler = MessageHandler::new(
        Arc::new(MockBackend::new(vec![], vec![])),
        "llama3.2:latest".to_string(),
        Arc::new(NetworkMetrics::default()),
    );
    let (mut client, server) = stream_pair();
    tokio::spawn(async move { handler.handle(PeerId::random(), server).await });

    write_packet(&mut client, &Packet::query("req-1", json!(null)))
        .await
        .unwrap();

    let stop = read_packet(&mut client).await.unwrap().unwrap();
    assert_eq!(stop.event, PacketEvent::CompletionStop);
    assert!(matches!(
        serde_json::from_value::<StopStatus>(stop.data).unwrap(),
        StopStatus::Error { .. }
    ));
}

#[tokio::test]
async fn missing_peer_fails_before_any_dial() {
    let substrate = Arc::new(MockSubstrate::refusing());
    let client = MessageClient::new(
        substrate.clone(),
        Arc::new(PeerDirectory::new()),
        Arc::new(NetworkMetrics::default()),
    );

    match client.send_message(chat_request("llama3.2:latest")).await {
        Err(NetworkError::NoPeerAvailable(model)) => assert_eq!(model, "llama3.2:latest"),
        other => panic!("expected NoPeerAvailable, got {:?}", other.map(|_| ())),
    }
    assert_eq!(substrate.dial_count(), 0);
}

#[tokio::test]
async fn end_to_end_completion_stream_yields_chunks_until_done() {
    let substrate = Arc::new(MockSubstrate::new(Box::new(|peer, protocol, stream| {
        assert_eq!(protocol, MESSAGE_PROTOCOL);
        let handler = MessageHandler::new(
            Arc::new(MockBackend::new(vec![], scripted_chunks())),
            "llama3.2:latest".to_string(),
            Arc::new(NetworkMetrics::default()),
        );
        tokio::spawn(async move { handler.handle(peer, stream).await });
    })));
    let directory = Arc::new(PeerDirectory::new());
    directory.add(PeerId::random(), content_address("llama3.2:latest"));
    let client = MessageClient::new(
        substrate,
        directory,
        Arc::new(NetworkMetrics::default()),
    );

    let packets = client.send_message(chat_request("llama3.2:latest")).await.unwrap();
    let chunks: Vec<_> = completion_chunks(packets).collect().await;

    let values: Vec<_> = chunks.into_iter().map(|c| c.unwrap()).collect();
    assert_eq!(values, scripted_chunks());
}

#[tokio::test]
async fn end_to_end_backend_error_surfaces_as_stream_error() {
    let substrate = Arc::new(MockSubstrate::new(Box::new(|peer, _, stream| {
        let mut backend = MockBackend::new(vec![], scripted_chunks()[..2].to_vec());
        backend.trailing_error = Some("out of memory".to_string());
        let handler = MessageHandler::new(
            Arc::new(backend),
            "llama3.2:latest".to_string(),
            Arc::new(NetworkMetrics::default()),
        );
        tokio::spawn(async move { handler.handle(peer, stream).await });
    })));
    let directory = Arc::new(PeerDirectory::new());
    directory.add(PeerId::random(), content_address("llama3.2:latest"));
    let client = MessageClient::new(
        substrate,
        directory,
        Arc::new(NetworkMetrics::default()),
    );

    let packets = client.send_message(chat_request("llama3.2:latest")).await.unwrap();
    let mut items: Vec<_> = completion_chunks(packets).collect().await;

    let last = items.pop().unwrap();
    match last {
        Err(NetworkError::Backend(msg)) => assert!(msg.contains("out of memory")),
        other => panic!("expected backend error, got {other:?}"),
    }
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.is_ok()));
}
