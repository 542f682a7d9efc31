//! The message sub-protocol: streamed chat completions.

use std::sync::Arc;

use futures::{AsyncWriteExt, Stream, StreamExt};
use libp2p::PeerId;
use serde_json::Value;

use crate::backend::{ChatRequest, InferenceBackend};
use crate::catalog::content_address;
use crate::codec;
use crate::directory::PeerDirectory;
use crate::error::NetworkError;
use crate::metrics::SharedNetworkMetrics;
use crate::packet::{Packet, PacketEvent, StopStatus};
use crate::substrate::{ProtocolStream, Substrate, MESSAGE_PROTOCOL};

/// Server side: forwards an inbound chat request to the inference backend
/// and relays its chunks back in the exact order received, closing with a
/// terminal `completionStop` packet.
pub struct MessageHandler {
    backend: Arc<dyn InferenceBackend>,
    /// Model served by this node; inbound requests are pinned to it.
    model: String,
    metrics: SharedNetworkMetrics,
}

impl MessageHandler {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        model: String,
        metrics: SharedNetworkMetrics,
    ) -> Self {
        Self {
            backend,
            model,
            metrics,
        }
    }

    pub async fn handle(&self, peer: PeerId, mut stream: ProtocolStream) {
        if let Err(e) = self.relay(peer, &mut stream).await {
            tracing::warn!(%peer, error = %e, "message relay failed");
            let stop = Packet::completion_stop(StopStatus::Error {
                error: e.to_string(),
            });
            let _ = codec::write_packet(&mut stream, &stop).await;
        }
        let _ = stream.close().await;
    }

    async fn relay(&self, peer: PeerId, stream: &mut ProtocolStream) -> Result<(), NetworkError> {
        let inbound = match codec::read_packet(stream).await? {
            Some(packet) => packet,
            None => return Ok(()),
        };
        self.metrics.inc_packets_received();

        if inbound.event != PacketEvent::Message {
            return Err(NetworkError::Framing(format!(
                "expected message, got {:?}",
                inbound.event
            )));
        }

        let mut request: ChatRequest = serde_json::from_value(inbound.data)
            .map_err(|e| NetworkError::Serialization(format!("malformed chat request: {e}")))?;
        request.model = self.model.clone();
        request.stream = true;

        tracing::debug!(%peer, model = %request.model, "starting completion relay");
        let mut chunks = self.backend.chat_stream(request).await?;

        while let Some(chunk) = chunks.recv().await {
            let chunk = chunk?;
            codec::write_packet(stream, &Packet::completion(chunk)).await?;
            self.metrics.inc_packets_sent();
            self.metrics.inc_chunks_relayed();
        }

        codec::write_packet(stream, &Packet::completion_stop(StopStatus::Done)).await?;
        self.metrics.inc_packets_sent();
        Ok(())
    }
}

/// Client side: picks a hosting peer from the directory and exchanges a
/// chat request against its completion stream.
pub struct MessageClient {
    substrate: Arc<dyn Substrate>,
    directory: Arc<PeerDirectory>,
    metrics: SharedNetworkMetrics,
}

impl MessageClient {
    pub fn new(
        substrate: Arc<dyn Substrate>,
        directory: Arc<PeerDirectory>,
        metrics: SharedNetworkMetrics,
    ) -> Self {
        Self {
            substrate,
            directory,
            metrics,
        }
    }

    /// Sends a chat request to the first peer hosting the model and returns
    /// the stream's lazy decode sequence. No timeout is applied here; the
    /// caller owns the stream's lifecycle.
    pub async fn send_message(
        &self,
        request: ChatRequest,
    ) -> Result<impl Stream<Item = Result<Packet, NetworkError>> + Send, NetworkError> {
        let address = content_address(&request.model);
        let peer = self
            .directory
            .peers_for(&address)
            .into_iter()
            .next()
            .ok_or_else(|| NetworkError::NoPeerAvailable(request.model.clone()))?;

        let mut stream = self.substrate.dial(peer, MESSAGE_PROTOCOL).await?;
        let data = serde_json::to_value(&request)
            .map_err(|e| NetworkError::Serialization(e.to_string()))?;
        codec::write_packet(&mut stream, &Packet::message(data)).await?;
        self.metrics.inc_packets_sent();

        tracing::debug!(%peer, model = %request.model, "chat request sent");
        Ok(codec::packet_stream(stream))
    }
}

/// Adapts a decode sequence into the completion chunk payloads, ending on
/// the terminal `completionStop` packet (or with its error, if any).
pub fn completion_chunks<S>(packets: S) -> impl Stream<Item = Result<Value, NetworkError>> + Send
where
    S: Stream<Item = Result<Packet, NetworkError>> + Send + 'static,
{
    packets
        .scan(false, |finished, item| {
            if *finished {
                return futures::future::ready(None);
            }
            let mapped: Option<Result<Value, NetworkError>> = match item {
                Ok(packet) => match packet.event {
                    PacketEvent::CompletionPacket => Some(Ok(packet.data)),
                    PacketEvent::CompletionStop => {
                        *finished = true;
                        match serde_json::from_value::<StopStatus>(packet.data) {
                            Ok(StopStatus::Error { error }) => {
                                Some(Err(NetworkError::Backend(error)))
                            }
                            Ok(StopStatus::Done) | Err(_) => None,
                        }
                    }
                    other => {
                        tracing::debug!(event = ?other, "ignoring unexpected packet in completion stream");
                        None
                    }
                },
                Err(e) => {
                    *finished = true;
                    Some(Err(e))
                }
            };
            futures::future::ready(Some(mapped))
        })
        .filter_map(futures::future::ready)
}
