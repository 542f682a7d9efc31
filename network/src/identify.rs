//! The identify sub-protocol: "which models do you host?"
//!
//! One request/response pair per stream. The responder does not keep the
//! stream open for further exchanges; teardown is the closing signal.

use std::sync::Arc;

use futures::AsyncWriteExt;
use libp2p::PeerId;
use serde_json::json;

use crate::backend::InferenceBackend;
use crate::catalog::{content_address, ContentAddress};
use crate::codec;
use crate::correlator::RequestCorrelator;
use crate::directory::PeerDirectory;
use crate::error::NetworkError;
use crate::metrics::SharedNetworkMetrics;
use crate::packet::{Packet, PacketEvent};
use crate::substrate::{ProtocolStream, Substrate, IDENTIFY_PROTOCOL};

/// Server side: answers a single `query` with the locally hosted model
/// identifiers.
pub struct IdentifyHandler {
    backend: Arc<dyn InferenceBackend>,
    metrics: SharedNetworkMetrics,
}

impl IdentifyHandler {
    pub fn new(backend: Arc<dyn InferenceBackend>, metrics: SharedNetworkMetrics) -> Self {
        Self { backend, metrics }
    }

    pub async fn handle(&self, peer: PeerId, mut stream: ProtocolStream) {
        if let Err(e) = self.respond(peer, &mut stream).await {
            tracing::warn!(%peer, error = %e, "identify exchange failed");
        }
        let _ = stream.close().await;
    }

    async fn respond(&self, peer: PeerId, stream: &mut ProtocolStream) -> Result<(), NetworkError> {
        let query = match codec::read_packet(stream).await? {
            Some(packet) => packet,
            None => return Ok(()),
        };
        self.metrics.inc_packets_received();

        if query.event != PacketEvent::Query {
            return Err(NetworkError::Framing(format!(
                "expected query, got {:?}",
                query.event
            )));
        }
        let request_id = query.request_id.ok_or_else(|| {
            NetworkError::Framing("query without request_id".into())
        })?;

        let models = self.backend.list_models().await?;
        tracing::debug!(%peer, count = models.len(), "answering identify query");

        let response = Packet::response(request_id, json!(models));
        codec::write_packet(stream, &response).await?;
        self.metrics.inc_packets_sent();
        Ok(())
    }
}

/// Client side: runs the single-shot identify handshake against a freshly
/// discovered peer and records what it hosts.
pub struct DiscoveryClient {
    substrate: Arc<dyn Substrate>,
    correlator: Arc<RequestCorrelator>,
    directory: Arc<PeerDirectory>,
    /// Content address this instance is interested in; carried in the query.
    interest: ContentAddress,
    metrics: SharedNetworkMetrics,
}

impl DiscoveryClient {
    pub fn new(
        substrate: Arc<dyn Substrate>,
        correlator: Arc<RequestCorrelator>,
        directory: Arc<PeerDirectory>,
        interest: ContentAddress,
        metrics: SharedNetworkMetrics,
    ) -> Self {
        Self {
            substrate,
            correlator,
            directory,
            interest,
            metrics,
        }
    }

    /// Entry point for peer-discovery notifications. Failures are logged
    /// and the peer is abandoned; there is no retry.
    pub async fn on_peer_discovered(&self, peer: PeerId) {
        match self.identify_peer(peer).await {
            Ok(added) => {
                tracing::debug!(%peer, records = added, "identify handshake complete");
            }
            Err(e) => {
                match &e {
                    NetworkError::Timeout(_) => self.metrics.inc_identify_timeouts(),
                    NetworkError::Dial(_) => self.metrics.inc_dial_failures(),
                    _ => {}
                }
                tracing::warn!(%peer, error = %e, "abandoning discovered peer");
            }
        }
    }

    async fn identify_peer(&self, peer: PeerId) -> Result<usize, NetworkError> {
        let mut stream = self.substrate.dial(peer, IDENTIFY_PROTOCOL).await?;

        let pending = self.correlator.start(peer);
        let query = Packet::query(pending.request_id(), json!(self.interest.to_string()));
        codec::write_packet(&mut stream, &query).await?;
        self.metrics.inc_packets_sent();
        self.metrics.inc_identify_queries_sent();

        // Feed inbound packets into the correlator until our own wait
        // resolves (response or timeout), or the stream dies first.
        let response = {
            let drive = drive_responses(&mut stream, &self.correlator, &self.metrics);
            tokio::pin!(drive);
            tokio::select! {
                result = pending.wait() => result,
                err = &mut drive => Err(err),
            }
        }?;

        let models: Vec<String> = serde_json::from_value(response.data)
            .map_err(|e| NetworkError::Serialization(format!("malformed identify response: {e}")))?;

        let added = models
            .iter()
            .filter(|model| self.directory.add(peer, content_address(model)))
            .count();
        self.metrics.add_records_discovered(added as u64);

        let _ = stream.close().await;
        Ok(added)
    }
}

/// Reads packets and completes pending requests with matching responses.
/// Only returns when the stream ends or breaks, which is always an error
/// from the caller's point of view.
async fn drive_responses(
    stream: &mut ProtocolStream,
    correlator: &RequestCorrelator,
    metrics: &SharedNetworkMetrics,
) -> NetworkError {
    loop {
        match codec::read_packet(stream).await {
            Ok(Some(packet)) => {
                metrics.inc_packets_received();
                if packet.event == PacketEvent::Response {
                    if let Some(id) = packet.request_id.clone() {
                        if !correlator.complete(&id, packet) {
                            tracing::debug!(request_id = %id, "ignoring unexpected response");
                        }
                        continue;
                    }
                }
                tracing::debug!(event = ?packet.event, "ignoring non-response packet");
            }
            Ok(None) => {
                return NetworkError::Framing("stream closed before response".into());
            }
            Err(e) => return e,
        }
    }
}
