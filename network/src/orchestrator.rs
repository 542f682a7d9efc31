//! Lifecycle and role wiring.
//!
//! The orchestrator owns a dedicated task that consumes the substrate's
//! notification channels. Peer bookkeeping runs for every role; discovery
//! handling only when this instance originates requests; protocol handlers
//! and content advertisement only when it also serves them.

use std::str::FromStr;
use std::sync::Arc;

use libp2p::{PeerId, StreamProtocol};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::backend::InferenceBackend;
use crate::catalog::content_address;
use crate::config::ProtocolConfig;
use crate::correlator::RequestCorrelator;
use crate::directory::PeerDirectory;
use crate::error::NetworkError;
use crate::identify::{DiscoveryClient, IdentifyHandler};
use crate::message::{MessageClient, MessageHandler};
use crate::metrics::{NetworkMetrics, SharedNetworkMetrics};
use crate::substrate::{InboundStream, Substrate, SubstrateEvent, IDENTIFY_PROTOCOL, MESSAGE_PROTOCOL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Originates requests only.
    Client,
    /// Serves requests and may originate them.
    Node,
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(NodeRole::Client),
            "node" => Ok(NodeRole::Node),
            other => Err(format!("unknown role '{other}' (expected client or node)")),
        }
    }
}

/// Static sub-protocol registry, resolved once at startup. Dispatch is a
/// tag match, never by string comparison at stream time.
enum RegisteredHandler {
    Identify(Arc<IdentifyHandler>),
    Message(Arc<MessageHandler>),
}

struct ProtocolRegistry {
    entries: Vec<(StreamProtocol, RegisteredHandler)>,
}

impl ProtocolRegistry {
    fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    fn lookup(&self, protocol: &StreamProtocol) -> Option<&RegisteredHandler> {
        self.entries
            .iter()
            .find(|(p, _)| p == protocol)
            .map(|(_, h)| h)
    }
}

pub struct Orchestrator {
    role: NodeRole,
    /// Model of interest (client) or the locally served model (node).
    model: String,
    local_peer_id: PeerId,
    substrate: Arc<dyn Substrate>,
    backend: Option<Arc<dyn InferenceBackend>>,
    directory: Arc<PeerDirectory>,
    correlator: Arc<RequestCorrelator>,
    metrics: SharedNetworkMetrics,
}

impl Orchestrator {
    pub fn new(
        role: NodeRole,
        model: String,
        local_peer_id: PeerId,
        substrate: Arc<dyn Substrate>,
        backend: Option<Arc<dyn InferenceBackend>>,
        config: &ProtocolConfig,
    ) -> Result<Self, NetworkError> {
        if role == NodeRole::Node && backend.is_none() {
            return Err(NetworkError::Backend(
                "node role requires an inference backend".into(),
            ));
        }
        Ok(Self {
            role,
            model,
            local_peer_id,
            substrate,
            backend,
            directory: Arc::new(PeerDirectory::new()),
            correlator: Arc::new(RequestCorrelator::new(config.identify_timeout())),
            metrics: Arc::new(NetworkMetrics::default()),
        })
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn directory(&self) -> Arc<PeerDirectory> {
        Arc::clone(&self.directory)
    }

    pub fn metrics(&self) -> SharedNetworkMetrics {
        Arc::clone(&self.metrics)
    }

    pub fn message_client(&self) -> MessageClient {
        MessageClient::new(
            Arc::clone(&self.substrate),
            Arc::clone(&self.directory),
            Arc::clone(&self.metrics),
        )
    }

    /// Consumes the substrate notification channels until they close.
    /// Intended to run as its own task.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<SubstrateEvent>,
        mut inbound: mpsc::Receiver<InboundStream>,
    ) {
        let registry = self.build_registry();
        let discovery = self.build_discovery();

        if self.role == NodeRole::Node {
            self.advertise_hosted_models().await;
        }

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event, &discovery),
                        None => break,
                    }
                }
                maybe_stream = inbound.recv() => {
                    match maybe_stream {
                        Some(stream) => self.dispatch(stream, &registry),
                        None => break,
                    }
                }
            }
        }
        tracing::info!("substrate notification channels closed, orchestrator stopping");
    }

    fn build_registry(&self) -> ProtocolRegistry {
        if self.role != NodeRole::Node {
            return ProtocolRegistry::empty();
        }
        let backend = self
            .backend
            .as_ref()
            .expect("node role checked in new()")
            .clone();
        ProtocolRegistry {
            entries: vec![
                (
                    IDENTIFY_PROTOCOL,
                    RegisteredHandler::Identify(Arc::new(IdentifyHandler::new(
                        Arc::clone(&backend),
                        Arc::clone(&self.metrics),
                    ))),
                ),
                (
                    MESSAGE_PROTOCOL,
                    RegisteredHandler::Message(Arc::new(MessageHandler::new(
                        backend,
                        self.model.clone(),
                        Arc::clone(&self.metrics),
                    ))),
                ),
            ],
        }
    }

    fn build_discovery(&self) -> Option<Arc<DiscoveryClient>> {
        if self.role != NodeRole::Client {
            return None;
        }
        Some(Arc::new(DiscoveryClient::new(
            Arc::clone(&self.substrate),
            Arc::clone(&self.correlator),
            Arc::clone(&self.directory),
            content_address(&self.model),
            Arc::clone(&self.metrics),
        )))
    }

    /// Fire-and-forget advertisement of every hosted model to the routing
    /// layer. Success is never confirmed; failures are only logged.
    async fn advertise_hosted_models(&self) {
        let backend = self.backend.as_ref().expect("node role checked in new()");
        let models = match backend.list_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list hosted models for advertisement");
                return;
            }
        };
        for model in models {
            let address = content_address(&model);
            match self.substrate.provide(address).await {
                Ok(()) => {
                    tracing::info!(%model, %address, "advertised hosted model (best-effort, unconfirmed)");
                }
                Err(e) => {
                    tracing::warn!(%model, error = %e, "content advertisement failed");
                }
            }
        }
    }

    fn handle_event(&self, event: SubstrateEvent, discovery: &Option<Arc<DiscoveryClient>>) {
        match event {
            SubstrateEvent::PeerDiscovered { peer, .. } => {
                if peer == self.local_peer_id {
                    return;
                }
                if let Some(discovery) = discovery {
                    let discovery = Arc::clone(discovery);
                    tokio::spawn(async move {
                        discovery.on_peer_discovered(peer).await;
                    });
                }
            }
            SubstrateEvent::PeerConnected(peer) => {
                self.metrics.inc_peers_connected();
                tracing::debug!(%peer, "peer connected");
            }
            SubstrateEvent::PeerDisconnected(peer) => {
                self.metrics.dec_peers_connected();
                let removed = self.directory.remove_all(&peer);
                if removed > 0 {
                    tracing::debug!(%peer, removed, "dropped directory records for disconnected peer");
                }
            }
        }
    }

    fn dispatch(&self, inbound: InboundStream, registry: &ProtocolRegistry) {
        let InboundStream {
            peer,
            protocol,
            stream,
        } = inbound;
        match registry.lookup(&protocol) {
            Some(RegisteredHandler::Identify(handler)) => {
                let handler = Arc::clone(handler);
                tokio::spawn(async move {
                    handler.handle(peer, stream).await;
                });
            }
            Some(RegisteredHandler::Message(handler)) => {
                let handler = Arc::clone(handler);
                tokio::spawn(async move {
                    handler.handle(peer, stream).await;
                });
            }
            None => {
                tracing::warn!(%peer, %protocol, "inbound stream for unregistered protocol");
            }
        }
    }
}
