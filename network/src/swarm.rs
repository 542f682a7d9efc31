//! libp2p-backed substrate: transport, Kademlia content routing, and raw
//! per-protocol streams. Translates swarm events into the protocol core's
//! notification channels.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::core::upgrade;
use libp2p::multiaddr::Protocol;
use libp2p::swarm::{Swarm, SwarmEvent};
use libp2p::{dns, identify, kad, noise, ping, tcp, yamux};
use libp2p::{PeerId, StreamProtocol, Transport};
use libp2p_stream as stream;
use tokio::sync::mpsc;

use crate::catalog::ContentAddress;
use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::substrate::{
    InboundStream, ProtocolStream, Substrate, SubstrateEvent, IDENTIFY_PROTOCOL, MESSAGE_PROTOCOL,
};

const AGENT_PROTOCOL: &str = "/infermesh/id/1.0.0";

#[derive(libp2p::swarm::NetworkBehaviour)]
pub struct SwarmBehaviour {
    kademlia: kad::Behaviour<kad::store::MemoryStore>,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
    stream: stream::Behaviour,
}

enum SwarmCommand {
    Provide(ContentAddress),
}

/// Owns the swarm event loop. Constructed together with a [`SwarmHandle`]
/// and the two notification channels consumed by the orchestrator.
pub struct SwarmNode {
    pub local_peer_id: PeerId,
    swarm: Swarm<SwarmBehaviour>,
    command_rx: mpsc::Receiver<SwarmCommand>,
    event_tx: mpsc::Sender<SubstrateEvent>,
}

/// Cloneable handle implementing the substrate seam against a running
/// [`SwarmNode`].
#[derive(Clone)]
pub struct SwarmHandle {
    control: stream::Control,
    command_tx: mpsc::Sender<SwarmCommand>,
}

impl SwarmNode {
    pub fn new(
        keypair: libp2p::identity::Keypair,
        config: &NetworkConfig,
    ) -> Result<
        (
            Self,
            SwarmHandle,
            mpsc::Receiver<SubstrateEvent>,
            mpsc::Receiver<InboundStream>,
        ),
        NetworkError,
    > {
        let local_peer_id = PeerId::from(keypair.public());

        let noise_config =
            noise::Config::new(&keypair).map_err(|e| NetworkError::Dial(e.to_string()))?;
        let yamux_config = yamux::Config::default();
        let tcp_transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
        let transport = dns::tokio::Transport::system(tcp_transport)
            .map_err(|e| NetworkError::Dial(e.to_string()))?
            .upgrade(upgrade::Version::V1)
            .authenticate(noise_config)
            .multiplex(yamux_config)
            .boxed();

        let store = kad::store::MemoryStore::new(local_peer_id);
        let mut kad_config = kad::Config::default();
        kad_config.set_query_timeout(Duration::from_secs(60));
        let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);
        kademlia.set_mode(Some(kad::Mode::Server));

        for addr in config.bootstrap_peers.iter().cloned() {
            let mut peer_id = None;
            for proto in addr.iter() {
                if let Protocol::P2p(hash) = proto {
                    peer_id = Some(hash);
                }
            }
            if let Some(pid) = peer_id {
                kademlia.add_address(&pid, addr);
            }
        }
        if !config.bootstrap_peers.is_empty() {
            let _ = kademlia.bootstrap();
        }

        let identify = identify::Behaviour::new(identify::Config::new(
            AGENT_PROTOCOL.to_string(),
            keypair.public(),
        ));
        let ping = ping::Behaviour::new(ping::Config::new().with_interval(Duration::from_secs(10)));

        let behaviour = SwarmBehaviour {
            kademlia,
            identify,
            ping,
            stream: stream::Behaviour::new(),
        };

        let swarm_config = libp2p::swarm::Config::with_tokio_executor();
        let mut swarm = Swarm::new(transport, behaviour, local_peer_id, swarm_config);
        swarm
            .listen_on(config.listen_addr.clone())
            .map_err(|e| NetworkError::Dial(e.to_string()))?;

        let mut control = swarm.behaviour().stream.new_control();

        let (event_tx, event_rx) = mpsc::channel(1024);
        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        let (command_tx, command_rx) = mpsc::channel(64);

        for protocol in [IDENTIFY_PROTOCOL, MESSAGE_PROTOCOL] {
            let incoming = control
                .accept(protocol.clone())
                .map_err(|e| NetworkError::Dial(e.to_string()))?;
            tokio::spawn(forward_incoming(incoming, protocol, inbound_tx.clone()));
        }

        Ok((
            Self {
                local_peer_id,
                swarm,
                command_rx,
                event_tx,
            },
            SwarmHandle {
                control,
                command_tx,
            },
            event_rx,
            inbound_rx,
        ))
    }

    /// Drives the swarm until the command channel and all handles are gone.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                maybe_command = self.command_rx.recv() => {
                    match maybe_command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                swarm_event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(swarm_event).await;
                }
            }
        }
        tracing::info!("swarm command channel closed, stopping event loop");
    }

    fn handle_command(&mut self, command: SwarmCommand) {
        match command {
            SwarmCommand::Provide(address) => {
                let key = kad::RecordKey::new(address.as_bytes());
                match self.swarm.behaviour_mut().kademlia.start_providing(key) {
                    Ok(query_id) => {
                        tracing::debug!(%address, ?query_id, "providing content address");
                    }
                    Err(e) => {
                        tracing::warn!(%address, error = %e, "start_providing failed");
                    }
                }
            }
        }
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<SwarmBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                tracing::info!(%address, "listening");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                num_established,
                ..
            } => {
                if num_established.get() == 1 {
                    let _ = self
                        .event_tx
                        .send(SubstrateEvent::PeerConnected(peer_id))
                        .await;
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    let _ = self
                        .event_tx
                        .send(SubstrateEvent::PeerDisconnected(peer_id))
                        .await;
                }
            }
            SwarmEvent::Behaviour(SwarmBehaviourEvent::Kademlia(kad_event)) => {
                self.handle_kad_event(kad_event).await;
            }
            SwarmEvent::Behaviour(SwarmBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                // Feed identified listen addresses into the routing table so
                // the peer becomes dialable and discovery fires.
                for addr in info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr);
                }
            }
            _ => {}
        }
    }

    async fn handle_kad_event(&mut self, event: kad::Event) {
        match event {
            kad::Event::RoutingUpdated {
                peer, addresses, ..
            } => {
                let _ = self
                    .event_tx
                    .send(SubstrateEvent::PeerDiscovered {
                        peer,
                        addresses: addresses.into_vec(),
                    })
                    .await;
            }
            kad::Event::OutboundQueryProgressed {
                result: kad::QueryResult::StartProviding(result),
                ..
            } => match result {
                Ok(ok) => tracing::debug!(key = ?ok.key, "provider record published"),
                Err(e) => tracing::warn!(error = %e, "provider record publication failed"),
            },
            _ => {}
        }
    }
}

#[async_trait]
impl Substrate for SwarmHandle {
    async fn dial(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<ProtocolStream, NetworkError> {
        let mut control = self.control.clone();
        let stream = control
            .open_stream(peer, protocol)
            .await
            .map_err(|e| NetworkError::Dial(e.to_string()))?;
        Ok(Box::new(stream))
    }

    async fn provide(&self, address: ContentAddress) -> Result<(), NetworkError> {
        // Best-effort by contract: enqueueing is all we promise.
        if self
            .command_tx
            .send(SwarmCommand::Provide(address))
            .await
            .is_err()
        {
            tracing::warn!(%address, "swarm loop gone, advertisement dropped");
        }
        Ok(())
    }
}

async fn forward_incoming(
    mut incoming: stream::IncomingStreams,
    protocol: StreamProtocol,
    inbound_tx: mpsc::Sender<InboundStream>,
) {
    while let Some((peer, stream)) = incoming.next().await {
        tracing::debug!(%peer, %protocol, "inbound stream");
        let inbound = InboundStream {
            peer,
            protocol: protocol.clone(),
            stream: Box::new(stream),
        };
        if inbound_tx.send(inbound).await.is_err() {
            break;
        }
    }
}
