//! Peer-to-peer protocol for discovering model-hosting peers and exchanging
//! streamed chat completions over point-to-point streams.

pub mod backend;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod directory;
pub mod error;
pub mod identify;
pub mod message;
pub mod metrics;
pub mod orchestrator;
pub mod packet;
pub mod substrate;
pub mod swarm;

pub use crate::backend::{ChatMessage, ChatRequest, InferenceBackend};
pub use crate::catalog::{content_address, ContentAddress};
pub use crate::config::{NetworkConfig, ProtocolConfig};
pub use crate::correlator::RequestCorrelator;
pub use crate::directory::{PeerDirectory, PeerRecord};
pub use crate::error::NetworkError;
pub use crate::message::{completion_chunks, MessageClient};
pub use crate::orchestrator::{NodeRole, Orchestrator};
pub use crate::packet::{Packet, PacketEvent, StopStatus};
pub use crate::substrate::{
    InboundStream, ProtocolStream, Substrate, SubstrateEvent, IDENTIFY_PROTOCOL, MESSAGE_PROTOCOL,
};
pub use crate::swarm::{SwarmHandle, SwarmNode};
