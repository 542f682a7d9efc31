//! Seam to the overlay network substrate. The protocol core only needs to
//! dial named sub-protocols, advertise content addresses, and consume the
//! substrate's notification channels; everything else (transport, peer
//! discovery, routing) lives behind this boundary.

use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};
use libp2p::{Multiaddr, PeerId, StreamProtocol};

use crate::catalog::ContentAddress;
use crate::error::NetworkError;

pub const IDENTIFY_PROTOCOL: StreamProtocol = StreamProtocol::new("/infermesh/identify/1.0.0");
pub const MESSAGE_PROTOCOL: StreamProtocol = StreamProtocol::new("/infermesh/message/1.0.0");

/// A negotiated point-to-point protocol stream.
pub type ProtocolStream = Box<dyn Duplex>;

pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Duplex for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

#[async_trait]
pub trait Substrate: Send + Sync + 'static {
    /// Opens a stream for the given sub-protocol to a peer.
    async fn dial(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<ProtocolStream, NetworkError>;

    /// Advertises a content address to the routing layer. Best-effort:
    /// success is not confirmed back to the caller.
    async fn provide(&self, address: ContentAddress) -> Result<(), NetworkError>;
}

/// Notifications emitted by the substrate.
#[derive(Clone, Debug)]
pub enum SubstrateEvent {
    PeerDiscovered {
        peer: PeerId,
        addresses: Vec<Multiaddr>,
    },
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
}

/// An inbound stream, tagged with the sub-protocol it was negotiated for.
pub struct InboundStream {
    pub peer: PeerId,
    pub protocol: StreamProtocol,
    pub stream: ProtocolStream,
}
