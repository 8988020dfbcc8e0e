//! UDP transport implementation

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use serde::{Deserialize, Serialize};

use facelink_core::{FaceLinkError, FaceLinkResult};
use facelink_wire::EncodedPacket;

use crate::PacketSink;

/// Engine endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Local bind address
    pub bind: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            host: "127.0.0.1".to_string(),
            port: 11111,
            bind: "0.0.0.0:0".to_string(),
        }
    }
}

impl TransportConfig {
    pub fn endpoint(&self) -> FaceLinkResult<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| FaceLinkError::Config(format!("{}:{}: {}", self.host, self.port, e)))?
            .next()
            .ok_or_else(|| {
                FaceLinkError::Config(format!("{}:{} resolved to nothing", self.host, self.port))
            })
    }
}

/// UDP socket connected to the animation engine.
///
/// One datagram per frame. Shared by reference between the idle loop and
/// the playback scheduler; only one of them sends at a time.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind and connect per the configuration
    pub fn connect(config: &TransportConfig) -> FaceLinkResult<Self> {
        let peer = config.endpoint()?;
        Self::connect_to(&config.bind, peer)
    }

    pub fn connect_to(bind: &str, peer: SocketAddr) -> FaceLinkResult<Self> {
        let socket = UdpSocket::bind(bind)
            .map_err(|e| FaceLinkError::TransportSendFailure(e.to_string()))?;
        socket
            .connect(peer)
            .map_err(|e| FaceLinkError::TransportSendFailure(e.to_string()))?;
        let local_addr = socket.local_addr()?;

        tracing::debug!(%local_addr, %peer, "udp transport connected");

        Ok(UdpTransport {
            socket,
            local_addr,
            peer_addr: peer,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Send raw bytes to the connected peer
    pub fn send_bytes(&self, bytes: &[u8]) -> FaceLinkResult<()> {
        self.socket
            .send(bytes)
            .map_err(|e| FaceLinkError::TransportSendFailure(e.to_string()))?;
        Ok(())
    }
}

impl PacketSink for UdpTransport {
    fn send(&self, packet: &EncodedPacket) -> FaceLinkResult<()> {
        self.send_bytes(packet.as_bytes())
    }
}
