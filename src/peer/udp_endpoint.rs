use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::{debug, error, info, warn};

use crate::messages::codec::RECORD_TERMINATOR;
use crate::peer::peer_config::PeerConfig;
use crate::peer::peer_connection::{PeerConnection, PeerContext};
use crate::peer::peer_state::PeerState;
use crate::peer::registry::ConnectionRegistry;

/// A single UDP socket shared by all datagram peers. Received packets are routed to the peer
///  connection for the sender's address, and a packet from an unknown address creates a new
///  inbound connection.
pub struct UdpEndpoint {
    socket: Arc<UdpSocket>,
    registry: Arc<ConnectionRegistry>,
    context: PeerContext,
}

impl UdpEndpoint {
    pub async fn bind(addr: impl ToSocketAddrs, registry: Arc<ConnectionRegistry>, config: Arc<PeerConfig>) -> anyhow::Result<UdpEndpoint> {
        config.validate()?;

        let socket = UdpSocket::bind(addr).await?;
        info!("bound datagram socket to {:?}", socket.local_addr()?);

        Ok(UdpEndpoint {
            socket: Arc::new(socket),
            context: PeerContext {
                config,
                registry: registry.clone(),
            },
            registry,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn recv_loop(&self) {
        let mut buf = vec![0u8; self.context.config.max_udp_packet_len];

        loop {
            let (num_read, from) = match self.socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            let packet = match std::str::from_utf8(&buf[..num_read]) {
                Ok(packet) => packet,
                Err(_) => {
                    warn!("received packet from {:?} that is not valid UTF-8 - dropping", from);
                    continue;
                }
            };

            let peer = self.peer_for_sender(from);
            for record in packet.split(RECORD_TERMINATOR) {
                if !record.trim().is_empty() {
                    peer.receive_message(record.to_string());
                }
            }
        }
    }

    fn peer_for_sender(&self, from: SocketAddr) -> Arc<PeerConnection> {
        if let Some(peer) = self.registry.find_datagram_peer(from) {
            return peer;
        }

        debug!("first packet from {:?} - creating inbound connection", from);
        PeerConnection::new_udp(&self.registry.next_peer_name(), self.socket.clone(), from, PeerState::WaitForRequest, self.context.clone())
    }

    /// Creates a connection to `addr` and starts the handshake. Use
    ///  [PeerConnection::await_activation] to wait for its outcome.
    pub fn connect(&self, addr: SocketAddr) -> Arc<PeerConnection> {
        PeerConnection::new_udp(&self.registry.next_peer_name(), self.socket.clone(), addr, PeerState::WaitForResponse, self.context.clone())
    }
}
