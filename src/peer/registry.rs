use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::messages::HostPort;
use crate::peer::peer_connection::{PeerConnection, TransportKind};
use crate::peer::peer_state::PeerState;

/// A raw record received on a peer connection, waiting to be decoded and dispatched
pub struct ReceivedMessage {
    pub record: String,
    pub peer: Arc<PeerConnection>,
}

/// The surroundings of peer connections: it keeps track of them and receives everything they
///  read.
///
/// Implementations must not call back into the peer that invokes them while holding a lock.
pub trait PeerRegistry: Send + Sync + 'static {
    /// called once per connection when it is created, before it sends or receives anything
    fn on_connection_opened(&self, peer: Arc<PeerConnection>);

    /// called exactly once per connection, when it is closed
    fn on_connection_closed(&self, peer: &PeerConnection);

    fn active_peers(&self) -> Vec<Arc<PeerConnection>>;

    fn enqueue_message(&self, received: ReceivedMessage);
}


/// Keeps the set of open peer connections and feeds received records into a single inbound queue
///  that is consumed by a [crate::peer::dispatcher::Dispatcher].
pub struct ConnectionRegistry {
    peers: RwLock<Vec<Arc<PeerConnection>>>,
    inbound: mpsc::UnboundedSender<ReceivedMessage>,
    peer_counter: AtomicU32,
}

impl ConnectionRegistry {
    pub fn new() -> (Arc<ConnectionRegistry>, mpsc::UnboundedReceiver<ReceivedMessage>) {
        let (inbound, inbound_receiver) = mpsc::unbounded_channel();
        let registry = ConnectionRegistry {
            peers: Default::default(),
            inbound,
            peer_counter: AtomicU32::new(0),
        };
        (Arc::new(registry), inbound_receiver)
    }

    pub fn next_peer_name(&self) -> String {
        format!("peer-{}", self.peer_counter.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn peers(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Finds an active peer by its negotiated address, see [HostPort::fuzzy_eq] for the
    ///  limitations of address matching
    pub fn get_peer(&self, host_port: &HostPort) -> Option<Arc<PeerConnection>> {
        self.active_peers()
            .into_iter()
            .find(|p| p.host_port().fuzzy_eq(host_port))
    }

    /// Finds the datagram connection for a sender address, regardless of its state
    pub fn find_datagram_peer(&self, addr: SocketAddr) -> Option<Arc<PeerConnection>> {
        let sender = HostPort::from(addr);
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.transport_kind() == TransportKind::Datagram && p.local_host_port() == &sender)
            .cloned()
    }

    pub fn close_connection(&self, peer: &PeerConnection) {
        peer.close();
    }

    /// Closes the active connection to a peer, returning `false` if there is none
    pub fn disconnect(&self, host_port: &HostPort) -> bool {
        match self.get_peer(host_port) {
            Some(peer) => {
                info!("disconnecting from {}", host_port);
                self.close_connection(&peer);
                true
            }
            None => {
                warn!("disconnect: no active connection to {}", host_port);
                false
            }
        }
    }
}

impl PeerRegistry for ConnectionRegistry {
    fn on_connection_opened(&self, peer: Arc<PeerConnection>) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        // the connection may have been closed while it was being set up
        if peer.state() == PeerState::Closed {
            debug!("not registering closed connection {}", peer);
            return;
        }
        if peers.iter().any(|p| Arc::ptr_eq(p, &peer)) {
            return;
        }
        debug!("registering connection {}", peer);
        peers.push(peer);
    }

    fn on_connection_closed(&self, peer: &PeerConnection) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        peers.retain(|p| !std::ptr::eq(p.as_ref(), peer));
    }

    fn active_peers(&self) -> Vec<Arc<PeerConnection>> {
        self.peers()
            .into_iter()
            .filter(|p| p.state() == PeerState::Active)
            .collect()
    }

    fn enqueue_message(&self, received: ReceivedMessage) {
        if self.inbound.send(received).is_err() {
            debug!("inbound queue is closed - dropping received message");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::sleep;

    use super::*;
    use crate::messages::{decode, Command};
    use crate::peer::peer_connection::{PeerConnection, PeerContext};
    use crate::peer::peer_config::PeerConfig;
    use crate::peer::transport_writer::TransportWriter;
    use crate::test_util::host_port::test_host_port_from_number;
    use crate::test_util::transport::DiscardingWriter;

    fn test_context(registry: &Arc<ConnectionRegistry>) -> PeerContext {
        PeerContext {
            config: Arc::new(PeerConfig::new(test_host_port_from_number(1))),
            registry: registry.clone(),
        }
    }

    fn new_peer(registry: &Arc<ConnectionRegistry>, kind: TransportKind, local: HostPort) -> Arc<PeerConnection> {
        PeerConnection::with_writer(&registry.next_peer_name(), local, PeerState::WaitForRequest, kind, Box::new(DiscardingWriter), test_context(registry))
    }

    /// reports the sender address's datagram connection as seen by the registry at the time of
    ///  each write, together with the written command
    struct LookupOnWrite {
        registry: Arc<ConnectionRegistry>,
        addr: SocketAddr,
        lookups: mpsc::UnboundedSender<(Command, Option<Arc<PeerConnection>>)>,
    }

    #[async_trait]
    impl TransportWriter for LookupOnWrite {
        async fn write_record(&mut self, record: &str) -> anyhow::Result<()> {
            let command = decode(record)?.command();
            let _ = self.lookups.send((command, self.registry.find_datagram_peer(self.addr)));
            Ok(())
        }
    }

    #[test]
    fn test_next_peer_name() {
        let (registry, _inbound) = ConnectionRegistry::new();
        assert_eq!(registry.next_peer_name(), "peer-1");
        assert_eq!(registry.next_peer_name(), "peer-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_and_close() {
        let (registry, _inbound) = ConnectionRegistry::new();
        let a = new_peer(&registry, TransportKind::Stream, test_host_port_from_number(2));
        let b = new_peer(&registry, TransportKind::Stream, test_host_port_from_number(3));
        assert_eq!(registry.peers().len(), 2);

        registry.close_connection(&a);
        let remaining = registry.peers();
        assert_eq!(remaining.len(), 1);
        assert!(Arc::ptr_eq(&remaining[0], &b));

        // a closed connection is not registered again, and neither is a registered one
        registry.on_connection_opened(a.clone());
        registry.on_connection_opened(b.clone());
        assert_eq!(registry.peers().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_before_handshake_is_sent() {
        let (registry, _inbound) = ConnectionRegistry::new();
        let addr: SocketAddr = "127.0.0.1:7100".parse().unwrap();
        let (lookups, mut lookup_receiver) = mpsc::unbounded_channel();
        let writer = LookupOnWrite { registry: registry.clone(), addr, lookups };

        let peer = PeerConnection::with_writer("peer-1", HostPort::from(addr), PeerState::WaitForResponse, TransportKind::Datagram, Box::new(writer), test_context(&registry));

        // a response to the handshake request is routed to the connection that sent it instead of
        //  creating a second, inbound one
        let (command, found) = lookup_receiver.recv().await.unwrap();
        assert_eq!(command, Command::HandshakeRequest);
        assert!(Arc::ptr_eq(&found.unwrap(), &peer));
        assert_eq!(registry.peers().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_peer_and_disconnect() {
        let (registry, _inbound) = ConnectionRegistry::new();
        let peer = new_peer(&registry, TransportKind::Stream, test_host_port_from_number(50000));

        // not active yet
        assert!(registry.get_peer(&HostPort::new("localhost", 9000)).is_none());

        peer.activate(HostPort::new("localhost", 9000));
        assert!(registry.get_peer(&HostPort::new("127.0.0.1", 9000)).is_some());
        assert!(registry.get_peer(&HostPort::new("127.0.0.1", 9001)).is_none());

        assert!(!registry.disconnect(&HostPort::new("localhost", 9001)));
        assert!(registry.disconnect(&HostPort::new("localhost", 9000)));
        assert_eq!(peer.state(), PeerState::Closed);
        assert!(registry.peers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_datagram_peer() {
        let (registry, _inbound) = ConnectionRegistry::new();
        let addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        let _stream = new_peer(&registry, TransportKind::Stream, HostPort::from(addr));
        let datagram = new_peer(&registry, TransportKind::Datagram, HostPort::from(addr));

        let found = registry.find_datagram_peer(addr).unwrap();
        assert!(Arc::ptr_eq(&found, &datagram));
        assert!(registry.find_datagram_peer("127.0.0.1:7001".parse().unwrap()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_message() {
        let (registry, mut inbound) = ConnectionRegistry::new();
        let peer = new_peer(&registry, TransportKind::Stream, test_host_port_from_number(2));

        peer.receive_message("some record".to_string());
        sleep(Duration::from_millis(1)).await;

        let received = inbound.try_recv().unwrap();
        assert_eq!(received.record, "some record");
        assert!(Arc::ptr_eq(&received.peer, &peer));
    }
}
