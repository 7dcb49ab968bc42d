use std::sync::{Arc, Mutex, PoisonError};

use crate::peer::peer_connection::PeerConnection;
use crate::peer::peer_state::PeerState;
use crate::peer::registry::{PeerRegistry, ReceivedMessage};

/// A [PeerRegistry] that records all interactions for later inspection. Only peers that were
///  explicitly added are considered when looking for active peers.
#[derive(Default)]
pub struct TrackingRegistry {
    opened: Mutex<Vec<String>>,
    peers: Mutex<Vec<Arc<PeerConnection>>>,
    closed: Mutex<Vec<String>>,
    received: Mutex<Vec<String>>,
}

impl TrackingRegistry {
    pub fn new() -> Arc<TrackingRegistry> {
        Default::default()
    }

    pub fn add(&self, peer: Arc<PeerConnection>) {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).push(peer);
    }

    pub fn peers(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// number of calls to [PeerRegistry::on_connection_opened]
    pub fn num_opened(&self) -> usize {
        self.opened.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// number of calls to [PeerRegistry::on_connection_closed]
    pub fn num_closed(&self) -> usize {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl PeerRegistry for TrackingRegistry {
    fn on_connection_opened(&self, peer: Arc<PeerConnection>) {
        self.opened.lock().unwrap_or_else(PoisonError::into_inner).push(peer.name().to_string());
    }

    fn on_connection_closed(&self, peer: &PeerConnection) {
        self.closed.lock().unwrap_or_else(PoisonError::into_inner).push(peer.name().to_string());
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).retain(|p| !std::ptr::eq(p.as_ref(), peer));
    }

    fn active_peers(&self) -> Vec<Arc<PeerConnection>> {
        self.peers()
            .into_iter()
            .filter(|p| p.state() == PeerState::Active)
            .collect()
    }

    fn enqueue_message(&self, received: ReceivedMessage) {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).push(received.record);
    }
}
