use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::peer::peer_config::PeerConfig;
use crate::peer::peer_connection::{PeerConnection, PeerContext, TransportKind};
use crate::peer::peer_state::PeerState;
use crate::peer::registry::PeerRegistry;
use crate::test_util::host_port::test_host_port_from_number;
use crate::test_util::transport::RecordingWriter;

static PEER_COUNTER: AtomicU16 = AtomicU16::new(100);

/// Context with default config, advertising [test_host_port_from_number] `(1)` as this node's
///  address
pub fn test_peer_context(registry: Arc<dyn PeerRegistry>) -> PeerContext {
    PeerContext {
        config: Arc::new(PeerConfig::new(test_host_port_from_number(1))),
        registry,
    }
}

/// Creates a peer connection that writes to a channel instead of a socket. Each peer gets a
///  distinct transport level address.
///
/// This must be called inside a tokio runtime.
pub fn test_peer(kind: TransportKind, state: PeerState, registry: Arc<dyn PeerRegistry>) -> (Arc<PeerConnection>, mpsc::UnboundedReceiver<String>) {
    let number = PEER_COUNTER.fetch_add(1, Ordering::AcqRel);
    let (writer, records) = RecordingWriter::new();

    let peer = PeerConnection::with_writer(
        &format!("peer-{}", number),
        test_host_port_from_number(number),
        state,
        kind,
        Box::new(writer),
        test_peer_context(registry),
    );
    (peer, records)
}
