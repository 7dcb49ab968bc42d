use std::sync::Weak;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::peer::peer_connection::PeerConnection;
use crate::peer::peer_state::PeerState;

/// Reads newline-terminated records from a stream and forwards them to the peer connection.
///
/// Reading stops at end of stream, on a read error or when the connection cancels the reader.
///  The connection is closed in all of these cases.
pub async fn run_incoming<R>(reader: R, peer: Weak<PeerConnection>, cancel: CancellationToken)
where R: AsyncBufRead + Unpin
{
    let mut lines = reader.lines();

    loop {
        let line = select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        let Some(connection) = peer.upgrade() else {
            return;
        };

        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                trace!("received from {}: {}", connection.foreign_name(), line);
                connection.receive_message(line);
            }
            Ok(None) => {
                debug!("{}: end of stream", connection.foreign_name());
                break;
            }
            Err(e) => {
                // reading from a socket fails routinely after it was closed locally
                if connection.state() != PeerState::Closed {
                    error!("{}: error reading from stream: {}", connection.foreign_name(), e);
                }
                break;
            }
        }
    }

    if let Some(peer) = peer.upgrade() {
        peer.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::BufReader;

    use super::*;
    use crate::peer::peer_connection::TransportKind;
    use crate::test_util::peer::test_peer;
    use crate::test_util::registry::TrackingRegistry;

    #[tokio::test]
    async fn test_read_until_end_of_stream() {
        let registry = TrackingRegistry::new();
        let (peer, _records) = test_peer(TransportKind::Stream, PeerState::WaitForRequest, registry.clone());

        let data: &[u8] = b"first\n\n  \nsecond\r\nthird";
        run_incoming(data, Arc::downgrade(&peer), CancellationToken::new()).await;

        assert_eq!(registry.received(), vec!["first".to_string(), "second".to_string(), "third".to_string()]);
        assert_eq!(peer.state(), PeerState::Closed);
        assert_eq!(registry.num_closed(), 1);
    }

    #[tokio::test]
    async fn test_cancel() {
        let registry = TrackingRegistry::new();
        let (peer, _records) = test_peer(TransportKind::Stream, PeerState::WaitForRequest, registry.clone());

        let (_remote, local) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(run_incoming(BufReader::new(local), Arc::downgrade(&peer), cancel.clone()));

        cancel.cancel();
        reader.await.unwrap();

        assert!(registry.received().is_empty());
        assert_eq!(peer.state(), PeerState::Closed);
    }
}
