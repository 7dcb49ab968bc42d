use std::sync::Weak;

use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::peer::peer_connection::PeerConnection;
use crate::peer::transport_writer::TransportWriter;

/// called by the outgoing worker after the message was written successfully
pub type OnSent = Box<dyn FnOnce() + Send>;

/// An encoded message waiting to be written, together with an optional action to run once it
///  is written
pub struct OutgoingMessage {
    pub record: String,
    pub on_sent: Option<OnSent>,
}

impl OutgoingMessage {
    pub fn new(record: String, on_sent: Option<OnSent>) -> OutgoingMessage {
        OutgoingMessage {
            record,
            on_sent,
        }
    }
}


/// The writing side of a peer connection: a FIFO queue of outgoing messages that is drained by
///  a dedicated worker task.
///
/// When the worker terminates for whatever reason (write error, deactivation), it closes the
///  peer connection: a connection with a broken outgoing side is useless.
pub struct OutgoingConnection {
    queue: mpsc::UnboundedSender<OutgoingMessage>,
    active: CancellationToken,
}

impl OutgoingConnection {
    /// Spawns the worker task. This must be called inside a tokio runtime.
    pub fn start(peer_name: &str, writer: Box<dyn TransportWriter>, peer: Weak<PeerConnection>) -> OutgoingConnection {
        let (queue, messages) = mpsc::unbounded_channel();
        let active = CancellationToken::new();

        tokio::spawn(run_outgoing(peer_name.to_string(), writer, messages, active.clone(), peer));

        OutgoingConnection {
            queue,
            active,
        }
    }

    pub fn add_message(&self, message: OutgoingMessage) {
        if self.queue.send(message).is_err() {
            debug!("outgoing worker has terminated - dropping message");
        }
    }

    /// Stops the worker promptly, discarding messages that were not written yet. A write that is in
    ///  progress is abandoned, and the transport writer is dropped.
    pub fn deactivate(&self) {
        self.active.cancel();
    }
}

async fn run_outgoing(
    peer_name: String,
    mut writer: Box<dyn TransportWriter>,
    mut messages: mpsc::UnboundedReceiver<OutgoingMessage>,
    active: CancellationToken,
    peer: Weak<PeerConnection>,
) {
    debug!("starting outgoing worker for {}", peer_name);

    loop {
        let message = select! {
            biased;
            _ = active.cancelled() => break,
            message = messages.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        trace!("writing to {}: {}", peer_name, message.record);
        let written = select! {
            biased;
            _ = active.cancelled() => break,
            written = writer.write_record(&message.record) => written,
        };
        if let Err(e) = written {
            error!("error writing to {}: {}", peer_name, e);
            break;
        }

        if let Some(on_sent) = message.on_sent {
            on_sent();
        }
    }

    debug!("outgoing worker for {} terminated", peer_name);
    if let Some(peer) = peer.upgrade() {
        peer.close();
    }
}
