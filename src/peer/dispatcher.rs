use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::messages::{decode, Command, HostPort, Message};
use crate::messages::message::FIELD_MESSAGE;
use crate::peer::peer_config::PeerConfig;
use crate::peer::peer_connection::PeerConnection;
use crate::peer::peer_state::PeerState;
use crate::peer::registry::ReceivedMessage;

/// Application level processing of messages received on active connections. Handshake and
///  protocol error messages are handled by the [Dispatcher] itself and never reach the handler.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, peer: Arc<PeerConnection>, message: Message);
}


/// Consumes the inbound queue, decoding each record and driving the handshake of the connection
///  it was received on
pub struct Dispatcher {
    self_host_port: HostPort,
    handler: Arc<dyn MessageHandler>,
    inbound: mpsc::UnboundedReceiver<ReceivedMessage>,
}

impl Dispatcher {
    pub fn new(config: &PeerConfig, handler: Arc<dyn MessageHandler>, inbound: mpsc::UnboundedReceiver<ReceivedMessage>) -> Dispatcher {
        Dispatcher {
            self_host_port: config.self_host_port.clone(),
            handler,
            inbound,
        }
    }

    pub async fn run(mut self) {
        info!("starting dispatcher");
        while let Some(received) = self.inbound.recv().await {
            self.dispatch(received).await;
        }
        info!("inbound queue closed - shutting down dispatcher");
    }

    pub async fn dispatch(&self, received: ReceivedMessage) {
        let ReceivedMessage { record, peer } = received;
        trace!("dispatching from {}: {}", peer.foreign_name(), record);

        let message = match decode(&record) {
            Ok(message) => message,
            Err(e) => {
                warn!("{}: malformed message: {} - closing", peer.foreign_name(), e);
                peer.send_message_and_close(Message::invalid_protocol(&format!("malformed message: {}", e)));
                return;
            }
        };

        info!("{} received: {}", peer.foreign_name(), message.command());
        peer.notify(&message);

        let state = peer.state();
        match message.command() {
            Command::HandshakeRequest if state == PeerState::WaitForRequest => {
                self.on_handshake(&peer, &message, true);
            }
            Command::HandshakeRequest if state == PeerState::Active => {
                // datagram peers resend their request if the response was lost
                debug!("{}: repeated handshake request - answering again", peer.foreign_name());
                peer.send_message(Message::handshake_response(&self.self_host_port));
            }
            Command::HandshakeResponse if state == PeerState::WaitForResponse => {
                self.on_handshake(&peer, &message, false);
            }
            Command::HandshakeResponse if state == PeerState::Active => {
                debug!("{}: repeated handshake response - ignoring", peer.foreign_name());
            }
            Command::ConnectionRefused => {
                let reason = message.get_str(FIELD_MESSAGE).unwrap_or("");
                warn!("{}: connection refused: {}", peer.foreign_name(), reason);
                peer.close();
            }
            Command::InvalidProtocol => {
                let reason = message.get_str(FIELD_MESSAGE).unwrap_or("");
                warn!("{}: remote peer reported a protocol violation: {}", peer.foreign_name(), reason);
                peer.close();
            }
            command if command.is_handshake() => {
                warn!("{}: unexpected {} in state {} - closing", peer.foreign_name(), command, state);
                peer.send_message_and_close(Message::invalid_protocol(&format!("unexpected {}", command)));
            }
            _ if state == PeerState::Active => {
                self.handler.on_message(peer, message).await;
            }
            command => {
                warn!("{}: received {} in state {} - closing", peer.foreign_name(), command, state);
                peer.send_message_and_close(Message::invalid_protocol("handshake must be completed before sending messages"));
            }
        }
    }

    fn on_handshake(&self, peer: &PeerConnection, message: &Message, is_request: bool) {
        let remote = match message.host_port() {
            Ok(remote) => remote,
            Err(e) => {
                warn!("{}: invalid handshake: {} - closing", peer.foreign_name(), e);
                peer.send_message_and_close(Message::invalid_protocol(&format!("invalid handshake: {}", e)));
                return;
            }
        };

        peer.activate(remote);
        if is_request && peer.state() == PeerState::Active {
            peer.send_message(Message::handshake_response(&self.self_host_port));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::messages::{encode, FileDescriptor};
    use crate::peer::peer_connection::TransportKind;
    use crate::test_util::host_port::test_host_port_from_number;
    use crate::test_util::peer::test_peer;
    use crate::test_util::registry::TrackingRegistry;

    fn dispatcher(handler: MockMessageHandler) -> Dispatcher {
        let (_sender, inbound) = mpsc::unbounded_channel();
        Dispatcher::new(&PeerConfig::new(test_host_port_from_number(1)), Arc::new(handler), inbound)
    }

    fn received(peer: &Arc<PeerConnection>, message: &Message) -> ReceivedMessage {
        ReceivedMessage {
            record: encode(message),
            peer: peer.clone(),
        }
    }

    fn file_request() -> Message {
        Message::file_delete_request(&FileDescriptor::new("abc", 1, 2), "x/y")
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_handshake() {
        let registry = TrackingRegistry::new();
        let (peer, mut records) = test_peer(TransportKind::Stream, PeerState::WaitForRequest, registry.clone());
        let dispatcher = dispatcher(MockMessageHandler::new());

        dispatcher.dispatch(received(&peer, &Message::handshake_request(&test_host_port_from_number(2)))).await;

        assert_eq!(peer.state(), PeerState::Active);
        assert_eq!(peer.host_port(), test_host_port_from_number(2));

        let response = decode(&records.recv().await.unwrap()).unwrap();
        assert_eq!(response.command(), Command::HandshakeResponse);
        assert_eq!(response.host_port().unwrap(), test_host_port_from_number(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_handshake() {
        let registry = TrackingRegistry::new();
        let (peer, mut records) = test_peer(TransportKind::Datagram, PeerState::WaitForResponse, registry.clone());
        let dispatcher = dispatcher(MockMessageHandler::new());

        assert_eq!(decode(&records.recv().await.unwrap()).unwrap().command(), Command::HandshakeRequest);
        assert_eq!(peer.pending_retries(), 1);

        dispatcher.dispatch(received(&peer, &Message::handshake_response(&test_host_port_from_number(2)))).await;

        assert!(peer.await_activation().await);
        assert_eq!(peer.pending_retries(), 0);
        sleep(Duration::from_millis(5000)).await;
        assert!(records.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_to_handler() {
        let mut handler = MockMessageHandler::new();
        handler.expect_on_message()
            .withf(|_, message| message.command() == Command::FileDeleteRequest)
            .times(1)
            .return_const(());

        let registry = TrackingRegistry::new();
        let (peer, _records) = test_peer(TransportKind::Stream, PeerState::WaitForRequest, registry.clone());
        peer.activate(test_host_port_from_number(2));

        dispatcher(handler).dispatch(received(&peer, &file_request())).await;
        assert_eq!(peer.state(), PeerState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_before_handshake() {
        let mut handler = MockMessageHandler::new();
        handler.expect_on_message().never();

        let registry = TrackingRegistry::new();
        let (peer, mut records) = test_peer(TransportKind::Stream, PeerState::WaitForRequest, registry.clone());

        dispatcher(handler).dispatch(received(&peer, &file_request())).await;

        assert_eq!(decode(&records.recv().await.unwrap()).unwrap().command(), Command::InvalidProtocol);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_record() {
        let registry = TrackingRegistry::new();
        let (peer, mut records) = test_peer(TransportKind::Stream, PeerState::WaitForRequest, registry.clone());

        dispatcher(MockMessageHandler::new()).dispatch(ReceivedMessage { record: "{not json".to_string(), peer: peer.clone() }).await;

        assert_eq!(decode(&records.recv().await.unwrap()).unwrap().command(), Command::InvalidProtocol);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_refused() {
        let registry = TrackingRegistry::new();
        let (peer, _records) = test_peer(TransportKind::Stream, PeerState::WaitForResponse, registry.clone());

        let refused = Message::connection_refused("too many peers", &[test_host_port_from_number(3)]);
        dispatcher(MockMessageHandler::new()).dispatch(received(&peer, &refused)).await;

        assert_eq!(peer.state(), PeerState::Closed);
        assert!(!peer.await_activation().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_handshake() {
        let registry = TrackingRegistry::new();
        let (peer, mut records) = test_peer(TransportKind::Stream, PeerState::WaitForRequest, registry.clone());

        dispatcher(MockMessageHandler::new()).dispatch(received(&peer, &Message::handshake_response(&test_host_port_from_number(2)))).await;

        assert_eq!(decode(&records.recv().await.unwrap()).unwrap().command(), Command::InvalidProtocol);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_handshake_request() {
        let registry = TrackingRegistry::new();
        let (peer, mut records) = test_peer(TransportKind::Datagram, PeerState::WaitForRequest, registry.clone());
        let dispatcher = dispatcher(MockMessageHandler::new());

        let request = Message::handshake_request(&test_host_port_from_number(2));
        dispatcher.dispatch(received(&peer, &request)).await;
        dispatcher.dispatch(received(&peer, &request)).await;

        for _ in 0..2 {
            assert_eq!(decode(&records.recv().await.unwrap()).unwrap().command(), Command::HandshakeResponse);
        }
        assert_eq!(peer.state(), PeerState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_queue_closed() {
        let mut handler = MockMessageHandler::new();
        handler.expect_on_message().never();

        let registry = TrackingRegistry::new();
        let (peer, _records) = test_peer(TransportKind::Stream, PeerState::WaitForRequest, registry.clone());

        let (sender, inbound) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(&PeerConfig::new(test_host_port_from_number(1)), Arc::new(handler), inbound);
        let running = tokio::spawn(dispatcher.run());

        sender.send(received(&peer, &Message::handshake_request(&test_host_port_from_number(2)))).unwrap();
        drop(sender);
        running.await.unwrap();

        assert_eq!(peer.state(), PeerState::Active);
    }
}
