use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, error, info};

use crate::peer::peer_config::PeerConfig;
use crate::peer::peer_connection::{PeerConnection, PeerContext};
use crate::peer::peer_state::PeerState;
use crate::peer::registry::ConnectionRegistry;

/// Accepts inbound stream connections and opens outbound ones, registering all of them with a
///  [ConnectionRegistry]
pub struct TcpEndpoint {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    context: PeerContext,
}

impl TcpEndpoint {
    pub async fn bind(addr: impl ToSocketAddrs, registry: Arc<ConnectionRegistry>, config: Arc<PeerConfig>) -> anyhow::Result<TcpEndpoint> {
        config.validate()?;

        let listener = TcpListener::bind(addr).await?;
        info!("listening for stream connections on {:?}", listener.local_addr()?);

        Ok(TcpEndpoint {
            listener,
            context: PeerContext {
                config,
                registry: registry.clone(),
            },
            registry,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn accept_loop(&self) {
        loop {
            let (stream, remote_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("error accepting connection: {}", e);
                    continue;
                }
            };
            debug!("accepted connection from {:?}", remote_addr);

            if let Err(e) = PeerConnection::new_tcp(&self.registry.next_peer_name(), stream, PeerState::WaitForRequest, self.context.clone()) {
                error!("error setting up connection from {:?}: {}", remote_addr, e);
            }
        }
    }

    /// Opens a connection and starts the handshake. Use
    ///  [PeerConnection::await_activation] to wait for its outcome.
    pub async fn connect(&self, addr: impl ToSocketAddrs) -> anyhow::Result<Arc<PeerConnection>> {
        let stream = TcpStream::connect(addr).await?;
        PeerConnection::new_tcp(&self.registry.next_peer_name(), stream, PeerState::WaitForResponse, self.context.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::messages::{FileDescriptor, HostPort, Message};
    use crate::peer::dispatcher::{Dispatcher, MessageHandler};

    /// answers every file request with a successful response
    struct EchoHandler {
        received: mpsc::UnboundedSender<Message>,
    }

    #[async_trait]
    impl MessageHandler for EchoHandler {
        async fn on_message(&self, peer: Arc<PeerConnection>, message: Message) {
            if message.is_request() {
                let fd = message.file_descriptor().unwrap();
                peer.send_message(Message::file_create_response(&fd, message.path_name().unwrap(), "ok", true));
            }
            let _ = self.received.send(message);
        }
    }

    async fn start_node(port_hint: u16) -> (Arc<TcpEndpoint>, mpsc::UnboundedReceiver<Message>) {
        let listener_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (registry, inbound) = ConnectionRegistry::new();

        // the advertised address only needs to be unique in the test
        let config = Arc::new(PeerConfig::new(HostPort::new("127.0.0.1", port_hint)));
        let endpoint = Arc::new(TcpEndpoint::bind(listener_addr, registry, config.clone()).await.unwrap());

        let (received, received_receiver) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(&config, Arc::new(EchoHandler { received }), inbound);
        tokio::spawn(dispatcher.run());

        let accepting = endpoint.clone();
        tokio::spawn(async move { accepting.accept_loop().await });

        (endpoint, received_receiver)
    }

    #[tokio::test]
    async fn test_handshake_and_request() {
        let (server, mut server_received) = start_node(40001).await;
        let (client, mut client_received) = start_node(40002).await;

        let peer = client.connect(server.local_addr().unwrap()).await.unwrap();
        assert!(timeout(Duration::from_secs(5), peer.await_activation()).await.unwrap());
        assert_eq!(peer.host_port(), HostPort::new("127.0.0.1", 40001));

        let fd = FileDescriptor::new("abc", 1, 2);
        peer.send_message(Message::file_create_request(&fd, "some/file"));

        let request = timeout(Duration::from_secs(5), server_received.recv()).await.unwrap().unwrap();
        assert_eq!(request.path_name().unwrap(), "some/file");

        let response = timeout(Duration::from_secs(5), client_received.recv()).await.unwrap().unwrap();
        assert_eq!(response.summary(), request.summary());

        let server_peer = server.registry.get_peer(&HostPort::new("localhost", 40002)).unwrap();
        assert!(server_peer.is_same_peer(&server_peer));
        assert!(!server_peer.is_outgoing());
        assert!(peer.is_outgoing());
    }

    #[tokio::test]
    async fn test_remote_close() {
        let (server, _server_received) = start_node(40011).await;
        let (client, _client_received) = start_node(40012).await;

        let peer = client.connect(server.local_addr().unwrap()).await.unwrap();
        assert!(timeout(Duration::from_secs(5), peer.await_activation()).await.unwrap());

        assert!(server.registry.disconnect(&HostPort::new("127.0.0.1", 40012)));

        timeout(Duration::from_secs(5), async {
            while peer.state() != PeerState::Closed {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }).await.unwrap();
        assert!(client.registry.peers().is_empty());
    }
}
