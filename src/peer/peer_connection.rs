use std::collections::hash_map::Entry;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::io::BufReader;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::messages::{encode, HostPort, Message};
use crate::peer::incoming::run_incoming;
use crate::peer::outgoing::{OnSent, OutgoingConnection, OutgoingMessage};
use crate::peer::peer_config::PeerConfig;
use crate::peer::peer_state::PeerState;
use crate::peer::registry::{PeerRegistry, ReceivedMessage};
use crate::peer::retry::{RetryHandle, RetryTask};
use crate::peer::transport_writer::{TcpWriter, TransportWriter, UdpWriter};
use crate::util::atomic_map::AtomicMap;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportKind {
    /// reliable, ordered byte stream (TCP)
    Stream,
    /// unreliable datagrams (UDP), with requests being resent until a response arrives
    Datagram,
}

enum PeerTransport {
    Stream {
        reader: CancellationToken,
    },
    Datagram {
        retry_tasks: AtomicMap<String, RetryHandle>,
    },
}

/// Everything a peer connection needs from its surroundings
#[derive(Clone)]
pub struct PeerContext {
    pub config: Arc<PeerConfig>,
    pub registry: Arc<dyn PeerRegistry>,
}

/// A single connection to a remote peer, either stream based or datagram based.
///
/// A connection starts in a handshake state (depending on whether it was opened locally or
///  accepted), becomes [PeerState::Active] when the handshake completes, and is eventually
///  [PeerState::Closed]. Closing is idempotent, and teardown happens exactly once.
///
/// All methods can be called concurrently from any task. Outgoing messages are written in the
///  order they were sent by a dedicated worker task.
pub struct PeerConnection {
    name: String,
    /// the transport level address of the remote peer
    local_host_port: HostPort,
    /// the address the remote peer advertised in the handshake, or the transport level address
    ///  before the handshake is completed
    host_port: Mutex<HostPort>,
    was_outgoing: bool,
    state: Mutex<PeerState>,
    /// becomes `true` when the handshake is over, successfully or not
    activation_settled: watch::Sender<bool>,
    outgoing: OutgoingConnection,
    transport: PeerTransport,
    context: PeerContext,
    myself: Weak<PeerConnection>,
}

impl PeerConnection {
    /// Wraps a connected TCP stream, spawning the reader and the outgoing worker
    pub fn new_tcp(name: &str, stream: TcpStream, state: PeerState, context: PeerContext) -> anyhow::Result<Arc<PeerConnection>> {
        let remote_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let peer = Self::with_writer(
            name,
            HostPort::from(remote_addr),
            state,
            TransportKind::Stream,
            Box::new(TcpWriter::new(write_half)),
            context,
        );

        if let PeerTransport::Stream { reader } = &peer.transport {
            tokio::spawn(run_incoming(BufReader::new(read_half), Arc::downgrade(&peer), reader.clone()));
        }
        Ok(peer)
    }

    /// Creates a connection to `remote_addr` over a shared UDP socket. Received datagrams are
    ///  routed to the connection by the socket's receive loop.
    pub fn new_udp(name: &str, socket: Arc<UdpSocket>, remote_addr: SocketAddr, state: PeerState, context: PeerContext) -> Arc<PeerConnection> {
        Self::with_writer(
            name,
            HostPort::from(remote_addr),
            state,
            TransportKind::Datagram,
            Box::new(UdpWriter::new(socket, remote_addr)),
            context,
        )
    }

    /// Creates a connection on top of an arbitrary [TransportWriter] and registers it. For
    ///  outbound connections (i.e. `state` is [PeerState::WaitForResponse]), the handshake request
    ///  is sent right away, so a response can never arrive for an unregistered connection.
    pub fn with_writer(
        name: &str,
        local_host_port: HostPort,
        state: PeerState,
        kind: TransportKind,
        writer: Box<dyn TransportWriter>,
        context: PeerContext,
    ) -> Arc<PeerConnection> {
        info!("peer created: {} @ {} ({:?})", name, local_host_port, kind);

        let peer = Arc::new_cyclic(|myself: &Weak<PeerConnection>| {
            let transport = match kind {
                TransportKind::Stream => PeerTransport::Stream { reader: CancellationToken::new() },
                TransportKind::Datagram => PeerTransport::Datagram { retry_tasks: AtomicMap::new() },
            };

            PeerConnection {
                name: name.to_string(),
                host_port: Mutex::new(local_host_port.clone()),
                local_host_port,
                was_outgoing: state == PeerState::WaitForResponse,
                state: Mutex::new(state),
                activation_settled: watch::channel(false).0,
                outgoing: OutgoingConnection::start(name, writer, myself.clone()),
                transport,
                context,
                myself: myself.clone(),
            }
        });

        peer.context.registry.on_connection_opened(peer.clone());

        if peer.is_outgoing() {
            let request = Message::handshake_request(&peer.context.config.self_host_port);
            peer.send_message_internal(request, None);
        }
        peer
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport_kind(&self) -> TransportKind {
        match &self.transport {
            PeerTransport::Stream { .. } => TransportKind::Stream,
            PeerTransport::Datagram { .. } => TransportKind::Datagram,
        }
    }

    pub fn state(&self) -> PeerState {
        *self.lock_state()
    }

    pub fn local_host_port(&self) -> &HostPort {
        &self.local_host_port
    }

    pub fn host_port(&self) -> HostPort {
        self.lock_host_port().clone()
    }

    pub fn foreign_name(&self) -> String {
        format!("{}-{}", self.name, self.host_port())
    }

    pub fn is_outgoing(&self) -> bool {
        self.was_outgoing
    }

    /// number of requests currently waiting for a response (datagram transport only)
    pub fn pending_retries(&self) -> usize {
        match &self.transport {
            PeerTransport::Stream { .. } => 0,
            PeerTransport::Datagram { retry_tasks } => retry_tasks.len(),
        }
    }

    /// Completes the handshake with the address the remote peer advertised. If another active
    ///  connection to the same peer exists already, this connection is closed instead.
    pub fn activate(&self, host_port: HostPort) {
        let duplicate = self.context.registry.active_peers()
            .into_iter()
            .find(|other| !std::ptr::eq(other.as_ref(), self) && (other.matches_address(&host_port) || other.is_same_peer(self)));

        if let Some(existing) = duplicate {
            info!("{}: already connected to {} as {} - closing duplicate connection", self.foreign_name(), host_port, existing);
            self.close();
            return;
        }

        {
            let mut state = self.lock_state();
            if state.is_waiting_for_handshake() {
                *self.lock_host_port() = host_port;
                *state = PeerState::Active;
            }
            else {
                debug!("{}: not activating in state {}", self.name, *state);
            }
        }
        info!("{}: peer is now {}", self.foreign_name(), self.state());
        self.settle_activation();
    }

    /// Waits until the handshake is over, returning `true` if the connection became active and
    ///  `false` if it was closed before that.
    pub async fn await_activation(&self) -> bool {
        let mut settled = self.activation_settled.subscribe();
        if settled.wait_for(|&settled| settled).await.is_err() {
            return false;
        }
        self.state() == PeerState::Active
    }

    fn settle_activation(&self) {
        self.activation_settled.send_if_modified(|settled| {
            if *settled {
                false
            }
            else {
                *settled = true;
                true
            }
        });
    }

    /// Enqueues a message for sending. Messages other than control messages can only be sent on
    ///  an active connection: an attempt to send them before the handshake is complete is a
    ///  protocol violation, and the remote peer is notified and disconnected.
    pub fn send_message(&self, message: Message) {
        self.send_message_with(message, None);
    }

    /// Sends a final message and closes the connection after it was written. No other messages
    ///  are sent after this call.
    pub fn send_message_and_close(&self, message: Message) {
        self.send_message_with(message, Some(self.close_after_sent()));
        self.deactivate();
    }

    fn send_message_with(&self, message: Message, on_sent: Option<OnSent>) {
        let state = self.state();
        if message.is_control() || state == PeerState::Active {
            self.send_message_internal(message, on_sent);
        }
        else if !state.is_shut_down() {
            warn!("{}: attempt to send {:?} in state {} - closing", self.foreign_name(), message, state);
            let protocol_error = Message::invalid_protocol("handshake must be completed before sending messages");
            self.send_message_internal(protocol_error, Some(self.close_after_sent()));
            self.deactivate();
        }
        else {
            debug!("{}: connection is {} - dropping {:?}", self.foreign_name(), state, message);
        }
    }

    fn send_message_internal(&self, message: Message, on_sent: Option<OnSent>) {
        if self.state() == PeerState::Closed {
            debug!("{}: connection is closed - dropping {:?}", self.foreign_name(), message);
            return;
        }
        if message.is_request() {
            self.register_retry(&message);
        }
        self.enqueue(&message, on_sent);
    }

    /// resend without registering a retry task, called by the retry task itself
    pub(crate) fn retry_message(&self, message: &Message) {
        if self.state() == PeerState::Closed {
            return;
        }
        self.enqueue(message, None);
    }

    fn enqueue(&self, message: &Message, on_sent: Option<OnSent>) {
        info!("{} sent: {}", self.foreign_name(), message.command());
        self.outgoing.add_message(OutgoingMessage::new(encode(message), on_sent));
    }

    fn register_retry(&self, message: &Message) {
        let PeerTransport::Datagram { retry_tasks } = &self.transport else {
            return;
        };

        let handle = RetryHandle::new();
        let is_new = retry_tasks.update(|tasks| match tasks.entry(message.summary().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(handle.clone());
                true
            }
        });

        if is_new {
            debug!("{}: waiting for response to {:?}", self.foreign_name(), message);
            RetryTask::new(self.myself.clone(), message.clone(), &self.context.config)
                .spawn(&handle);
        }
        else {
            debug!("{}: already waiting for response to {:?}", self.foreign_name(), message);
        }
    }

    fn close_after_sent(&self) -> OnSent {
        let myself = self.myself.clone();
        Box::new(move || {
            if let Some(peer) = myself.upgrade() {
                peer.close();
            }
        })
    }

    fn deactivate(&self) {
        let mut state = self.lock_state();
        if *state != PeerState::Closed {
            *state = PeerState::Inactive;
        }
    }

    /// Hands a received record to the registry's inbound queue
    pub fn receive_message(&self, record: String) {
        let Some(peer) = self.myself.upgrade() else {
            return;
        };
        self.context.registry.enqueue_message(ReceivedMessage { record, peer });
    }

    /// Called for every message received on this connection. A response stops resending the
    ///  correlated request.
    pub fn notify(&self, message: &Message) {
        let PeerTransport::Datagram { retry_tasks } = &self.transport else {
            return;
        };
        if message.is_request() {
            return;
        }

        if let Some(handle) = retry_tasks.remove(&message.summary().to_string()) {
            debug!("{}: received response for {}", self.foreign_name(), message.summary());
            handle.kill();
        }
    }

    /// Closes the connection. This is idempotent and can be called concurrently.
    pub fn close(&self) {
        {
            let mut state = self.lock_state();
            if *state == PeerState::Closed {
                return;
            }
            *state = PeerState::Closed;
        }

        self.settle_activation();
        self.outgoing.deactivate();
        self.context.registry.on_connection_closed(self);

        match &self.transport {
            PeerTransport::Stream { reader } => reader.cancel(),
            PeerTransport::Datagram { retry_tasks } => {
                let handles = retry_tasks.update(|tasks| tasks.drain().map(|(_, handle)| handle).collect::<Vec<_>>());
                for handle in handles {
                    handle.kill();
                }
            }
        }

        warn!("connection to peer {} closed", self.foreign_name());
    }

    /// `true` if the address matches either the negotiated or the transport level address
    pub fn matches_address(&self, host_port: &HostPort) -> bool {
        self.host_port().fuzzy_eq(host_port) || self.local_host_port.fuzzy_eq(host_port)
    }

    /// Two connections are considered to lead to the same peer if either's negotiated address
    ///  matches the other's negotiated or transport level address
    pub fn is_same_peer(&self, other: &PeerConnection) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.matches_address(&other.host_port()) || other.matches_address(&self.host_port())
    }

    fn lock_state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_host_port(&self) -> MutexGuard<'_, HostPort> {
        self.host_port.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Display for PeerConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let host_port = self.host_port();
        write!(f, "{} @ {} ({})", self.name, host_port, host_port.as_aliased_address())
    }
}
