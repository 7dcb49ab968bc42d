use std::fmt::{Display, Formatter};

/// Lifecycle of a [crate::peer::peer_connection::PeerConnection].
///
/// Transitions only move toward [PeerState::Closed], with the exception of [PeerState::Active]
///  and [PeerState::Inactive], and `Closed` is terminal:
///
/// ```ascii
///  WaitForRequest  --+
///                    +--> Active <--> Inactive --> Closed
///  WaitForResponse --+
///  (any state) -------------------------------------> Closed
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PeerState {
    /// inbound connection, waiting for the remote peer's handshake request
    WaitForRequest,
    /// outbound connection, handshake request sent and waiting for the response
    WaitForResponse,
    Active,
    Closed,
    /// a final message is in flight, and the connection will be closed once it is sent. No other
    ///  messages are sent in this state.
    Inactive,
}

impl PeerState {
    pub fn is_waiting_for_handshake(&self) -> bool {
        matches!(self, PeerState::WaitForRequest | PeerState::WaitForResponse)
    }

    /// connections in these states send nothing at all, not even protocol errors
    pub fn is_shut_down(&self) -> bool {
        matches!(self, PeerState::Closed | PeerState::Inactive)
    }
}

impl Display for PeerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PeerState::WaitForRequest => "WAIT_FOR_REQUEST",
            PeerState::WaitForResponse => "WAIT_FOR_RESPONSE",
            PeerState::Active => "ACTIVE",
            PeerState::Closed => "CLOSED",
            PeerState::Inactive => "INACTIVE",
        };
        f.write_str(s)
    }
}
