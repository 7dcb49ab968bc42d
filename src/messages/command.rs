use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::messages::codec::MessageError;

/// The `command` field of a wire document, identifying the kind of message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Command {
    InvalidProtocol,
    ConnectionRefused,
    HandshakeRequest,
    HandshakeResponse,
    FileCreateRequest,
    FileCreateResponse,
    FileDeleteRequest,
    FileDeleteResponse,
    FileModifyRequest,
    FileModifyResponse,
    DirectoryCreateRequest,
    DirectoryCreateResponse,
    DirectoryDeleteRequest,
    DirectoryDeleteResponse,
    FileBytesRequest,
    FileBytesResponse,
}

impl Command {
    pub const ALL: [Command; 16] = [
        Command::InvalidProtocol,
        Command::ConnectionRefused,
        Command::HandshakeRequest,
        Command::HandshakeResponse,
        Command::FileCreateRequest,
        Command::FileCreateResponse,
        Command::FileDeleteRequest,
        Command::FileDeleteResponse,
        Command::FileModifyRequest,
        Command::FileModifyResponse,
        Command::DirectoryCreateRequest,
        Command::DirectoryCreateResponse,
        Command::DirectoryDeleteRequest,
        Command::DirectoryDeleteResponse,
        Command::FileBytesRequest,
        Command::FileBytesResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::InvalidProtocol => "INVALID_PROTOCOL",
            Command::ConnectionRefused => "CONNECTION_REFUSED",
            Command::HandshakeRequest => "HANDSHAKE_REQUEST",
            Command::HandshakeResponse => "HANDSHAKE_RESPONSE",
            Command::FileCreateRequest => "FILE_CREATE_REQUEST",
            Command::FileCreateResponse => "FILE_CREATE_RESPONSE",
            Command::FileDeleteRequest => "FILE_DELETE_REQUEST",
            Command::FileDeleteResponse => "FILE_DELETE_RESPONSE",
            Command::FileModifyRequest => "FILE_MODIFY_REQUEST",
            Command::FileModifyResponse => "FILE_MODIFY_RESPONSE",
            Command::DirectoryCreateRequest => "DIRECTORY_CREATE_REQUEST",
            Command::DirectoryCreateResponse => "DIRECTORY_CREATE_RESPONSE",
            Command::DirectoryDeleteRequest => "DIRECTORY_DELETE_REQUEST",
            Command::DirectoryDeleteResponse => "DIRECTORY_DELETE_RESPONSE",
            Command::FileBytesRequest => "FILE_BYTES_REQUEST",
            Command::FileBytesResponse => "FILE_BYTES_RESPONSE",
        }
    }

    /// Requests are answered by a response with the same summary. Over datagram transport, they
    ///  are resent until that response arrives.
    pub fn is_request(&self) -> bool {
        matches!(self,
            Command::HandshakeRequest
            | Command::FileCreateRequest
            | Command::FileDeleteRequest
            | Command::FileModifyRequest
            | Command::DirectoryCreateRequest
            | Command::DirectoryDeleteRequest
            | Command::FileBytesRequest
        )
    }

    /// Control messages may be sent before a connection is activated.
    pub fn is_control(&self) -> bool {
        matches!(self,
            Command::InvalidProtocol
            | Command::ConnectionRefused
            | Command::HandshakeRequest
            | Command::HandshakeResponse
        )
    }

    pub fn is_handshake(&self) -> bool {
        matches!(self,
            Command::ConnectionRefused
            | Command::HandshakeRequest
            | Command::HandshakeResponse
        )
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL.iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| MessageError::UnknownCommand(s.to_string()))
    }
}
