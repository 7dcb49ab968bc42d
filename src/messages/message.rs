use std::fmt::{Debug, Formatter};

use serde_json::{json, Map, Value};

use crate::messages::codec::MessageError;
use crate::messages::command::Command;
use crate::messages::file_descriptor::FileDescriptor;
use crate::messages::host_port::HostPort;

/// The structured payload of a message, i.e. the JSON object that is sent on the wire
pub type Document = Map<String, Value>;

pub const FIELD_COMMAND: &str = "command";
pub const FIELD_HOST_PORT: &str = "hostPort";
pub const FIELD_PEERS: &str = "peers";
pub const FIELD_MESSAGE: &str = "message";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_FILE_DESCRIPTOR: &str = "fileDescriptor";
pub const FIELD_PATH_NAME: &str = "pathName";
pub const FIELD_POSITION: &str = "position";
pub const FIELD_LENGTH: &str = "length";
pub const FIELD_CONTENT: &str = "content";

/// A single unit of peer communication. Messages are immutable once constructed.
///
/// Every message carries a *summary*, a string that is derived from its command and identifying
///  content. A request and its response have the same summary, and so do retransmissions of the
///  same request - the summary correlates them. It is explicitly *not* a unique message id.
#[derive(Clone, PartialEq)]
pub struct Message {
    command: Command,
    document: Document,
    summary: String,
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.command, self.summary)
    }
}

impl Message {
    fn new(command: Command, summary: String, fields: Vec<(&str, Value)>) -> Message {
        let mut document = Document::new();
        document.insert(FIELD_COMMAND.to_string(), Value::String(command.as_str().to_string()));
        for (key, value) in fields {
            document.insert(key.to_string(), value);
        }

        Message {
            command,
            document,
            summary,
        }
    }

    /// Builds a message from a received document, validating the fields its command requires
    pub fn from_document(document: Document) -> Result<Message, MessageError> {
        let command = require_str(&document, FIELD_COMMAND)?
            .parse::<Command>()?;
        let summary = derive_summary(command, &document)?;

        Ok(Message {
            command,
            document,
            summary,
        })
    }

    pub fn invalid_protocol(reason: &str) -> Message {
        Message::new(Command::InvalidProtocol, "INVALID".to_string(), vec![
            (FIELD_MESSAGE, json!(reason)),
        ])
    }

    pub fn connection_refused(reason: &str, peers: &[HostPort]) -> Message {
        Message::new(Command::ConnectionRefused, handshake_summary(), vec![
            (FIELD_MESSAGE, json!(reason)),
            (FIELD_PEERS, json!(peers)),
        ])
    }

    pub fn handshake_request(self_host_port: &HostPort) -> Message {
        Message::new(Command::HandshakeRequest, handshake_summary(), vec![
            (FIELD_HOST_PORT, json!(self_host_port)),
        ])
    }

    pub fn handshake_response(self_host_port: &HostPort) -> Message {
        Message::new(Command::HandshakeResponse, handshake_summary(), vec![
            (FIELD_HOST_PORT, json!(self_host_port)),
        ])
    }

    pub fn file_create_request(file_descriptor: &FileDescriptor, path_name: &str) -> Message {
        Self::file_request(Command::FileCreateRequest, file_descriptor, path_name)
    }

    pub fn file_create_response(file_descriptor: &FileDescriptor, path_name: &str, reply: &str, status: bool) -> Message {
        Self::file_response(Command::FileCreateResponse, file_descriptor, path_name, reply, status)
    }

    pub fn file_delete_request(file_descriptor: &FileDescriptor, path_name: &str) -> Message {
        Self::file_request(Command::FileDeleteRequest, file_descriptor, path_name)
    }

    pub fn file_delete_response(file_descriptor: &FileDescriptor, path_name: &str, reply: &str, status: bool) -> Message {
        Self::file_response(Command::FileDeleteResponse, file_descriptor, path_name, reply, status)
    }

    pub fn file_modify_request(file_descriptor: &FileDescriptor, path_name: &str) -> Message {
        Self::file_request(Command::FileModifyRequest, file_descriptor, path_name)
    }

    pub fn file_modify_response(file_descriptor: &FileDescriptor, path_name: &str, reply: &str, status: bool) -> Message {
        Self::file_response(Command::FileModifyResponse, file_descriptor, path_name, reply, status)
    }

    pub fn directory_create_request(path_name: &str) -> Message {
        Message::new(Command::DirectoryCreateRequest, directory_summary(Command::DirectoryCreateRequest, path_name), vec![
            (FIELD_PATH_NAME, json!(path_name)),
        ])
    }

    pub fn directory_create_response(path_name: &str, reply: &str, status: bool) -> Message {
        Message::new(Command::DirectoryCreateResponse, directory_summary(Command::DirectoryCreateResponse, path_name), vec![
            (FIELD_PATH_NAME, json!(path_name)),
            (FIELD_MESSAGE, json!(reply)),
            (FIELD_STATUS, json!(status)),
        ])
    }

    pub fn directory_delete_request(path_name: &str) -> Message {
        Message::new(Command::DirectoryDeleteRequest, directory_summary(Command::DirectoryDeleteRequest, path_name), vec![
            (FIELD_PATH_NAME, json!(path_name)),
        ])
    }

    pub fn directory_delete_response(path_name: &str, reply: &str, status: bool) -> Message {
        Message::new(Command::DirectoryDeleteResponse, directory_summary(Command::DirectoryDeleteResponse, path_name), vec![
            (FIELD_PATH_NAME, json!(path_name)),
            (FIELD_MESSAGE, json!(reply)),
            (FIELD_STATUS, json!(status)),
        ])
    }

    pub fn file_bytes_request(file_descriptor: &FileDescriptor, path_name: &str, position: u64, length: u64) -> Message {
        Message::new(Command::FileBytesRequest, bytes_summary(path_name, file_descriptor, position), vec![
            (FIELD_FILE_DESCRIPTOR, json!(file_descriptor)),
            (FIELD_PATH_NAME, json!(path_name)),
            (FIELD_POSITION, json!(position)),
            (FIELD_LENGTH, json!(length)),
        ])
    }

    /// `content` is the base64 encoded chunk of file data
    pub fn file_bytes_response(file_descriptor: &FileDescriptor, path_name: &str, position: u64, length: u64, content: &str, reply: &str, status: bool) -> Message {
        Message::new(Command::FileBytesResponse, bytes_summary(path_name, file_descriptor, position), vec![
            (FIELD_FILE_DESCRIPTOR, json!(file_descriptor)),
            (FIELD_PATH_NAME, json!(path_name)),
            (FIELD_POSITION, json!(position)),
            (FIELD_LENGTH, json!(length)),
            (FIELD_CONTENT, json!(content)),
            (FIELD_MESSAGE, json!(reply)),
            (FIELD_STATUS, json!(status)),
        ])
    }

    fn file_request(command: Command, file_descriptor: &FileDescriptor, path_name: &str) -> Message {
        Message::new(command, file_summary(command, path_name, file_descriptor), vec![
            (FIELD_FILE_DESCRIPTOR, json!(file_descriptor)),
            (FIELD_PATH_NAME, json!(path_name)),
        ])
    }

    fn file_response(command: Command, file_descriptor: &FileDescriptor, path_name: &str, reply: &str, status: bool) -> Message {
        Message::new(command, file_summary(command, path_name, file_descriptor), vec![
            (FIELD_FILE_DESCRIPTOR, json!(file_descriptor)),
            (FIELD_PATH_NAME, json!(path_name)),
            (FIELD_MESSAGE, json!(reply)),
            (FIELD_STATUS, json!(status)),
        ])
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn is_request(&self) -> bool {
        self.command.is_request()
    }

    pub fn is_control(&self) -> bool {
        self.command.is_control()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn get_str(&self, field: &str) -> Result<&str, MessageError> {
        require_str(&self.document, field)
    }

    pub fn get_u64(&self, field: &str) -> Result<u64, MessageError> {
        require_u64(&self.document, field)
    }

    pub fn get_bool(&self, field: &str) -> Result<bool, MessageError> {
        require(&self.document, field)?
            .as_bool()
            .ok_or_else(|| MessageError::WrongType { field: field.to_string(), expected: "boolean" })
    }

    /// the sender's self-reported address, as carried by handshake messages
    pub fn host_port(&self) -> Result<HostPort, MessageError> {
        require_host_port(&self.document)
    }

    pub fn peers(&self) -> Result<Vec<HostPort>, MessageError> {
        serde_json::from_value(require(&self.document, FIELD_PEERS)?.clone())
            .map_err(|_| MessageError::WrongType { field: FIELD_PEERS.to_string(), expected: "list of addresses" })
    }

    pub fn file_descriptor(&self) -> Result<FileDescriptor, MessageError> {
        require_file_descriptor(&self.document)
    }

    pub fn path_name(&self) -> Result<&str, MessageError> {
        require_str(&self.document, FIELD_PATH_NAME)
    }
}


fn handshake_summary() -> String {
    "HANDSHAKE".to_string()
}

fn file_summary(command: Command, path_name: &str, file_descriptor: &FileDescriptor) -> String {
    let kind = match command {
        Command::FileCreateRequest | Command::FileCreateResponse => "CREATE",
        Command::FileDeleteRequest | Command::FileDeleteResponse => "DELETE",
        _ => "MODIFY",
    };
    format!("{}:{}:{}", kind, path_name, file_descriptor.to_json())
}

fn directory_summary(command: Command, path_name: &str) -> String {
    let kind = match command {
        Command::DirectoryCreateRequest | Command::DirectoryCreateResponse => "MKDIR",
        _ => "RMDIR",
    };
    format!("{}:{}", kind, path_name)
}

fn bytes_summary(path_name: &str, file_descriptor: &FileDescriptor, position: u64) -> String {
    format!("BYTES:{}:{}:{}", path_name, file_descriptor.to_json(), position)
}

/// Checks that a received document has all fields its command requires, and derives the summary
///  from them
fn derive_summary(command: Command, document: &Document) -> Result<String, MessageError> {
    match command {
        Command::InvalidProtocol => {
            require_str(document, FIELD_MESSAGE)?;
            Ok("INVALID".to_string())
        }
        Command::ConnectionRefused => {
            require_str(document, FIELD_MESSAGE)?;
            require(document, FIELD_PEERS)?;
            Ok(handshake_summary())
        }
        Command::HandshakeRequest | Command::HandshakeResponse => {
            require_host_port(document)?;
            Ok(handshake_summary())
        }
        Command::FileCreateRequest | Command::FileDeleteRequest | Command::FileModifyRequest => {
            let file_descriptor = require_file_descriptor(document)?;
            Ok(file_summary(command, require_str(document, FIELD_PATH_NAME)?, &file_descriptor))
        }
        Command::FileCreateResponse | Command::FileDeleteResponse | Command::FileModifyResponse => {
            require_reply(document)?;
            let file_descriptor = require_file_descriptor(document)?;
            Ok(file_summary(command, require_str(document, FIELD_PATH_NAME)?, &file_descriptor))
        }
        Command::DirectoryCreateRequest | Command::DirectoryDeleteRequest => {
            Ok(directory_summary(command, require_str(document, FIELD_PATH_NAME)?))
        }
        Command::DirectoryCreateResponse | Command::DirectoryDeleteResponse => {
            require_reply(document)?;
            Ok(directory_summary(command, require_str(document, FIELD_PATH_NAME)?))
        }
        Command::FileBytesRequest => {
            require_u64(document, FIELD_LENGTH)?;
            let file_descriptor = require_file_descriptor(document)?;
            Ok(bytes_summary(require_str(document, FIELD_PATH_NAME)?, &file_descriptor, require_u64(document, FIELD_POSITION)?))
        }
        Command::FileBytesResponse => {
            require_reply(document)?;
            require_u64(document, FIELD_LENGTH)?;
            require_str(document, FIELD_CONTENT)?;
            let file_descriptor = require_file_descriptor(document)?;
            Ok(bytes_summary(require_str(document, FIELD_PATH_NAME)?, &file_descriptor, require_u64(document, FIELD_POSITION)?))
        }
    }
}

fn require<'a>(document: &'a Document, field: &str) -> Result<&'a Value, MessageError> {
    document.get(field)
        .ok_or_else(|| MessageError::MissingField(field.to_string()))
}

fn require_str<'a>(document: &'a Document, field: &str) -> Result<&'a str, MessageError> {
    require(document, field)?
        .as_str()
        .ok_or_else(|| MessageError::WrongType { field: field.to_string(), expected: "string" })
}

fn require_u64(document: &Document, field: &str) -> Result<u64, MessageError> {
    require(document, field)?
        .as_u64()
        .ok_or_else(|| MessageError::WrongType { field: field.to_string(), expected: "unsigned integer" })
}

fn require_reply(document: &Document) -> Result<(), MessageError> {
    require_str(document, FIELD_MESSAGE)?;
    require(document, FIELD_STATUS)?
        .as_bool()
        .ok_or_else(|| MessageError::WrongType { field: FIELD_STATUS.to_string(), expected: "boolean" })?;
    Ok(())
}

fn require_host_port(document: &Document) -> Result<HostPort, MessageError> {
    serde_json::from_value(require(document, FIELD_HOST_PORT)?.clone())
        .map_err(|_| MessageError::WrongType { field: FIELD_HOST_PORT.to_string(), expected: "host and port" })
}

fn require_file_descriptor(document: &Document) -> Result<FileDescriptor, MessageError> {
    serde_json::from_value(require(document, FIELD_FILE_DESCRIPTOR)?.clone())
        .map_err(|_| MessageError::WrongType { field: FIELD_FILE_DESCRIPTOR.to_string(), expected: "file descriptor" })
}
