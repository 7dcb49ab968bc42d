//! Wire framing: each message is a single line of UTF-8 text containing a compact JSON object.
//!  The line terminator is added by the transport writer, not by [encode].

use serde_json::Value;

use crate::messages::message::Message;

/// Error decoding a received record into a [Message]
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document is not a JSON object")]
    NotAnObject,
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("field {field} is not a valid {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

pub const RECORD_TERMINATOR: char = '\n';

/// Serialize a message to its wire form, without the record terminator
pub fn encode(message: &Message) -> String {
    // serializing a map of JSON values can not fail
    serde_json::to_string(message.document())
        .unwrap_or_default()
}

/// Parse a single record (with or without its terminator)
pub fn decode(record: &str) -> Result<Message, MessageError> {
    match serde_json::from_str::<Value>(record.trim_end_matches(['\r', '\n']))? {
        Value::Object(document) => Message::from_document(document),
        _ => Err(MessageError::NotAnObject),
    }
}
