pub mod codec;
pub mod command;
pub mod file_descriptor;
pub mod host_port;
pub mod message;

pub use codec::{decode, encode, MessageError};
pub use command::Command;
pub use file_descriptor::FileDescriptor;
pub use host_port::HostPort;
pub use message::Message;
