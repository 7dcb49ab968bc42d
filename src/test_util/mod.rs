//! This module contains utilities that are useful for testing code based on peer connections.
//!  They are used for testing the connection layer itself, but they are also exported for
//!  application testing, e.g. for exercising a [crate::peer::dispatcher::MessageHandler]
//!  without any network I/O.

pub mod host_port;
pub mod peer;
pub mod registry;
pub mod transport;
