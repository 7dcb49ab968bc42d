pub mod dispatcher;
pub mod incoming;
pub mod outgoing;
pub mod peer_config;
pub mod peer_connection;
pub mod peer_state;
pub mod registry;
pub mod retry;
pub mod tcp_endpoint;
pub mod transport_writer;
pub mod udp_endpoint;
