use std::time::Duration;
use anyhow::bail;

use crate::messages::HostPort;

#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// The address this node advertises in handshakes, i.e. the address other peers should use
    ///  to connect back to us. This is not necessarily the address a listener is bound to.
    pub self_host_port: HostPort,

    /// number of times a request sent over datagram transport is resent before the connection is
    ///  given up on
    pub udp_retries: u32,
    /// time to wait for a response before resending a request over datagram transport
    pub udp_retry_interval: Duration,

    pub max_udp_packet_len: usize,
}

impl PeerConfig {
    pub fn new(self_host_port: HostPort) -> PeerConfig {
        PeerConfig {
            self_host_port,
            udp_retries: 3,
            udp_retry_interval: Duration::from_millis(1000),
            max_udp_packet_len: 65507,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.udp_retry_interval.is_zero() {
            bail!("UDP retry interval must not be zero");
        }
        if self.max_udp_packet_len == 0 {
            bail!("maximum UDP packet length must not be zero");
        }
        Ok(())
    }
}
