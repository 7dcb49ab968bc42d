use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::UdpSocket;
use tracing::trace;

use crate::messages::codec::RECORD_TERMINATOR;

/// This is an abstraction for writing records to a peer's transport, introduced to decouple the
///  outgoing worker from the kind of transport and to facilitate mocking the I/O part away for
///  testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransportWriter: Send + 'static {
    /// Writes a single record, followed by the record terminator. An error means that the
    ///  transport is unusable.
    async fn write_record(&mut self, record: &str) -> anyhow::Result<()>;
}


pub struct TcpWriter {
    stream: BufWriter<OwnedWriteHalf>,
}
impl TcpWriter {
    pub fn new(write_half: OwnedWriteHalf) -> TcpWriter {
        TcpWriter {
            stream: BufWriter::new(write_half),
        }
    }
}

#[async_trait]
impl TransportWriter for TcpWriter {
    async fn write_record(&mut self, record: &str) -> anyhow::Result<()> {
        self.stream.write_all(record.as_bytes()).await?;
        self.stream.write_u8(RECORD_TERMINATOR as u8).await?;
        self.stream.flush().await?;
        Ok(())
    }
}


/// Sends each record as a single datagram to a fixed peer address on a socket that is shared
///  between all datagram peers. The packet buffer is reused between sends.
pub struct UdpWriter {
    socket: Arc<UdpSocket>,
    peer_addr: SocketAddr,
    packet: BytesMut,
}
impl UdpWriter {
    pub fn new(socket: Arc<UdpSocket>, peer_addr: SocketAddr) -> UdpWriter {
        UdpWriter {
            socket,
            peer_addr,
            packet: BytesMut::new(),
        }
    }
}

#[async_trait]
impl TransportWriter for UdpWriter {
    async fn write_record(&mut self, record: &str) -> anyhow::Result<()> {
        self.packet.clear();
        self.packet.put_slice(record.as_bytes());
        self.packet.put_u8(RECORD_TERMINATOR as u8);

        trace!("UDP socket: sending packet to {:?}", self.peer_addr);
        self.socket.send_to(&self.packet, self.peer_addr).await?;
        Ok(())
    }
}
