use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::peer::transport_writer::TransportWriter;

/// Makes every written record available through a channel. Writing fails once the receiving
///  side is dropped, like writing to a socket whose remote side is gone.
pub struct RecordingWriter {
    records: mpsc::UnboundedSender<String>,
}

impl RecordingWriter {
    pub fn new() -> (RecordingWriter, mpsc::UnboundedReceiver<String>) {
        let (records, receiver) = mpsc::unbounded_channel();
        (RecordingWriter { records }, receiver)
    }
}

#[async_trait]
impl TransportWriter for RecordingWriter {
    async fn write_record(&mut self, record: &str) -> anyhow::Result<()> {
        self.records.send(record.to_string())
            .map_err(|_| anyhow!("record receiver was dropped"))
    }
}


/// accepts and forgets every record
pub struct DiscardingWriter;

#[async_trait]
impl TransportWriter for DiscardingWriter {
    async fn write_record(&mut self, _record: &str) -> anyhow::Result<()> {
        Ok(())
    }
}


/// fails every write, like a socket that was reset by the remote side
pub struct FailingWriter;

#[async_trait]
impl TransportWriter for FailingWriter {
    async fn write_record(&mut self, _record: &str) -> anyhow::Result<()> {
        Err(anyhow!("connection reset"))
    }
}


/// Never completes a write, like a socket whose remote side stopped reading. The returned counter
///  is incremented when the writer is dropped, i.e. when the transport is released.
pub struct StalledWriter {
    drops: Arc<AtomicUsize>,
}

impl StalledWriter {
    pub fn new() -> (StalledWriter, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        (StalledWriter { drops: drops.clone() }, drops)
    }
}

#[async_trait]
impl TransportWriter for StalledWriter {
    async fn write_record(&mut self, _record: &str) -> anyhow::Result<()> {
        std::future::pending::<anyhow::Result<()>>().await
    }
}

impl Drop for StalledWriter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::AcqRel);
    }
}
