use std::sync::Weak;
use std::time::Duration;

use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::messages::Message;
use crate::peer::peer_config::PeerConfig;
use crate::peer::peer_connection::PeerConnection;
use crate::peer::peer_state::PeerState;

/// Handle for stopping a running [RetryTask]. Stopping is idempotent, and the task stops at its
///  next suspension point at the latest.
#[derive(Clone, Debug, Default)]
pub struct RetryHandle {
    cancel: CancellationToken,
}

impl RetryHandle {
    pub fn new() -> RetryHandle {
        Default::default()
    }

    pub fn kill(&self) {
        self.cancel.cancel();
    }
}


/// Resends a request over datagram transport until a correlated response arrives (which kills
///  the task) or the configured number of retries is exhausted, in which case the connection is
///  closed.
///
/// The initial send is not part of the retry task, so a request is written at most
///  `1 + udp_retries` times.
pub struct RetryTask {
    peer: Weak<PeerConnection>,
    message: Message,
    retry_count: u32,
    retry_interval: Duration,
}

impl RetryTask {
    pub fn new(peer: Weak<PeerConnection>, message: Message, config: &PeerConfig) -> RetryTask {
        RetryTask {
            peer,
            message,
            retry_count: config.udp_retries,
            retry_interval: config.udp_retry_interval,
        }
    }

    pub fn spawn(self, handle: &RetryHandle) {
        tokio::spawn(self.run(handle.cancel.clone()));
    }

    async fn run(self, cancel: CancellationToken) {
        let mut retries = 0;

        loop {
            select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("retry task for {:?} stopped", self.message);
                    return;
                }
                _ = sleep(self.retry_interval) => {}
            }

            let Some(peer) = self.peer.upgrade() else {
                return;
            };
            if peer.state() == PeerState::Closed {
                return;
            }

            if retries >= self.retry_count {
                warn!("{}: no response to {:?} after {} retries - closing connection", peer.foreign_name(), self.message, retries);
                peer.close();
                return;
            }

            retries += 1;
            debug!("{}: resending {:?} (retry #{})", peer.foreign_name(), self.message, retries);
            peer.retry_message(&self.message);
        }
    }
}
