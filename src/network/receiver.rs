//! Receive task
//!
//! Pulls frames off the transport, drops anything that is not a valid packet and
//! hands verified messages to the station loop through a bounded queue. It never
//! touches station state and never waits on the queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{NetworkError, Transport};
use crate::protocol::{decode_verified, CodecError, ShowcaseMessage};

/// Back-off after a transport error so a broken socket does not spin
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Receive statistics
#[derive(Debug, Default)]
pub struct ReceiverStats {
    /// Verified messages queued for the station
    pub accepted: AtomicU64,
    /// Frames that were not exactly one packet long
    pub bad_length: AtomicU64,
    /// Frames whose checksum did not match
    pub bad_checksum: AtomicU64,
    /// Verified messages dropped because the queue was full
    pub overflow: AtomicU64,
}

impl ReceiverStats {
    pub fn dropped(&self) -> u64 {
        self.bad_length.load(Ordering::Relaxed)
            + self.bad_checksum.load(Ordering::Relaxed)
            + self.overflow.load(Ordering::Relaxed)
    }
}

/// Spawn the receive task; it ends when the transport or the queue closes
pub fn spawn_receiver(
    transport: Arc<dyn Transport>,
    queue: mpsc::Sender<ShowcaseMessage>,
    stats: Arc<ReceiverStats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let frame = match transport.recv().await {
                Ok(frame) => frame,
                Err(NetworkError::Closed) => {
                    tracing::info!("Transport closed, receiver stopping");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Receive error: {}", e);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            };

            let message = match decode_verified(&frame) {
                Ok(message) => message,
                Err(CodecError::InvalidLength(len)) => {
                    stats.bad_length.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Dropping {}-byte frame: not a showcase packet", len);
                    continue;
                }
                Err(e) => {
                    stats.bad_checksum.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Dropping frame: {}", e);
                    continue;
                }
            };

            match queue.try_send(message) {
                Ok(()) => {
                    stats.accepted.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(message)) => {
                    stats.overflow.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Receive queue full, dropping {}", message.summary());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("Station loop gone, receiver stopping");
                    break;
                }
            }
        }
    })
}
