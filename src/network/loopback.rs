//! In-process broadcast bus
//!
//! Every attached transport sees every frame except the ones it sent itself,
//! which is how the radio broadcast behaves.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use super::{NetworkError, NetworkResult, Transport};

/// Sender id used for frames injected from outside any station
const INJECTED: u64 = 0;

#[derive(Debug, Clone)]
struct BusFrame {
    sender: u64,
    bytes: Vec<u8>,
}

/// Shared medium that transports attach to
#[derive(Clone)]
pub struct LoopbackBus {
    tx: broadcast::Sender<BusFrame>,
    next_id: Arc<AtomicU64>,
}

impl LoopbackBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(INJECTED + 1)),
        }
    }

    /// Attach a new station to the bus
    pub fn attach(&self) -> LoopbackTransport {
        LoopbackTransport {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
        }
    }

    /// Put raw bytes on the air, as foreign traffic would
    pub fn inject(&self, bytes: &[u8]) {
        let _ = self.tx.send(BusFrame {
            sender: INJECTED,
            bytes: bytes.to_vec(),
        });
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct LoopbackTransport {
    id: u64,
    tx: broadcast::Sender<BusFrame>,
    rx: Mutex<broadcast::Receiver<BusFrame>>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, frame: &[u8]) -> NetworkResult<()> {
        self.tx
            .send(BusFrame {
                sender: self.id,
                bytes: frame.to_vec(),
            })
            .map(|_| ())
            .map_err(|_| NetworkError::SendFailure("no stations listening".to_string()))
    }

    async fn recv(&self) -> NetworkResult<Vec<u8>> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok(frame) if frame.sender == self.id => continue,
                Ok(frame) => return Ok(frame.bytes),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Loopback receiver lagged, {} frames lost", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(NetworkError::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_reach_others_but_not_sender() {
        let bus = LoopbackBus::default();
        let a = bus.attach();
        let b = bus.attach();

        a.send(b"from-a").await.unwrap();
        b.send(b"from-b").await.unwrap();

        assert_eq!(b.recv().await.unwrap(), b"from-a".to_vec());
        assert_eq!(a.recv().await.unwrap(), b"from-b".to_vec());
    }

    #[tokio::test]
    async fn test_injected_frames_reach_everyone() {
        let bus = LoopbackBus::default();
        let a = bus.attach();
        let b = bus.attach();

        bus.inject(b"noise");

        assert_eq!(a.recv().await.unwrap(), b"noise".to_vec());
        assert_eq!(b.recv().await.unwrap(), b"noise".to_vec());
    }
}
