//! Network module - Broadcast transport between stations
//!
//! Provides:
//! - `Transport` trait over a connectionless broadcast medium
//! - UDP broadcast transport for running stations on a host
//! - In-process loopback bus for tests and simulation
//! - The receive task that gates packets on length and checksum

mod loopback;
mod receiver;
mod udp;

pub use loopback::*;
pub use receiver::*;
pub use udp::*;

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Send failed: {0}")]
    SendFailure(String),

    #[error("Transport closed")]
    Closed,
}

pub type NetworkResult<T> = Result<T, NetworkError>;

/// A connectionless broadcast medium
///
/// `send` is fire-and-forget: success means the frame left this station, not
/// that anyone received it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Broadcast one frame to every station
    async fn send(&self, frame: &[u8]) -> NetworkResult<()>;

    /// Wait for the next inbound frame
    async fn recv(&self) -> NetworkResult<Vec<u8>>;
}

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port shared by every station
    pub port: u16,
    /// Local interface to bind
    pub bind_address: Ipv4Addr,
    /// Destination for outbound frames
    pub broadcast_address: Ipv4Addr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::protocol::DEFAULT_PORT,
            bind_address: Ipv4Addr::UNSPECIFIED,
            broadcast_address: Ipv4Addr::BROADCAST,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }
}

/// Send the same frame `attempts` times, `gap` apart
///
/// Failures are logged and never retried beyond `attempts`. Returns how many
/// sends the transport accepted.
pub async fn broadcast_repeated(
    transport: &dyn Transport,
    frame: &[u8],
    attempts: u32,
    gap: Duration,
) -> u32 {
    let attempts = attempts.max(1);
    let mut delivered = 0;

    for attempt in 1..=attempts {
        match transport.send(frame).await {
            Ok(()) => {
                delivered += 1;
                tracing::debug!("Broadcast {}/{} sent", attempt, attempts);
            }
            Err(e) => {
                tracing::warn!("Broadcast {}/{} failed: {}", attempt, attempts, e);
            }
        }

        if attempt < attempts && !gap.is_zero() {
            tokio::time::sleep(gap).await;
        }
    }

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Accepts every other send
    struct FlakyTransport {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, _frame: &[u8]) -> NetworkResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call % 2 == 0 {
                Ok(())
            } else {
                Err(NetworkError::SendFailure("radio busy".to_string()))
            }
        }

        async fn recv(&self) -> NetworkResult<Vec<u8>> {
            Err(NetworkError::Closed)
        }
    }

    #[tokio::test]
    async fn test_broadcast_repeated_counts_successes() {
        let transport = FlakyTransport {
            calls: AtomicU32::new(0),
        };
        let delivered = broadcast_repeated(&transport, &[0u8; 64], 3, Duration::ZERO).await;
        assert_eq!(delivered, 2);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_broadcast_repeated_sends_at_least_once() {
        let transport = FlakyTransport {
            calls: AtomicU32::new(0),
        };
        let delivered =
            tokio_test::block_on(broadcast_repeated(&transport, &[0u8; 64], 0, Duration::ZERO));
        assert_eq!(delivered, 1);
    }

    #[test]
    fn test_default_config() {
        let config = NetworkConfig::default();
        assert_eq!(config.port, crate::protocol::DEFAULT_PORT);
        assert_eq!(config.broadcast_address, Ipv4Addr::BROADCAST);
    }
}
