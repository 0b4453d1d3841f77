//! UDP broadcast transport
//!
//! Stands in for the link-layer broadcast on a host: every station binds the
//! same port with address reuse and sends to the broadcast address. The OS
//! hands a broadcast back to its sender, so each transport remembers what it
//! sent recently and skips those echoes.

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::VecDeque;
use std::net::{SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use super::{NetworkConfig, NetworkError, NetworkResult, Transport};

/// Datagrams larger than this are truncated by the OS and then fail the length check
const RECV_BUFFER_SIZE: usize = 512;

/// Sent frames remembered for echo suppression
const RECENT_SENDS: usize = 32;

pub struct UdpBroadcastTransport {
    socket: UdpSocket,
    target: SocketAddr,
    recent: Mutex<VecDeque<Vec<u8>>>,
}

impl UdpBroadcastTransport {
    /// Bind the shared port with broadcast enabled
    ///
    /// Port 0 binds an ephemeral port and broadcasts to that same port.
    pub fn bind(config: &NetworkConfig) -> NetworkResult<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;

        let bind_addr = SocketAddrV4::new(config.bind_address, config.port);
        socket.bind(&SocketAddr::V4(bind_addr).into())?;

        let socket = UdpSocket::from_std(socket.into())?;
        let port = socket.local_addr()?.port();
        let target = SocketAddr::V4(SocketAddrV4::new(config.broadcast_address, port));

        tracing::info!("Broadcast transport bound to {} -> {}", socket.local_addr()?, target);

        Ok(Self {
            socket,
            target,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_SENDS)),
        })
    }

    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn remember(&self, frame: &[u8]) {
        let mut recent = self.recent.lock().await;
        if recent.len() == RECENT_SENDS {
            recent.pop_front();
        }
        recent.push_back(frame.to_vec());
    }

    async fn forget(&self, frame: &[u8]) {
        let mut recent = self.recent.lock().await;
        if let Some(pos) = recent.iter().rposition(|f| f.as_slice() == frame) {
            recent.remove(pos);
        }
    }

    /// True if `frame` is the echo of one of our sends; the match is consumed
    async fn is_echo(&self, frame: &[u8]) -> bool {
        let mut recent = self.recent.lock().await;
        match recent.iter().position(|f| f.as_slice() == frame) {
            Some(pos) => {
                recent.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Transport for UdpBroadcastTransport {
    async fn send(&self, frame: &[u8]) -> NetworkResult<()> {
        // Recorded before sending: the echo can arrive before send_to returns
        self.remember(frame).await;

        let sent = match self.socket.send_to(frame, self.target).await {
            Ok(sent) => sent,
            Err(e) => {
                self.forget(frame).await;
                return Err(NetworkError::SendFailure(e.to_string()));
            }
        };

        if sent != frame.len() {
            self.forget(frame).await;
            return Err(NetworkError::SendFailure(format!(
                "short send: {} of {} bytes",
                sent,
                frame.len()
            )));
        }
        Ok(())
    }

    async fn recv(&self) -> NetworkResult<Vec<u8>> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if self.is_echo(&buf[..len]).await {
                tracing::trace!("Skipping own {}-byte frame", len);
                continue;
            }
            tracing::trace!("{} bytes from {}", len, from);
            return Ok(buf[..len].to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    /// Bound to localhost on an ephemeral port, sending to itself
    fn localhost_transport() -> UdpBroadcastTransport {
        UdpBroadcastTransport::bind(&NetworkConfig {
            port: 0,
            bind_address: Ipv4Addr::LOCALHOST,
            broadcast_address: Ipv4Addr::LOCALHOST,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_own_frames_are_not_received() {
        let transport = localhost_transport();
        let port = transport.local_addr().unwrap().port();

        // Sent twice, as repeated broadcasts are
        transport.send(b"own frame").await.unwrap();
        transport.send(b"own frame").await.unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"peer frame", ("127.0.0.1", port)).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), transport.recv())
            .await
            .expect("no frame received")
            .unwrap();
        assert_eq!(frame, b"peer frame".to_vec());
    }

    #[tokio::test]
    async fn test_peer_frame_equal_to_an_old_send_still_arrives() {
        let transport = localhost_transport();
        let port = transport.local_addr().unwrap().port();

        transport.send(b"hello").await.unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"hello", ("127.0.0.1", port)).await.unwrap();

        // Our echo consumes the remembered send, the peer's copy gets through
        let frame = tokio::time::timeout(Duration::from_secs(2), transport.recv())
            .await
            .expect("no frame received")
            .unwrap();
        assert_eq!(frame, b"hello".to_vec());
    }
}
