//! UDP transport: one frame per datagram on a connected socket.
//!
//! An IPv4 UDP datagram carries at most [`MAX_UDP_PAYLOAD`] bytes, so plaintext
//! packets larger than `MAX_UDP_PAYLOAD - FRAME_OVERHEAD` (65483 bytes) cannot
//! cross this transport. `send` rejects those frames with
//! [`TransportError::Oversized`] and the pump counts them as send errors.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::BytesMut;
use seal_core::{Frame, MAX_FRAME_SIZE};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::debug;

use crate::io::{flag_raised, TransportAdapter, TransportError};

/// 65535 minus the 8-byte UDP header and the 20-byte IPv4 header.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

pub struct UdpTransport {
    socket: UdpSocket,
    closed: watch::Sender<bool>,
}

impl UdpTransport {
    /// Bind to `local` and connect to `peer`.
    pub async fn connect(local: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap a socket that is already connected to the peer.
    pub fn from_socket(socket: UdpSocket) -> Self {
        let (closed, _) = watch::channel(false);
        Self { socket, closed }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl TransportAdapter for UdpTransport {
    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let len = frame.wire_len();
        if len > MAX_UDP_PAYLOAD {
            return Err(TransportError::Oversized(len));
        }
        self.socket.send(&frame.encode()).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Frame, TransportError> {
        let mut closed = self.closed.subscribe();
        let already_closed = *closed.borrow_and_update();
        if already_closed {
            return Err(TransportError::Closed);
        }

        let mut buf = BytesMut::with_capacity(MAX_FRAME_SIZE + 1);
        tokio::select! {
            _ = flag_raised(&mut closed) => Err(TransportError::Closed),
            received = self.socket.recv_buf(&mut buf) => {
                received?;
                Ok(Frame::decode(buf.freeze())?)
            }
        }
    }

    async fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!("udp transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seal_core::{FRAME_OVERHEAD, MAX_PACKET_SIZE};
    use std::sync::Arc;
    use std::time::Duration;

    async fn connected_pair() -> (UdpTransport, UdpTransport) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();
        (UdpTransport::from_socket(a), UdpTransport::from_socket(b))
    }

    #[tokio::test]
    async fn test_frame_crosses_socket() {
        let (a, b) = connected_pair().await;
        let frame = Frame::new(42, vec![1u8; 40], [9u8; 16]);

        a.send(&frame).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), b.receive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (a, b) = connected_pair().await;
        assert_eq!(a.peer_addr().unwrap(), b.local_addr().unwrap());

        let too_big = Frame::new(2, vec![0u8; MAX_PACKET_SIZE], [0u8; 16]);
        assert!(matches!(
            a.send(&too_big).await,
            Err(TransportError::Oversized(len)) if len == MAX_PACKET_SIZE + FRAME_OVERHEAD
        ));

        let just_over = Frame::new(3, vec![0u8; MAX_UDP_PAYLOAD - FRAME_OVERHEAD + 1], [0u8; 16]);
        assert!(matches!(
            a.send(&just_over).await,
            Err(TransportError::Oversized(_))
        ));
    }

    #[tokio::test]
    async fn test_short_datagram_is_malformed() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();
        a.send_to(b"tiny", b.local_addr().unwrap()).await.unwrap();

        let transport = UdpTransport::from_socket(b);
        let err = tokio::time::timeout(Duration::from_secs(5), transport.receive())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_close_wakes_receiver() {
        let (a, _b) = connected_pair().await;
        let a = Arc::new(a);

        let receiver = tokio::spawn({
            let a = a.clone();
            async move { a.receive().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.close().await;

        let result = tokio::time::timeout(Duration::from_secs(1), receiver)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(matches!(
            a.send(&Frame::new(0, vec![0u8; 20], [0u8; 16])).await,
            Err(TransportError::Closed)
        ));
    }
}
