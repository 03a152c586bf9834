//! In-memory interface and transport.
//!
//! Used by the loopback self-test and by tests that need a tunnel without a
//! TUN device or real sockets.

use async_trait::async_trait;
use bytes::Bytes;
use seal_core::Frame;
use tokio::sync::{mpsc, watch, Mutex};

use crate::io::{flag_raised, InterfaceError, TransportAdapter, TransportError, VirtualInterface};

/// The pump's side of an in-memory virtual interface.
pub struct ChannelInterface {
    outbound: Mutex<mpsc::Receiver<Vec<u8>>>,
    inbound: mpsc::Sender<Vec<u8>>,
    closed: watch::Sender<bool>,
}

/// The local stack's side: injects packets for the tunnel and collects the
/// ones it delivers.
pub struct InterfaceHost {
    to_tunnel: Option<mpsc::Sender<Vec<u8>>>,
    from_tunnel: mpsc::Receiver<Vec<u8>>,
}

/// Build a connected interface/host pair. `capacity` bounds each direction.
pub fn channel_interface(capacity: usize) -> (ChannelInterface, InterfaceHost) {
    let (to_tunnel, outbound) = mpsc::channel(capacity);
    let (inbound, from_tunnel) = mpsc::channel(capacity);
    let (closed, _) = watch::channel(false);
    (
        ChannelInterface {
            outbound: Mutex::new(outbound),
            inbound,
            closed,
        },
        InterfaceHost {
            to_tunnel: Some(to_tunnel),
            from_tunnel,
        },
    )
}

impl ChannelInterface {
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl VirtualInterface for ChannelInterface {
    async fn read_packet(&self, buf: &mut [u8]) -> Result<usize, InterfaceError> {
        let mut closed = self.closed.subscribe();
        let already_closed = *closed.borrow_and_update();
        if already_closed {
            return Err(InterfaceError::Closed);
        }

        let mut outbound = self.outbound.lock().await;
        let packet = tokio::select! {
            _ = flag_raised(&mut closed) => return Err(InterfaceError::Closed),
            packet = outbound.recv() => packet.ok_or(InterfaceError::Closed)?,
        };

        if packet.len() > buf.len() {
            return Err(InterfaceError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("packet of {} bytes exceeds read buffer", packet.len()),
            )));
        }
        buf[..packet.len()].copy_from_slice(&packet);
        Ok(packet.len())
    }

    async fn write_packet(&self, packet: &[u8]) -> Result<(), InterfaceError> {
        if self.is_closed() {
            return Err(InterfaceError::Closed);
        }
        self.inbound
            .send(packet.to_vec())
            .await
            .map_err(|_| InterfaceError::Closed)
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }
}

impl InterfaceHost {
    /// Hand a packet to the tunnel as if the local stack had routed it there.
    pub async fn inject(&self, packet: Vec<u8>) -> Result<(), InterfaceError> {
        let Some(tx) = &self.to_tunnel else {
            return Err(InterfaceError::Closed);
        };
        tx.send(packet).await.map_err(|_| InterfaceError::Closed)
    }

    /// Next packet the tunnel delivered, or `None` once the interface is gone.
    pub async fn next_packet(&mut self) -> Option<Vec<u8>> {
        self.from_tunnel.recv().await
    }

    /// Stop feeding the tunnel. Its next read sees a closed interface.
    pub fn shutdown(&mut self) {
        self.to_tunnel = None;
    }
}

/// One end of an in-memory datagram link.
///
/// Like UDP, a full link drops datagrams instead of blocking the sender.
pub struct MemoryTransport {
    tx: mpsc::Sender<Bytes>,
    rx: Mutex<mpsc::Receiver<Bytes>>,
    closed: watch::Sender<bool>,
}

impl MemoryTransport {
    pub fn pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: mpsc::Sender<Bytes>, rx: mpsc::Receiver<Bytes>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            tx,
            rx: Mutex::new(rx),
            closed,
        }
    }

    /// Put raw bytes on the link, bypassing frame encoding.
    pub fn send_raw(&self, datagram: Bytes) -> Result<(), TransportError> {
        match self.tx.try_send(datagram) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl TransportAdapter for MemoryTransport {
    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::Closed);
        }
        self.send_raw(frame.encode())
    }

    async fn receive(&self) -> Result<Frame, TransportError> {
        let mut closed = self.closed.subscribe();
        let already_closed = *closed.borrow_and_update();
        if already_closed {
            return Err(TransportError::Closed);
        }

        let mut rx = self.rx.lock().await;
        let datagram = tokio::select! {
            _ = flag_raised(&mut closed) => return Err(TransportError::Closed),
            datagram = rx.recv() => datagram.ok_or(TransportError::Closed)?,
        };
        Ok(Frame::decode(datagram)?)
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }
}
