//! Boundaries of the tunnel: the virtual interface on one side and the
//! datagram transport on the other.
//!
//! Both traits take `&self` so a single adapter can be shared by the egress
//! and ingress loops. `close()` must wake any task blocked in a read.

use async_trait::async_trait;
use seal_core::{Frame, FrameError};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum InterfaceError {
    /// The interface is gone; the tunnel drains and closes.
    #[error("interface closed")]
    Closed,

    #[error("interface I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// Permanent: the transport will never deliver again.
    #[error("transport closed")]
    Closed,

    /// Transient send or receive failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame does not fit in a single datagram; it is dropped.
    #[error("frame of {0} bytes exceeds the datagram limit")]
    Oversized(usize),

    /// A datagram arrived that is not a frame.
    #[error("malformed datagram: {0}")]
    Malformed(#[from] FrameError),
}

/// Packet-level access to a virtual network interface (TUN device or similar).
#[async_trait]
pub trait VirtualInterface: Send + Sync + 'static {
    /// Read one outbound IP packet into `buf`, returning its length.
    async fn read_packet(&self, buf: &mut [u8]) -> Result<usize, InterfaceError>;

    /// Deliver one inbound IP packet to the local stack.
    async fn write_packet(&self, packet: &[u8]) -> Result<(), InterfaceError>;

    async fn close(&self);
}

/// Sends and receives encrypted frames, one datagram per frame.
#[async_trait]
pub trait TransportAdapter: Send + Sync + 'static {
    async fn send(&self, frame: &Frame) -> Result<(), TransportError>;

    async fn receive(&self) -> Result<Frame, TransportError>;

    async fn close(&self);
}

/// Resolves once `flag` is set to true or its sender is gone.
pub(crate) async fn flag_raised(flag: &mut watch::Receiver<bool>) {
    loop {
        let raised = *flag.borrow_and_update();
        if raised || flag.changed().await.is_err() {
            return;
        }
    }
}
