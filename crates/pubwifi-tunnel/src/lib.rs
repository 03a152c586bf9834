//! PubWIFI tunnel: the packet pump between a virtual interface and an
//! encrypted datagram transport.
//!
//! This crate provides:
//! - [`TunnelPump`], which runs the egress and ingress loops and owns the
//!   tunnel lifecycle
//! - The [`VirtualInterface`] and [`TransportAdapter`] boundaries
//! - A UDP transport and in-memory interface/transport implementations
//! - Packet and failure counters

#![forbid(unsafe_code)]

pub mod error;
pub mod io;
pub mod memory;
pub mod monitor;
pub mod pump;
pub mod stats;
pub mod udp;

pub use error::TunnelError;
pub use io::{InterfaceError, TransportAdapter, TransportError, VirtualInterface};
pub use memory::{channel_interface, ChannelInterface, InterfaceHost, MemoryTransport};
pub use pump::{TunnelPump, EXCESSIVE_FAILURES};
pub use seal_core::TunnelState;
pub use stats::{StatsSnapshot, TunnelStats};
pub use udp::{UdpTransport, MAX_UDP_PAYLOAD};
