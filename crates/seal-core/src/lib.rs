//! Core SEAL tunnel types, framing, and constants.
//!
//! This crate provides:
//! - The encrypted frame wire format exchanged between tunnel peers
//! - Size limits for plaintext IP packets and frames
//! - The tunnel lifecycle state observed by the controlling application
//!
//! # Wire Format
//!
//! ```text
//! [8 bytes: sequence number, big-endian] [N bytes: ciphertext] [16 bytes: auth tag]
//! ```
//!
//! The nonce is never transmitted. Both sides derive it from the sequence
//! number (see [`Frame::nonce`]).

#![forbid(unsafe_code)]

pub mod state;

pub use state::{InvalidTransition, TunnelState};

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const SEAL_VERSION: u16 = 1;

/// Length of the big-endian sequence number prefix.
pub const SEQUENCE_LEN: usize = 8;

/// Length of the AEAD nonce derived from the sequence number.
pub const NONCE_LEN: usize = 12;

/// Length of the Poly1305 authentication tag.
pub const TAG_LEN: usize = 16;

/// Smallest frame that can be on the wire (empty ciphertext).
pub const FRAME_OVERHEAD: usize = SEQUENCE_LEN + TAG_LEN;

/// Smallest valid IP packet (IPv4 header without options).
pub const MIN_PACKET_SIZE: usize = 20;

/// Largest valid IP packet.
pub const MAX_PACKET_SIZE: usize = 65535;

/// Largest frame we will ever accept from the network.
pub const MAX_FRAME_SIZE: usize = MAX_PACKET_SIZE + FRAME_OVERHEAD;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("frame too long: {0} bytes")]
    TooLong(usize),
}

/// One encrypted packet as carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub ciphertext: Bytes,
    pub tag: [u8; TAG_LEN],
}

impl Frame {
    pub fn new(sequence: u64, ciphertext: impl Into<Bytes>, tag: [u8; TAG_LEN]) -> Self {
        Self {
            sequence,
            ciphertext: ciphertext.into(),
            tag,
        }
    }

    /// Nonce for this frame: four zero bytes followed by the big-endian sequence number.
    pub fn nonce(&self) -> [u8; NONCE_LEN] {
        nonce_for_sequence(self.sequence)
    }

    /// Total encoded length on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_OVERHEAD + self.ciphertext.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u64(self.sequence);
        buf.put_slice(&self.ciphertext);
        buf.put_slice(&self.tag);
        buf.freeze()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(FrameError::TooShort(bytes.len()));
        }
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLong(bytes.len()));
        }

        let sequence = bytes.get_u64();
        let tag_bytes = bytes.split_off(bytes.len() - TAG_LEN);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&tag_bytes);

        Ok(Self {
            sequence,
            ciphertext: bytes,
            tag,
        })
    }
}

/// Derive the 96-bit nonce used for a given sequence number.
pub fn nonce_for_sequence(sequence: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[NONCE_LEN - SEQUENCE_LEN..].copy_from_slice(&sequence.to_be_bytes());
    nonce
}

/// Returns true if `len` is a legal plaintext IP packet length.
pub fn is_valid_packet_len(len: usize) -> bool {
    (MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&len)
}
