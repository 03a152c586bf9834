//! Packet codec: plaintext IP packet <-> encrypted [`Frame`].
//!
//! ChaCha20-Poly1305 with an explicit nonce derived from the frame sequence
//! number, so frames can be decrypted in any order. The big-endian sequence
//! number is also fed in as associated data, which binds it to the
//! ciphertext: rewriting the sequence number on the wire breaks the tag.
//!
//! Both functions are pure computation and never block.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use seal_core::{is_valid_packet_len, Frame, TAG_LEN};
use thiserror::Error;

use crate::replay_window::{ReplayWindow, Verdict};
use crate::session::Session;

/// Why a frame was refused by the replay window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayReason {
    Stale,
    Duplicate,
}

/// Per-packet codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("replay rejected: sequence {seq} ({reason:?})")]
    ReplayRejected { seq: u64, reason: ReplayReason },

    #[error("authentication failed: sequence {0}")]
    AuthenticationFailed(u64),

    #[error("invalid packet length: {0} bytes")]
    InvalidPacketLength(usize),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("no active session")]
    NoSession,
}

impl CodecError {
    pub fn is_replay(&self) -> bool {
        matches!(self, CodecError::ReplayRejected { .. })
    }
}

/// Encrypt one plaintext IP packet under the session's outbound key.
pub fn encrypt(session: &Session, plaintext: &[u8]) -> Result<Frame, CodecError> {
    if !is_valid_packet_len(plaintext.len()) {
        return Err(CodecError::InvalidPacketLength(plaintext.len()));
    }

    let seq = session.next_sequence();
    let frame_nonce = seal_core::nonce_for_sequence(seq);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(session.encryption_key()));

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(
            Nonce::from_slice(&frame_nonce),
            &seq.to_be_bytes(),
            &mut buffer,
        )
        .map_err(|e| CodecError::Encryption(e.to_string()))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);

    Ok(Frame::new(seq, buffer, tag_bytes))
}

/// Decrypt one frame under the session's inbound key.
///
/// The replay window is consulted before any cryptographic work and is only
/// updated once the frame authenticates, so forged frames cannot move it.
pub fn decrypt(
    session: &Session,
    window: &mut ReplayWindow,
    frame: &Frame,
) -> Result<Vec<u8>, CodecError> {
    let seq = frame.sequence;
    match window.check(seq) {
        Verdict::Fresh => {}
        Verdict::Stale => {
            return Err(CodecError::ReplayRejected {
                seq,
                reason: ReplayReason::Stale,
            })
        }
        Verdict::Duplicate => {
            return Err(CodecError::ReplayRejected {
                seq,
                reason: ReplayReason::Duplicate,
            })
        }
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(session.decryption_key()));
    let mut buffer = frame.ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&frame.nonce()),
            &seq.to_be_bytes(),
            &mut buffer,
            Tag::from_slice(&frame.tag),
        )
        .map_err(|_| CodecError::AuthenticationFailed(seq))?;

    window.accept(seq);
    Ok(buffer)
}
