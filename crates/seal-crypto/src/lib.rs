//! Cryptographic core of the SEAL tunnel.
//!
//! This crate provides:
//! - Session key derivation from a shared secret (HKDF-SHA256, one key per direction)
//! - A session key store that keeps the previous session alive for a rekey grace period
//! - The packet codec turning plaintext IP packets into authenticated frames and back
//! - Sliding-window replay protection
//! - Shared secret generation and storage
//!
//! # Design
//!
//! Every frame is sealed with ChaCha20-Poly1305. The nonce is derived from the
//! frame's sequence number instead of being transmitted, and the sequence
//! number is authenticated as associated data. Frames can therefore be
//! decrypted in any order, which UDP requires, while the replay window keeps
//! each sequence number usable once.

#![forbid(unsafe_code)]

pub mod codec;
pub mod inbound;
pub mod key_store;
pub mod replay_window;
pub mod secret;
pub mod session;

pub use codec::{decrypt, encrypt, CodecError, ReplayReason};
pub use inbound::InboundKeys;
pub use key_store::{SessionKeyStore, DEFAULT_ROTATION_GRACE};
pub use replay_window::{ReplayWindow, Verdict};
pub use secret::SharedSecret;
pub use session::{KeyDerivationError, Role, Session};
