//! Tunnel session keys.
//!
//! A [`Session`] holds the two directional ChaCha20-Poly1305 keys derived
//! from a shared secret, plus the outbound sequence counter. Apart from that
//! counter a session never changes after it is established; rekeying builds
//! a new one.
//!
//! # Key Derivation
//!
//! ```text
//! prk     = HKDF-Extract(salt = "seal-v1 session salt", ikm = shared secret)
//! key_i2r = HKDF-Expand(prk, "seal-v1 initiator-to-responder", 32)
//! key_r2i = HKDF-Expand(prk, "seal-v1 responder-to-initiator", 32)
//! ```
//!
//! The initiator encrypts with `key_i2r` and decrypts with `key_r2i`, the
//! responder does the opposite, so no key is ever used in both directions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Shortest shared secret accepted for key derivation.
pub const MIN_SECRET_LEN: usize = 16;

/// Length of each derived key.
pub const KEY_LEN: usize = 32;

const HKDF_SALT: &[u8] = b"seal-v1 session salt";
const LABEL_I2R: &[u8] = b"seal-v1 initiator-to-responder";
const LABEL_R2I: &[u8] = b"seal-v1 responder-to-initiator";

/// Session key derivation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyDerivationError {
    #[error("shared secret too short: {0} bytes (minimum {MIN_SECRET_LEN})")]
    SecretTooShort(usize),

    #[error("key expansion failed")]
    Expand,

    #[error("no session established")]
    NotEstablished,
}

/// Which end of the tunnel we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

/// Keys and counters for one tunnel session.
///
/// Keys are zeroed when the session is dropped.
pub struct Session {
    id: Uuid,
    role: Role,
    encryption_key: Zeroizing<[u8; KEY_LEN]>,
    decryption_key: Zeroizing<[u8; KEY_LEN]>,
    /// Next outbound sequence number
    next_sequence: AtomicU64,
    /// First inbound sequence number the replay window tracks
    remote_base_sequence: u64,
}

impl Session {
    /// Derive a session from a pre-shared or negotiated secret.
    pub fn establish(shared_secret: &[u8], role: Role) -> Result<Self, KeyDerivationError> {
        if shared_secret.len() < MIN_SECRET_LEN {
            return Err(KeyDerivationError::SecretTooShort(shared_secret.len()));
        }

        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared_secret);
        let mut key_i2r = Zeroizing::new([0u8; KEY_LEN]);
        let mut key_r2i = Zeroizing::new([0u8; KEY_LEN]);
        hk.expand(LABEL_I2R, &mut key_i2r[..])
            .map_err(|_| KeyDerivationError::Expand)?;
        hk.expand(LABEL_R2I, &mut key_r2i[..])
            .map_err(|_| KeyDerivationError::Expand)?;

        let (encryption_key, decryption_key) = match role {
            Role::Initiator => (key_i2r, key_r2i),
            Role::Responder => (key_r2i, key_i2r),
        };

        Ok(Self {
            id: Uuid::new_v4(),
            role,
            encryption_key,
            decryption_key,
            next_sequence: AtomicU64::new(0),
            remote_base_sequence: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn remote_base_sequence(&self) -> u64 {
        self.remote_base_sequence
    }

    /// Allocate the next outbound sequence number.
    ///
    /// Never hands out the same number twice. Wrapping after 2^64 frames is
    /// outside the session lifetime.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Peek at the next outbound sequence number without consuming it.
    pub fn peek_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }

    pub(crate) fn encryption_key(&self) -> &[u8; KEY_LEN] {
        &self.encryption_key
    }

    pub(crate) fn decryption_key(&self) -> &[u8; KEY_LEN] {
        &self.decryption_key
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("next_sequence", &self.peek_sequence())
            .finish_non_exhaustive()
    }
}
