//! Pre-shared secret material.
//!
//! A [`SharedSecret`] is the input keying material both tunnel peers feed
//! into [`Session::establish`](crate::session::Session::establish). On disk
//! it is stored as a single line of hex.
//!
//! ```
//! use seal_crypto::secret::SharedSecret;
//!
//! let secret = SharedSecret::generate();
//! let encoded = secret.to_hex();
//! assert_eq!(encoded.len(), 64);
//!
//! let parsed = SharedSecret::from_hex(&encoded).unwrap();
//! assert_eq!(parsed.as_bytes(), secret.as_bytes());
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::session::MIN_SECRET_LEN;

/// Length of a freshly generated secret.
pub const GENERATED_SECRET_LEN: usize = 32;

/// Secret bytes, zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: Vec<u8>,
}

impl SharedSecret {
    /// Generate a new random secret using the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; GENERATED_SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_SECRET_LEN {
            anyhow::bail!(
                "shared secret too short: expected at least {} bytes, got {}",
                MIN_SECRET_LEN,
                bytes.len()
            );
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut bytes = hex::decode(encoded.trim()).context("invalid hex encoding")?;
        let secret = Self::from_bytes(&bytes);
        bytes.zeroize();
        secret
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Save the secret to `path`.
    ///
    /// The file is restricted to the owner (0600 on Unix).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut encoded = self.to_hex();
        encoded.push('\n');

        let written = fs::write(path, encoded.as_bytes())
            .with_context(|| format!("failed to write secret to {}", path.display()));
        encoded.zeroize();
        written?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read secret from {}", path.display()))?;
        let secret = Self::from_hex(&contents);
        contents.zeroize();
        secret
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED; {}])", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("seal-secret-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_generate_is_random() {
        let a = SharedSecret::generate();
        let b = SharedSecret::generate();
        assert_eq!(a.as_bytes().len(), GENERATED_SECRET_LEN);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(SharedSecret::from_bytes(&[1u8; 8]).is_err());
        assert!(SharedSecret::from_hex("abcd").is_err());
        assert!(SharedSecret::from_hex("not hex at all").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip");
        let secret = SharedSecret::generate();
        secret.save(&path).unwrap();

        let loaded = SharedSecret::load(&path).unwrap();
        assert_eq!(loaded.as_bytes(), secret.as_bytes());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let err = SharedSecret::load(temp_path("missing")).unwrap_err();
        assert!(err.to_string().contains("failed to read secret"));
    }

    #[test]
    fn test_debug_redacted() {
        let secret = SharedSecret::from_bytes(&[0xAB; 32]).unwrap();
        let rendered = format!("{:?}", secret);
        assert!(!rendered.to_lowercase().contains("abab"));
        assert!(rendered.contains("REDACTED"));
    }
}
