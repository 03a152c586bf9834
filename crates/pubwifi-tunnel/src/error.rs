//! Controller-facing tunnel errors.

use seal_core::TunnelState;
use seal_crypto::KeyDerivationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: TunnelState,
    },

    #[error("no session established")]
    NoSession,

    #[error(transparent)]
    KeyDerivation(#[from] KeyDerivationError),
}
