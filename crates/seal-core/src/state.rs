//! Tunnel lifecycle state.
//!
//! ```text
//! Idle -> Establishing -> Active -> Draining -> Closed
//!                           |                    ^
//!                           +----> Error -------+
//! ```
//!
//! `Closed` may move back to `Establishing` when the controller restarts
//! the tunnel. Every state has a stable integer code for bridges that can
//! only carry a number.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TunnelState {
    #[default]
    Idle,
    Establishing,
    Active,
    Draining,
    Closed,
    Error(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid tunnel state transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: TunnelState,
    pub to: TunnelState,
}

impl TunnelState {
    /// Integer code pushed to the controlling application.
    ///
    /// 0 (idle), 2 (active) and 4 (error) match the codes older VPN-service
    /// bridges broadcast. Those bridges report 0 once the VPN has stopped, so
    /// they must map 5 (closed) to 0 ("disconnected").
    pub fn code(&self) -> u8 {
        match self {
            TunnelState::Idle => 0,
            TunnelState::Establishing => 1,
            TunnelState::Active => 2,
            TunnelState::Draining => 3,
            TunnelState::Error(_) => 4,
            TunnelState::Closed => 5,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TunnelState::Active)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TunnelState::Error(_))
    }

    /// States from which `start` is allowed.
    pub fn can_start(&self) -> bool {
        matches!(self, TunnelState::Idle | TunnelState::Closed)
    }

    pub fn can_transition_to(&self, next: &TunnelState) -> bool {
        use TunnelState::*;
        matches!(
            (self, next),
            (Idle, Establishing)
                | (Closed, Establishing)
                | (Establishing, Active)
                | (Establishing, Error(_))
                | (Establishing, Closed)
                | (Active, Draining)
                | (Active, Error(_))
                | (Draining, Closed)
                | (Error(_), Closed)
        )
    }

    /// Validate a transition, returning the next state on success.
    pub fn transition(&self, next: TunnelState) -> Result<TunnelState, InvalidTransition> {
        if self.can_transition_to(&next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self.clone(),
                to: next,
            })
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Idle => write!(f, "idle"),
            TunnelState::Establishing => write!(f, "establishing"),
            TunnelState::Active => write!(f, "active"),
            TunnelState::Draining => write!(f, "draining"),
            TunnelState::Closed => write!(f, "closed"),
            TunnelState::Error(reason) => write!(f, "error({reason})"),
        }
    }
}
