//! Session key store with rekey grace period.
//!
//! The store owns the active [`Session`] and, for a short while after a
//! rotation, the session it replaced. Frames that were in flight under the
//! old keys stay decryptable until the grace period ends; after that the old
//! session is released and its keys are zeroed once the last reader lets go.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::session::{KeyDerivationError, Role, Session};

/// How long frames from a rotated-out session are still accepted.
pub const DEFAULT_ROTATION_GRACE: Duration = Duration::from_secs(5);

struct Retired {
    session: Arc<Session>,
    retired_at: Instant,
}

#[derive(Default)]
struct Slots {
    current: Option<Arc<Session>>,
    previous: Option<Retired>,
}

/// Holds the active session and the one it replaced.
pub struct SessionKeyStore {
    slots: RwLock<Slots>,
    grace: Duration,
}

impl Default for SessionKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionKeyStore {
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_ROTATION_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Derive and install the first session, dropping anything held before.
    pub fn establish(
        &self,
        shared_secret: &[u8],
        role: Role,
    ) -> Result<Arc<Session>, KeyDerivationError> {
        let session = Arc::new(Session::establish(shared_secret, role)?);

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.current = Some(session.clone());
        slots.previous = None;

        info!(session_id = %session.id(), ?role, "session established");
        Ok(session)
    }

    /// Replace the active session with one derived from `new_secret`.
    ///
    /// The replaced session stays available through
    /// [`previous_within_grace`](Self::previous_within_grace) for the grace period.
    pub fn rotate(&self, new_secret: &[u8]) -> Result<Arc<Session>, KeyDerivationError> {
        self.rotate_at(new_secret, Instant::now())
    }

    pub fn rotate_at(
        &self,
        new_secret: &[u8],
        now: Instant,
    ) -> Result<Arc<Session>, KeyDerivationError> {
        let role = self
            .current()
            .map(|s| s.role())
            .ok_or(KeyDerivationError::NotEstablished)?;
        let session = Arc::new(Session::establish(new_secret, role)?);

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let Some(old) = slots.current.replace(session.clone()) else {
            // Cleared while we were deriving
            slots.current = None;
            return Err(KeyDerivationError::NotEstablished);
        };
        info!(
            old_session = %old.id(),
            new_session = %session.id(),
            "session keys rotated"
        );
        slots.previous = Some(Retired {
            session: old,
            retired_at: now,
        });

        Ok(session)
    }

    /// The session used for all outbound frames.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// The rotated-out session, if its grace period has not ended.
    pub fn previous_within_grace(&self) -> Option<Arc<Session>> {
        self.previous_at(Instant::now())
    }

    pub fn previous_at(&self, now: Instant) -> Option<Arc<Session>> {
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            match &slots.previous {
                None => return None,
                Some(retired) if now < retired.retired_at + self.grace => {
                    return Some(retired.session.clone())
                }
                Some(_) => {}
            }
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(retired) = &slots.previous {
            if now >= retired.retired_at + self.grace {
                debug!(session_id = %retired.session.id(), "grace period over, releasing old session");
                slots.previous = None;
            }
        }
        None
    }

    pub fn is_established(&self) -> bool {
        self.current().is_some()
    }

    /// Release every session. Keys are zeroed once no loop holds them.
    pub fn clear(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.current.is_some() || slots.previous.is_some() {
            debug!("releasing session keys");
        }
        slots.current = None;
        slots.previous = None;
    }
}
