//! Inbound key selection across rekeys.
//!
//! After a rotation the peer may still have frames in flight under the old
//! keys. [`InboundKeys`] keeps one replay window per session and tries the
//! old session only when the current one rejects a frame and the old one is
//! still inside its grace period.

use std::time::Instant;

use seal_core::Frame;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::codec::{self, CodecError};
use crate::key_store::SessionKeyStore;
use crate::replay_window::ReplayWindow;
use crate::session::Session;

struct TrackedWindow {
    session_id: Uuid,
    window: ReplayWindow,
}

impl TrackedWindow {
    fn for_session(session: &Session, size: u64) -> Self {
        Self {
            session_id: session.id(),
            window: ReplayWindow::with_base(size, session.remote_base_sequence()),
        }
    }
}

/// Replay windows for the current and previous session.
///
/// Owned by the ingress loop; not shared.
pub struct InboundKeys {
    window_size: u64,
    current: Option<TrackedWindow>,
    previous: Option<TrackedWindow>,
}

impl InboundKeys {
    /// # Panics
    /// Panics if `window_size` is not a valid [`ReplayWindow`] size.
    pub fn new(window_size: u64) -> Self {
        assert!(
            ReplayWindow::is_valid_size(window_size),
            "window size must be >= 1024 and a multiple of 64"
        );
        Self {
            window_size,
            current: None,
            previous: None,
        }
    }

    /// Decrypt `frame` with whichever session it belongs to.
    pub fn open(&mut self, store: &SessionKeyStore, frame: &Frame) -> Result<Vec<u8>, CodecError> {
        self.open_at(store, frame, Instant::now())
    }

    pub fn open_at(
        &mut self,
        store: &SessionKeyStore,
        frame: &Frame,
        now: Instant,
    ) -> Result<Vec<u8>, CodecError> {
        let current = store.current().ok_or(CodecError::NoSession)?;
        let previous = store.previous_at(now);
        self.sync(&current, previous.as_deref());

        let Some(tracked) = self.current.as_mut() else {
            return Err(CodecError::NoSession);
        };
        let first_error = match codec::decrypt(&current, &mut tracked.window, frame) {
            Ok(plaintext) => return Ok(plaintext),
            Err(e) => e,
        };

        let (Some(previous), Some(tracked)) = (previous, self.previous.as_mut()) else {
            return Err(first_error);
        };
        // Frames the previous window has already seen fail before any AEAD work
        match codec::decrypt(&previous, &mut tracked.window, frame) {
            Ok(plaintext) => {
                trace!(seq = frame.sequence, "frame opened with previous session keys");
                Ok(plaintext)
            }
            // A replay verdict from either window wins over an auth failure
            Err(second_error) if second_error.is_replay() || !first_error.is_replay() => {
                Err(second_error)
            }
            Err(_) => Err(first_error),
        }
    }

    /// Follow the store's sessions: windows move along on rotation and are
    /// dropped once a session is released.
    fn sync(&mut self, current: &Session, previous: Option<&Session>) {
        let current_matches = self
            .current
            .as_ref()
            .is_some_and(|t| t.session_id == current.id());

        if !current_matches {
            let old = self.current.take();
            self.previous = match (old, previous) {
                (Some(old), Some(prev)) if old.session_id == prev.id() => Some(old),
                (_, Some(prev)) => Some(TrackedWindow::for_session(prev, self.window_size)),
                (_, None) => None,
            };
            debug!(session_id = %current.id(), "tracking inbound frames for new session");
            self.current = Some(TrackedWindow::for_session(current, self.window_size));
            return;
        }

        match previous {
            None => self.previous = None,
            Some(prev) => {
                let stale = self
                    .previous
                    .as_ref()
                    .map_or(true, |t| t.session_id != prev.id());
                if stale {
                    self.previous = Some(TrackedWindow::for_session(prev, self.window_size));
                }
            }
        }
    }
}
