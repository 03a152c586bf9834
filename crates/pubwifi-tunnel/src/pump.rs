//! Tunnel pump.
//!
//! Moves packets between a [`VirtualInterface`] and a [`TransportAdapter`]:
//!
//! - **Egress**: interface read -> encrypt -> transport send
//! - **Ingress**: transport receive -> decrypt -> interface write
//!
//! Both loops run as their own tokio task and race every suspension point
//! against a shared shutdown signal. A supervisor task watches for the first
//! loop to exit and drives the state machine from there.

use std::future::Future;
use std::sync::Arc;

use pubwifi_common::TunnelConfig;
use seal_core::TunnelState;
use seal_crypto::{codec, CodecError, InboundKeys, SessionKeyStore};
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::error::TunnelError;
use crate::io::{flag_raised, InterfaceError, TransportAdapter, TransportError, VirtualInterface};
use crate::monitor::FailureMonitor;
use crate::stats::{StatsSnapshot, TunnelStats};

/// Error reason reported when the inbound failure rate trips.
pub const EXCESSIVE_FAILURES: &str = "excessive decrypt failures";

#[derive(Debug)]
enum LoopExit {
    /// Shutdown was signalled.
    Shutdown,
    /// The virtual interface went away.
    InterfaceClosed,
    Failed(String),
}

/// Shared by both loops and the supervisor.
#[derive(Clone)]
struct Link {
    keys: Arc<SessionKeyStore>,
    iface: Arc<dyn VirtualInterface>,
    transport: Arc<dyn TransportAdapter>,
    stats: Arc<TunnelStats>,
    shutdown: Arc<watch::Sender<bool>>,
    state: Arc<watch::Sender<TunnelState>>,
}

struct Running {
    link: Link,
    supervisor: JoinHandle<()>,
    loops: [AbortHandle; 2],
}

/// Owns the tunnel lifecycle.
pub struct TunnelPump {
    config: TunnelConfig,
    state: Arc<watch::Sender<TunnelState>>,
    stats: Arc<TunnelStats>,
    running: Mutex<Option<Running>>,
}

impl TunnelPump {
    pub fn new(config: TunnelConfig) -> pubwifi_common::Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(TunnelState::Idle);
        Ok(Self {
            config,
            state: Arc::new(state),
            stats: Arc::new(TunnelStats::default()),
            running: Mutex::new(None),
        })
    }

    /// An empty key store using this pump's rotation grace period.
    pub fn key_store(&self) -> Arc<SessionKeyStore> {
        Arc::new(SessionKeyStore::with_grace(self.config.rotation_grace()))
    }

    /// Start both loops. `keys` must already hold an established session.
    pub async fn start(
        &self,
        keys: Arc<SessionKeyStore>,
        iface: Arc<dyn VirtualInterface>,
        transport: Arc<dyn TransportAdapter>,
    ) -> Result<(), TunnelError> {
        let mut running = self.running.lock().await;
        let current = self.state();
        if !current.can_start() {
            return Err(TunnelError::InvalidState {
                action: "start",
                state: current,
            });
        }
        // Left behind by a tunnel that closed on its own
        running.take();

        advance(&self.state, TunnelState::Establishing);
        let Some(session) = keys.current() else {
            advance(
                &self.state,
                TunnelState::Error("no session established".to_string()),
            );
            return Err(TunnelError::NoSession);
        };
        debug!(session_id = %session.id(), role = ?session.role(), "starting tunnel loops");

        let (shutdown, _) = watch::channel(false);
        let link = Link {
            keys,
            iface,
            transport,
            stats: self.stats.clone(),
            shutdown: Arc::new(shutdown),
            state: self.state.clone(),
        };

        let inbound = InboundKeys::new(self.config.replay_window_size);
        let monitor = FailureMonitor::new(self.config.failure_window, self.config.failure_threshold);
        let egress = tokio::spawn(egress_loop(link.clone(), self.config.max_packet_size));
        let ingress = tokio::spawn(ingress_loop(link.clone(), inbound, monitor));
        let loops = [egress.abort_handle(), ingress.abort_handle()];

        advance(&self.state, TunnelState::Active);
        let supervisor = tokio::spawn(supervise(egress, ingress, link.clone()));

        *running = Some(Running {
            link,
            supervisor,
            loops,
        });
        Ok(())
    }

    /// Stop the tunnel and release its keys.
    ///
    /// Returns within the configured shutdown timeout even if an adapter is
    /// stuck; loops still running at the deadline are aborted. Calling it on
    /// a tunnel that is not running only clears an error state.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(mut run) = running.take() else {
            advance(&self.state, TunnelState::Closed);
            return;
        };

        advance(&self.state, TunnelState::Draining);
        run.link.shutdown.send_replace(true);

        let deadline = self.config.shutdown_timeout();
        let link = run.link.clone();
        let teardown = async {
            let _ = (&mut run.supervisor).await;
            link.iface.close().await;
            link.transport.close().await;
        };
        if tokio::time::timeout(deadline, teardown).await.is_err() {
            warn!(?deadline, "tunnel did not stop in time, aborting loops");
            for handle in &run.loops {
                handle.abort();
            }
            run.supervisor.abort();
        }

        run.link.keys.clear();
        advance(&self.state, TunnelState::Closed);
    }

    /// Rekey the running tunnel.
    ///
    /// Frames sealed under the old keys keep decrypting for the rotation
    /// grace period; the peer must rotate to the same secret.
    pub async fn rotate(&self, new_secret: &[u8]) -> Result<(), TunnelError> {
        let running = self.running.lock().await;
        let current = self.state();
        match running.as_ref() {
            Some(run) if current.is_active() => {
                run.link.keys.rotate(new_secret)?;
                Ok(())
            }
            _ => Err(TunnelError::InvalidState {
                action: "rotate",
                state: current,
            }),
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().is_active()
    }

    /// Latest-value view of the tunnel state.
    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for TunnelPump {
    /// A pump dropped without `stop()` still takes its loops down and
    /// releases the session keys.
    fn drop(&mut self) {
        let Some(run) = self.running.get_mut().take() else {
            return;
        };
        run.link.shutdown.send_replace(true);
        for handle in &run.loops {
            handle.abort();
        }
        run.supervisor.abort();
        run.link.keys.clear();
        debug!("tunnel pump dropped, loops aborted");
    }
}

/// Apply `next` if the state machine allows it from the current state.
fn advance(state: &watch::Sender<TunnelState>, next: TunnelState) -> bool {
    state.send_if_modified(|current| {
        if !current.can_transition_to(&next) {
            return false;
        }
        info!(from = %current, to = %next, "tunnel state changed");
        *current = next;
        true
    })
}

async fn until_shutdown<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = flag_raised(shutdown) => None,
        out = fut => Some(out),
    }
}

async fn supervise(mut egress: JoinHandle<LoopExit>, mut ingress: JoinHandle<LoopExit>, link: Link) {
    let (first, egress_done) = tokio::select! {
        exit = &mut egress => (exit, true),
        exit = &mut ingress => (exit, false),
    };
    let exit = first.unwrap_or_else(|e| LoopExit::Failed(format!("tunnel loop died: {e}")));
    let other = if egress_done { ingress } else { egress };
    debug!(?exit, egress_done, "tunnel loop exited");

    match &exit {
        LoopExit::Shutdown => {}
        LoopExit::InterfaceClosed => {
            advance(&link.state, TunnelState::Draining);
        }
        LoopExit::Failed(reason) => {
            if advance(&link.state, TunnelState::Error(reason.clone())) {
                error!(%reason, "tunnel failed");
            }
        }
    }

    link.shutdown.send_replace(true);
    let _ = other.await;

    // stop() owns teardown when it asked for the shutdown
    if matches!(exit, LoopExit::Shutdown) {
        return;
    }
    link.iface.close().await;
    link.transport.close().await;
    link.keys.clear();
    if matches!(exit, LoopExit::InterfaceClosed) {
        advance(&link.state, TunnelState::Closed);
    }
}

async fn egress_loop(link: Link, max_packet_size: usize) -> LoopExit {
    let mut shutdown = link.shutdown.subscribe();
    let mut buf = vec![0u8; max_packet_size];

    loop {
        let len = match until_shutdown(&mut shutdown, link.iface.read_packet(&mut buf)).await {
            None => return LoopExit::Shutdown,
            Some(Ok(len)) => len,
            Some(Err(InterfaceError::Closed)) => return LoopExit::InterfaceClosed,
            Some(Err(InterfaceError::Io(e))) => {
                return LoopExit::Failed(format!("interface read failed: {e}"))
            }
        };

        let Some(session) = link.keys.current() else {
            return LoopExit::Failed("session keys released".to_string());
        };
        let frame = match codec::encrypt(&session, &buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, len, "dropping outbound packet");
                link.stats.record_dropped_outbound();
                continue;
            }
        };

        match until_shutdown(&mut shutdown, link.transport.send(&frame)).await {
            None => return LoopExit::Shutdown,
            Some(Ok(())) => {
                trace!(seq = frame.sequence, len, "frame sent");
                link.stats.record_sent(len);
            }
            Some(Err(TransportError::Closed)) => {
                return LoopExit::Failed("transport closed".to_string())
            }
            Some(Err(e)) => {
                warn!(error = %e, seq = frame.sequence, "frame send failed");
                link.stats.record_send_error();
            }
        }
    }
}

async fn ingress_loop(
    link: Link,
    mut inbound: InboundKeys,
    mut monitor: FailureMonitor,
) -> LoopExit {
    let mut shutdown = link.shutdown.subscribe();

    loop {
        let received = match until_shutdown(&mut shutdown, link.transport.receive()).await {
            None => return LoopExit::Shutdown,
            Some(received) => received,
        };

        let frame = match received {
            Ok(frame) => frame,
            Err(TransportError::Closed) => {
                return LoopExit::Failed("transport closed".to_string())
            }
            Err(TransportError::Malformed(e)) => {
                debug!(error = %e, "dropping malformed datagram");
                link.stats.record_malformed();
                if record_failure(&link, &mut monitor) {
                    return LoopExit::Failed(EXCESSIVE_FAILURES.to_string());
                }
                continue;
            }
            Err(e) => {
                warn!(error = %e, "frame receive failed");
                link.stats.record_receive_error();
                continue;
            }
        };

        let plaintext = match inbound.open(&link.keys, &frame) {
            Ok(plaintext) => plaintext,
            Err(CodecError::NoSession) => {
                return LoopExit::Failed("session keys released".to_string())
            }
            Err(e) => {
                debug!(error = %e, "dropping inbound frame");
                if e.is_replay() {
                    link.stats.record_replay();
                } else {
                    link.stats.record_auth_failure();
                }
                if record_failure(&link, &mut monitor) {
                    return LoopExit::Failed(EXCESSIVE_FAILURES.to_string());
                }
                continue;
            }
        };
        monitor.record_success();
        link.stats.set_failure_ratio(monitor.ratio());

        match until_shutdown(&mut shutdown, link.iface.write_packet(&plaintext)).await {
            None => return LoopExit::Shutdown,
            Some(Ok(())) => {
                trace!(seq = frame.sequence, len = plaintext.len(), "packet delivered");
                link.stats.record_received(plaintext.len());
            }
            Some(Err(InterfaceError::Closed)) => return LoopExit::InterfaceClosed,
            Some(Err(InterfaceError::Io(e))) => {
                return LoopExit::Failed(format!("interface write failed: {e}"))
            }
        }
    }
}

fn record_failure(link: &Link, monitor: &mut FailureMonitor) -> bool {
    let tripped = monitor.record_failure();
    link.stats.set_failure_ratio(monitor.ratio());
    tripped
}
