//! Link supervision and out-of-band reconnection.
//!
//! The supervisor owns the process-wide connectivity state. A link-loss
//! event moves it from [`ConnectivityState::Connected`] to
//! [`ConnectivityState::Disconnected`] and spawns the reconnect procedure on
//! the tokio runtime; nobody awaits it. The procedure cycles through
//! [`ReconnectPhase::AttemptingKnownCredentials`] and
//! [`ReconnectPhase::ServingProvisioningPortal`] until one of them succeeds.
//! The portal wait is bounded by the configured timeout, except for the
//! boot-time connect which waits for the operator indefinitely.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;

// Pause before retrying known credentials after a portal that failed early.
const PORTAL_RETRY_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Connected,
    Disconnected,
}

impl ConnectivityState {
    fn from_u8(v: u8) -> ConnectivityState {
        match v {
            0 => ConnectivityState::Connected,
            _ => ConnectivityState::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPhase {
    AttemptingKnownCredentials,
    ServingProvisioningPortal,
    Connected,
}

impl ReconnectPhase {
    fn from_u8(v: u8) -> ReconnectPhase {
        match v {
            0 => ReconnectPhase::AttemptingKnownCredentials,
            1 => ReconnectPhase::ServingProvisioningPortal,
            _ => ReconnectPhase::Connected,
        }
    }
}

/// Network provisioning collaborator.
pub trait Provisioner: Send + Sync + 'static {
    /// Associates using stored credentials.
    fn connect_known(&self) -> impl Future<Output = Result<(), anyhow::Error>> + Send;

    /// Serves the provisioning portal under `portal_name` and resolves once
    /// the operator has supplied credentials and the link is up. May never
    /// resolve; the caller bounds it.
    fn serve_portal(
        &self,
        portal_name: &str,
    ) -> impl Future<Output = Result<(), anyhow::Error>> + Send;

    fn close_portal(&self) -> impl Future<Output = Result<(), anyhow::Error>> + Send;
}

#[derive(Debug)]
struct Inner<P> {
    provisioner: P,
    portal_name: String,
    portal_timeout: Duration,
    state: AtomicU8,
    phase: AtomicU8,
}

impl<P: Provisioner> Inner<P> {
    fn set_phase(&self, phase: ReconnectPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    async fn reconnect(&self, portal_timeout: Option<Duration>) {
        loop {
            self.set_phase(ReconnectPhase::AttemptingKnownCredentials);
            match self.provisioner.connect_known().await {
                Ok(()) => break,
                Err(e) => log::info!("Known credentials failed: {e:#}"),
            }

            self.set_phase(ReconnectPhase::ServingProvisioningPortal);
            log::info!("Opening provisioning portal \"{}\"", self.portal_name);
            let served = match portal_timeout {
                Some(timeout) => {
                    tokio::time::timeout(timeout, self.provisioner.serve_portal(&self.portal_name))
                        .await
                        .unwrap_or_else(|_| {
                            Err(anyhow::anyhow!("Portal timed out after {timeout:?}"))
                        })
                }
                None => self.provisioner.serve_portal(&self.portal_name).await,
            };

            match served {
                Ok(()) => break,
                Err(e) => {
                    log::info!("Provisioning portal closed: {e:#}");
                    if let Err(e) = self.provisioner.close_portal().await {
                        log::warn!("Failed to close provisioning portal: {e:#}");
                    }
                    tokio::time::sleep(PORTAL_RETRY_PAUSE).await;
                }
            }
        }

        self.set_phase(ReconnectPhase::Connected);
        self.state
            .store(ConnectivityState::Connected as u8, Ordering::SeqCst);
        log::info!("Wifi connected");
    }
}

/// Handle to the process-wide connectivity state. Cheap to clone.
#[derive(Debug)]
pub struct ConnectivitySupervisor<P> {
    inner: Arc<Inner<P>>,
    runtime: Handle,
}

impl<P> Clone for ConnectivitySupervisor<P> {
    fn clone(&self) -> Self {
        ConnectivitySupervisor {
            inner: Arc::clone(&self.inner),
            runtime: self.runtime.clone(),
        }
    }
}

impl<P: Provisioner> ConnectivitySupervisor<P> {
    /// Must be called from within a tokio runtime; reconnects are spawned on it.
    pub fn new(provisioner: P, portal_name: &str, portal_timeout: Duration) -> Self {
        ConnectivitySupervisor {
            inner: Arc::new(Inner {
                provisioner,
                portal_name: portal_name.to_string(),
                portal_timeout,
                state: AtomicU8::new(ConnectivityState::Disconnected as u8),
                phase: AtomicU8::new(ReconnectPhase::AttemptingKnownCredentials as u8),
            }),
            runtime: Handle::current(),
        }
    }

    /// Runs the reconnect procedure to completion. `None` leaves the portal
    /// open until the operator acts, which is what boot uses.
    pub async fn ensure_connected(&self, portal_timeout: Option<Duration>) {
        self.inner.reconnect(portal_timeout).await;
    }

    /// Link-loss callback. Safe to call from any thread at any time; only
    /// the call that observes the Connected -> Disconnected transition
    /// starts a reconnect.
    pub fn on_link_lost(&self) {
        if self
            .inner
            .state
            .compare_exchange(
                ConnectivityState::Connected as u8,
                ConnectivityState::Disconnected as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            log::debug!("Link loss while already disconnected ({:?})", self.phase());
            return;
        }

        log::warn!("Wifi disconnected, reconnecting");
        let inner = Arc::clone(&self.inner);
        self.runtime.spawn(async move {
            inner.reconnect(Some(inner.portal_timeout)).await;
        });
    }

    pub fn current_state(&self) -> ConnectivityState {
        ConnectivityState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn phase(&self) -> ReconnectPhase {
        ReconnectPhase::from_u8(self.inner.phase.load(Ordering::SeqCst))
    }

    #[cfg(test)]
    pub(crate) fn provisioner(&self) -> &P {
        &self.inner.provisioner
    }
}
