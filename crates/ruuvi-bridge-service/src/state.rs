//! Application state shared across handlers.
//!
//! Handlers never talk to the reconciler or the commissioning tracker
//! directly. Both publish their state through `watch` channels and the
//! handlers only read the latest value, so a slow or stuck cycle cannot
//! block a status request.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::watch;

use ruuvi_bridge_core::{DevicePublisher, PairingStatus, ReconcilerStatus};

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// Configuration (read-only after startup).
    pub config: Config,
    /// Commissioning status surface.
    pub pairing: PairingStatus,
    /// Latest reconciler status.
    reconciler: watch::Receiver<ReconcilerStatus>,
    /// Publishing service, used to enumerate endpoints.
    pub publisher: Arc<dyn DevicePublisher>,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        config: Config,
        pairing: PairingStatus,
        reconciler: watch::Receiver<ReconcilerStatus>,
        publisher: Arc<dyn DevicePublisher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            pairing,
            reconciler,
            publisher,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// Snapshot of the reconciler status.
    pub fn reconciler_status(&self) -> ReconcilerStatus {
        self.reconciler.borrow().clone()
    }

    /// Seconds since the service started.
    pub fn uptime_secs(&self) -> i64 {
        (OffsetDateTime::now_utc() - self.started_at).whole_seconds()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("bind", &self.config.server.bind)
            .field("commissioning", &self.pairing.state())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
