//! Commissioning status tracking.
//!
//! The publishing service owns commissioning; the bridge only watches it.
//! [`CommissioningTracker`] queries the service once at startup, then follows
//! its lifecycle events and keeps a last-known [`CommissioningSnapshot`] in a
//! `watch` channel. [`PairingStatus`] is the read side of that channel: any
//! number of readers can look at the snapshot at any time without touching
//! the reconciler or waiting on the service.
//!
//! # Lifecycle
//!
//! ```text
//! NotCommissioned --commissioned--> Commissioned --decommissioned--> Decommissioned
//!        ^                                ^                               |
//!        |                                +---------commissioned----------+
//!   (startup query)
//! ```
//!
//! Pairing artifacts are captured once at startup and cleared on
//! commissioning. The tracker never regenerates them; if the service offers
//! fresh artifacts with a decommissioned event they are picked up.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ruuvi_bridge_types::{CommissioningState, PairingInfo};

/// Lifecycle events emitted by the publishing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum CommissioningEvent {
    /// The bridge joined a fabric.
    Commissioned,
    /// The bridge left its last fabric.
    Decommissioned {
        /// Fresh pairing artifacts, if the service generated new ones.
        pairing: Option<PairingInfo>,
    },
}

/// The commissioning side of the publishing service.
pub trait CommissioningSource: Send + Sync {
    /// Whether the node is commissioned right now.
    fn is_commissioned(&self) -> bool;

    /// Current pairing artifacts, if the node has any to offer.
    fn pairing_info(&self) -> Option<PairingInfo>;

    /// Subscribe to lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<CommissioningEvent>;
}

/// Last-known commissioning state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommissioningSnapshot {
    /// Lifecycle state.
    pub state: CommissioningState,
    /// Pairing artifacts; empty unless the bridge is waiting to be paired.
    pub pairing: PairingInfo,
    /// When the state was last set.
    #[serde(with = "time::serde::rfc3339")]
    pub changed_at: OffsetDateTime,
}

impl CommissioningSnapshot {
    /// Snapshot from a startup query.
    pub fn initial(commissioned: bool, pairing: Option<PairingInfo>) -> Self {
        if commissioned {
            Self::new(CommissioningState::Commissioned, PairingInfo::empty())
        } else {
            Self::new(
                CommissioningState::NotCommissioned,
                pairing.unwrap_or_default(),
            )
        }
    }

    fn new(state: CommissioningState, pairing: PairingInfo) -> Self {
        Self {
            state,
            pairing,
            changed_at: OffsetDateTime::now_utc(),
        }
    }

    /// The snapshot that follows `event`.
    pub fn after(&self, event: &CommissioningEvent) -> Self {
        match event {
            CommissioningEvent::Commissioned => {
                Self::new(CommissioningState::Commissioned, PairingInfo::empty())
            }
            CommissioningEvent::Decommissioned { pairing } => Self::new(
                CommissioningState::Decommissioned,
                pairing.clone().unwrap_or_default(),
            ),
        }
    }
}

/// Read-only view of the commissioning snapshot.
///
/// Cheap to clone; every clone sees the same snapshot.
#[derive(Debug, Clone)]
pub struct PairingStatus {
    rx: watch::Receiver<CommissioningSnapshot>,
}

impl PairingStatus {
    /// The last captured pairing artifacts.
    ///
    /// Both strings are empty when the bridge is commissioned or no
    /// artifacts were ever available. Never fails.
    pub fn current_pairing(&self) -> PairingInfo {
        let snapshot = self.rx.borrow();
        if snapshot.state.is_commissioned() {
            PairingInfo::empty()
        } else {
            snapshot.pairing.clone()
        }
    }

    /// The full snapshot.
    pub fn snapshot(&self) -> CommissioningSnapshot {
        self.rx.borrow().clone()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> CommissioningState {
        self.rx.borrow().state
    }

    /// Whether the bridge is commissioned.
    pub fn is_commissioned(&self) -> bool {
        self.state().is_commissioned()
    }

    /// Wait until the snapshot changes.
    ///
    /// Returns `false` once the tracker has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Follows commissioning events and maintains the snapshot.
pub struct CommissioningTracker {
    source: Arc<dyn CommissioningSource>,
    events: broadcast::Receiver<CommissioningEvent>,
    snapshot: watch::Sender<CommissioningSnapshot>,
}

impl CommissioningTracker {
    /// Subscribe to `source` and take the startup snapshot.
    ///
    /// The subscription is made before the state query so that an event
    /// fired in between is not lost.
    pub fn initialize(source: Arc<dyn CommissioningSource>) -> Self {
        let events = source.subscribe();
        let initial = query(source.as_ref());
        log_snapshot(&initial);

        let (snapshot, _) = watch::channel(initial);
        Self {
            source,
            events,
            snapshot,
        }
    }

    /// Read-only view for status consumers.
    pub fn status(&self) -> PairingStatus {
        PairingStatus {
            rx: self.snapshot.subscribe(),
        }
    }

    /// Apply a single event (last writer wins).
    pub fn apply(&self, event: &CommissioningEvent) {
        match event {
            CommissioningEvent::Commissioned => info!("Bridge has been commissioned"),
            CommissioningEvent::Decommissioned { .. } => info!("Bridge has been decommissioned"),
        }
        self.snapshot.send_modify(|current| *current = current.after(event));
    }

    /// Replace the snapshot with a fresh query of the source.
    pub fn resync(&self) {
        let fresh = query(self.source.as_ref());
        debug!("Resynchronized commissioning state: {}", fresh.state);
        self.snapshot.send_replace(fresh);
    }

    /// Consume events until cancelled or the source goes away.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Commissioning tracker cancelled");
                    break;
                }
                result = self.events.recv() => match result {
                    Ok(event) => self.apply(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Commissioning tracker missed {} event(s), resynchronizing", n);
                        self.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Commissioning event stream closed, tracker stopping");
                        break;
                    }
                },
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

fn query(source: &dyn CommissioningSource) -> CommissioningSnapshot {
    let commissioned = source.is_commissioned();
    let pairing = if commissioned {
        None
    } else {
        source.pairing_info()
    };
    CommissioningSnapshot::initial(commissioned, pairing)
}

fn log_snapshot(snapshot: &CommissioningSnapshot) {
    if snapshot.state.is_commissioned() {
        info!("Bridge is already commissioned");
    } else if snapshot.pairing.is_empty() {
        warn!("Bridge is not commissioned and no pairing codes are available");
    } else {
        info!("Bridge is not commissioned");
        info!("Manual pairing code: {}", snapshot.pairing.manual_code);
        info!("QR code content: {}", snapshot.pairing.qr_payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot_not_commissioned() {
        let snapshot = CommissioningSnapshot::initial(false, Some(PairingInfo::new("123", "MT:X")));
        assert_eq!(snapshot.state, CommissioningState::NotCommissioned);
        assert_eq!(snapshot.pairing, PairingInfo::new("123", "MT:X"));
    }

    #[test]
    fn test_initial_snapshot_commissioned_drops_pairing() {
        let snapshot = CommissioningSnapshot::initial(true, Some(PairingInfo::new("123", "MT:X")));
        assert_eq!(snapshot.state, CommissioningState::Commissioned);
        assert!(snapshot.pairing.is_empty());
    }

    #[test]
    fn test_snapshot_transitions() {
        let start = CommissioningSnapshot::initial(false, Some(PairingInfo::new("123", "MT:X")));

        let commissioned = start.after(&CommissioningEvent::Commissioned);
        assert_eq!(commissioned.state, CommissioningState::Commissioned);
        assert!(commissioned.pairing.is_empty());

        let idle = commissioned.after(&CommissioningEvent::Decommissioned { pairing: None });
        assert_eq!(idle.state, CommissioningState::Decommissioned);
        assert!(idle.pairing.is_empty());

        let reoffered = commissioned.after(&CommissioningEvent::Decommissioned {
            pairing: Some(PairingInfo::new("456", "MT:Y")),
        });
        assert_eq!(reoffered.pairing, PairingInfo::new("456", "MT:Y"));

        let again = idle.after(&CommissioningEvent::Commissioned);
        assert_eq!(again.state, CommissioningState::Commissioned);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&CommissioningEvent::Commissioned).unwrap();
        assert_eq!(json, r#"{"type":"commissioned"}"#);

        let json = serde_json::to_string(&CommissioningEvent::Decommissioned { pairing: None }).unwrap();
        assert!(json.contains("decommissioned"));
    }
}
