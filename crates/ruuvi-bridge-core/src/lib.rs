//! Reconciliation engine bridging RuuviTag sensors into a smart-home mesh.
//!
//! This crate keeps a tree of published device endpoints in step with the
//! tags an upstream gateway currently reports, and tracks whether the bridge
//! has been commissioned into a fabric.
//!
//! # Features
//!
//! - **Registry polling**: bounded HTTP polls of the gateway's tag list
//! - **Reconciliation**: create new endpoints, push fresh readings, never remove
//! - **Publisher abstraction**: drive any smart-home stack through [`DevicePublisher`]
//! - **Commissioning tracking**: follow lifecycle events, expose pairing codes
//! - **Local node**: an in-process, optionally persisted publishing service
//! - **Mocks**: scripted registry and recording publisher for tests
//!
//! # Components
//!
//! | Component | Type |
//! |-----------|------|
//! | Registry Poller | [`SensorRegistry`], [`HttpRegistry`] |
//! | Reconciler | [`Reconciler`] |
//! | Device Publisher Adapter | [`DevicePublisher`], [`LocalNode`] |
//! | Commissioning Status Tracker | [`CommissioningTracker`] |
//! | Status Surface | [`PairingStatus`] |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ruuvi_bridge_core::{
//!     CommissioningTracker, HttpRegistry, LocalNode, NodeConfig, Reconciler,
//!     ReconcilerOptions, DEFAULT_POLL_TIMEOUT, DEFAULT_REGISTRY_URL,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = Arc::new(LocalNode::in_memory(NodeConfig::default()));
//!     let registry = Arc::new(HttpRegistry::new(DEFAULT_REGISTRY_URL, DEFAULT_POLL_TIMEOUT)?);
//!     let cancel = CancellationToken::new();
//!
//!     let tracker = CommissioningTracker::initialize(node.clone());
//!     let pairing = tracker.status();
//!     tracker.spawn(cancel.clone());
//!
//!     Reconciler::new(registry, node, ReconcilerOptions::default()).spawn(cancel.clone());
//!
//!     println!("Pairing code: {}", pairing.current_pairing().manual_code);
//!     Ok(())
//! }
//! ```

pub mod commissioning;
pub mod error;
pub mod mock;
pub mod node;
pub mod publisher;
pub mod reconciler;
pub mod registry;

pub use commissioning::{
    CommissioningEvent, CommissioningSnapshot, CommissioningSource, CommissioningTracker,
    PairingStatus,
};
pub use error::{Error, PollError, PublishError, Result};
pub use mock::{MockPublisher, MockRegistry, PublisherCall};
pub use node::{LocalNode, NodeConfig, STATE_FILE_NAME};
pub use publisher::{
    AttributeDelta, DevicePublisher, EndpointAttributes, PRODUCT_NAME, PublishedEndpoint,
};
pub use reconciler::{
    CycleReport, DEFAULT_POLL_INTERVAL, DEFAULT_VENDOR_ID, Reconciler, ReconcilerOptions,
    ReconcilerStatus, RecordOutcome, TagFilter,
};
pub use registry::{
    DEFAULT_POLL_TIMEOUT, DEFAULT_REGISTRY_URL, DroppedRecord, HttpRegistry, PollBatch,
    SensorRegistry, parse_records,
};

// Re-export the data model
pub use ruuvi_bridge_types::{
    CommissioningState, DeviceHandle, IdentityError, PairingInfo, SensorRecord, handle,
};
