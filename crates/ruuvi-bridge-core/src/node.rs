//! In-process bridge node.
//!
//! [`LocalNode`] plays the part of the smart-home stack's aggregator: it
//! holds the bridged endpoints, the commissioning flag, and the pairing
//! artifacts, and emits lifecycle events when the flag changes. It implements
//! both [`DevicePublisher`] and [`CommissioningSource`].
//!
//! With a storage path configured, the node writes its state to
//! `<storage_path>/bridge-node.json` whenever an endpoint is created or
//! removed or the commissioning flag changes, and reloads it on open, so
//! endpoints and commissioning survive restarts. Measurement updates are
//! kept in memory only and ride along with the next structural write.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

use ruuvi_bridge_types::{DeviceHandle, PairingInfo};

use crate::commissioning::{CommissioningEvent, CommissioningSource};
use crate::error::PublishError;
use crate::publisher::{AttributeDelta, DevicePublisher, EndpointAttributes, PublishedEndpoint};

/// File name of the persisted node state inside the storage directory.
pub const STATE_FILE_NAME: &str = "bridge-node.json";

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 16;

/// Configuration for a [`LocalNode`].
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Vendor identifier of the bridge.
    pub vendor_id: u16,
    /// Product identifier of the bridge.
    pub product_id: u16,
    /// Discriminator advertised while waiting to be commissioned.
    pub discriminator: u16,
    /// Pairing artifacts to offer while not commissioned.
    pub pairing: Option<PairingInfo>,
    /// Directory for the persisted state file; `None` keeps state in memory only.
    pub storage_path: Option<PathBuf>,
}

/// Persisted form of the node.
#[derive(Debug, Default, Serialize, Deserialize)]
struct NodeState {
    commissioned: bool,
    endpoints: Vec<PublishedEndpoint>,
}

/// In-process publishing service.
pub struct LocalNode {
    config: NodeConfig,
    endpoints: RwLock<BTreeMap<DeviceHandle, PublishedEndpoint>>,
    commissioned: AtomicBool,
    events: broadcast::Sender<CommissioningEvent>,
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("vendor_id", &self.config.vendor_id)
            .field("product_id", &self.config.product_id)
            .field("commissioned", &self.commissioned.load(Ordering::Relaxed))
            .field("storage_path", &self.config.storage_path)
            .finish()
    }
}

impl LocalNode {
    /// Open a node, loading persisted state if a state file exists.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Storage`] if the state file exists but cannot
    /// be read or parsed.
    pub fn open(config: NodeConfig) -> Result<Self, PublishError> {
        let state = match &config.storage_path {
            Some(dir) => load_state(&dir.join(STATE_FILE_NAME))?,
            None => NodeState::default(),
        };

        info!(
            "Bridge node ready: vendor 0x{:04X}, product 0x{:04X}, discriminator {}, {} endpoint(s), {}",
            config.vendor_id,
            config.product_id,
            config.discriminator,
            state.endpoints.len(),
            if state.commissioned {
                "commissioned"
            } else {
                "not commissioned"
            }
        );

        let endpoints = state
            .endpoints
            .into_iter()
            .map(|endpoint| (endpoint.handle.clone(), endpoint))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config,
            endpoints: RwLock::new(endpoints),
            commissioned: AtomicBool::new(state.commissioned),
            events,
        })
    }

    /// A node with no persistence.
    pub fn in_memory(config: NodeConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config: NodeConfig {
                storage_path: None,
                ..config
            },
            endpoints: RwLock::new(BTreeMap::new()),
            commissioned: AtomicBool::new(false),
            events,
        }
    }

    /// The node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Path of the state file, if persistence is enabled.
    pub fn state_path(&self) -> Option<PathBuf> {
        self.config
            .storage_path
            .as_ref()
            .map(|dir| dir.join(STATE_FILE_NAME))
    }

    /// Set the commissioning flag.
    ///
    /// Emits [`CommissioningEvent::Commissioned`] or
    /// [`CommissioningEvent::Decommissioned`] only when the flag actually
    /// changes. Decommissioning re-offers the configured pairing artifacts.
    ///
    /// Transitions are serialized on the endpoint lock: the flag is stored
    /// and the event sent only after the new state is on disk, so the order
    /// of events always matches the order of transitions.
    pub async fn set_commissioned(&self, commissioned: bool) -> Result<(), PublishError> {
        let endpoints = self.endpoints.write().await;
        if self.commissioned.load(Ordering::SeqCst) == commissioned {
            return Ok(());
        }

        self.persist(&endpoints, commissioned).await?;
        self.commissioned.store(commissioned, Ordering::SeqCst);

        let event = if commissioned {
            CommissioningEvent::Commissioned
        } else {
            CommissioningEvent::Decommissioned {
                pairing: self.config.pairing.clone(),
            }
        };
        debug!("Emitting commissioning event: {:?}", event);
        // No subscribers is fine
        let _ = self.events.send(event);
        Ok(())
    }

    /// Write a snapshot of the node to the state file.
    ///
    /// Callers hold the endpoint write lock, which keeps writes ordered.
    async fn persist(
        &self,
        endpoints: &BTreeMap<DeviceHandle, PublishedEndpoint>,
        commissioned: bool,
    ) -> Result<(), PublishError> {
        let Some(path) = self.state_path() else {
            return Ok(());
        };

        let state = NodeState {
            commissioned,
            endpoints: endpoints.values().cloned().collect(),
        };
        tokio::task::spawn_blocking(move || save_state(&path, &state))
            .await
            .map_err(|e| PublishError::Storage(format!("state writer: {}", e)))?
    }
}

fn load_state(path: &Path) -> Result<NodeState, PublishError> {
    if !path.exists() {
        debug!("No node state at {}, starting fresh", path.display());
        return Ok(NodeState::default());
    }

    let content = std::fs::read(path)
        .map_err(|e| PublishError::Storage(format!("read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&content)
        .map_err(|e| PublishError::Storage(format!("parse {}: {}", path.display(), e)))
}

fn save_state(path: &Path, state: &NodeState) -> Result<(), PublishError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .map_err(|e| PublishError::Storage(format!("create {}: {}", dir.display(), e)))?;

    let content = serde_json::to_vec_pretty(state)
        .map_err(|e| PublishError::Storage(format!("serialize: {}", e)))?;

    // Write a uniquely named sibling, then rename over the state file
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| PublishError::Storage(format!("create temp in {}: {}", dir.display(), e)))?;
    tmp.write_all(&content)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| PublishError::Storage(format!("write {}: {}", tmp.path().display(), e)))?;
    tmp.persist(path)
        .map_err(|e| PublishError::Storage(format!("rename {}: {}", path.display(), e.error)))?;
    Ok(())
}

#[async_trait]
impl DevicePublisher for LocalNode {
    async fn exists(&self, handle: &DeviceHandle) -> Result<bool, PublishError> {
        Ok(self.endpoints.read().await.contains_key(handle))
    }

    async fn create(
        &self,
        handle: &DeviceHandle,
        attributes: EndpointAttributes,
    ) -> Result<(), PublishError> {
        let mut endpoints = self.endpoints.write().await;
        if endpoints.contains_key(handle) {
            return Err(PublishError::AlreadyExists(handle.clone()));
        }

        let now = OffsetDateTime::now_utc();
        endpoints.insert(
            handle.clone(),
            PublishedEndpoint {
                handle: handle.clone(),
                attributes,
                created_at: now,
                updated_at: now,
            },
        );

        if let Err(e) = self.persist(&endpoints, self.is_commissioned()).await {
            endpoints.remove(handle);
            return Err(e);
        }
        Ok(())
    }

    /// Measurement updates stay in memory; the next structural change
    /// writes them out along with everything else.
    async fn update(
        &self,
        handle: &DeviceHandle,
        delta: AttributeDelta,
    ) -> Result<(), PublishError> {
        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints
            .get_mut(handle)
            .ok_or_else(|| PublishError::NotFound(handle.clone()))?;

        endpoint.attributes.apply(delta);
        endpoint.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn endpoints(&self) -> Result<Vec<PublishedEndpoint>, PublishError> {
        Ok(self.endpoints.read().await.values().cloned().collect())
    }

    async fn remove(&self, handle: &DeviceHandle) -> Result<(), PublishError> {
        let mut endpoints = self.endpoints.write().await;
        let removed = endpoints
            .remove(handle)
            .ok_or_else(|| PublishError::NotFound(handle.clone()))?;

        if let Err(e) = self.persist(&endpoints, self.is_commissioned()).await {
            endpoints.insert(handle.clone(), removed);
            return Err(e);
        }
        Ok(())
    }
}

impl CommissioningSource for LocalNode {
    fn is_commissioned(&self) -> bool {
        self.commissioned.load(Ordering::SeqCst)
    }

    fn pairing_info(&self) -> Option<PairingInfo> {
        self.config.pairing.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<CommissioningEvent> {
        self.events.subscribe()
    }
}
