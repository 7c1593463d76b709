//! Device publishing service abstraction.
//!
//! This module provides the [`DevicePublisher`] trait the reconciler drives.
//! The smart-home stack behind it is opaque: it might be an in-process node
//! ([`LocalNode`](crate::LocalNode)), a mock ([`MockPublisher`](crate::MockPublisher)),
//! or a sidecar reached over IPC.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use ruuvi_bridge_types::DeviceHandle;

use crate::error::PublishError;

/// Product name shown for every bridged tag.
pub const PRODUCT_NAME: &str = "RuuviTag";

/// Attributes of a bridged temperature sensor endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAttributes {
    /// Display label, e.g. "RuuviTag AA:BB:CC:DD:EE:FF".
    pub node_label: String,
    /// Serial number (address hex digits, no separators).
    pub serial_number: String,
    /// Product name.
    pub product_name: String,
    /// Vendor identifier of the bridge.
    pub vendor_id: u16,
    /// Whether the bridged device is reachable.
    pub reachable: bool,
    /// Measured temperature in centi-degrees, if known.
    pub measured_value: Option<i16>,
}

impl EndpointAttributes {
    /// Initial attributes for a newly bridged tag.
    pub fn bridged_sensor(handle: &DeviceHandle, vendor_id: u16, measured_value: i16) -> Self {
        Self {
            node_label: format!("{} {}", PRODUCT_NAME, handle.canonical_address()),
            serial_number: handle.serial(),
            product_name: PRODUCT_NAME.to_string(),
            vendor_id,
            reachable: true,
            measured_value: Some(measured_value),
        }
    }

    /// Apply an attribute delta.
    pub fn apply(&mut self, delta: AttributeDelta) {
        self.measured_value = Some(delta.measured_value);
    }
}

/// Change to an existing endpoint's mutable attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDelta {
    /// New measured temperature in centi-degrees.
    pub measured_value: i16,
}

impl AttributeDelta {
    /// A delta carrying a new measured value.
    pub fn measured_value(measured_value: i16) -> Self {
        Self { measured_value }
    }
}

/// An endpoint as seen by the publishing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedEndpoint {
    /// Handle the endpoint was created under.
    pub handle: DeviceHandle,
    /// Current attribute values.
    pub attributes: EndpointAttributes,
    /// When the endpoint was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the attributes last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Interface to the external device-publishing service.
///
/// Every method may fail with [`PublishError`]; callers must treat failures
/// as transient.
///
/// # Example
///
/// ```ignore
/// use ruuvi_bridge_core::{AttributeDelta, DevicePublisher};
///
/// async fn bump<P: DevicePublisher>(publisher: &P, handle: &DeviceHandle) -> Result<(), PublishError> {
///     if publisher.exists(handle).await? {
///         publisher.update(handle, AttributeDelta::measured_value(2100)).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DevicePublisher: Send + Sync {
    /// Check whether an endpoint exists under `handle`.
    async fn exists(&self, handle: &DeviceHandle) -> Result<bool, PublishError>;

    /// Create a new endpoint.
    ///
    /// Fails with [`PublishError::AlreadyExists`] if one exists already.
    async fn create(
        &self,
        handle: &DeviceHandle,
        attributes: EndpointAttributes,
    ) -> Result<(), PublishError>;

    /// Update the mutable attributes of an existing endpoint.
    ///
    /// Fails with [`PublishError::NotFound`] if no endpoint exists.
    async fn update(&self, handle: &DeviceHandle, delta: AttributeDelta)
    -> Result<(), PublishError>;

    /// Enumerate existing endpoints.
    async fn endpoints(&self) -> Result<Vec<PublishedEndpoint>, PublishError>;

    /// Remove an endpoint.
    ///
    /// The reconciler never calls this. The default implementation returns
    /// [`PublishError::Unsupported`].
    async fn remove(&self, _handle: &DeviceHandle) -> Result<(), PublishError> {
        Err(PublishError::Unsupported("remove"))
    }
}
