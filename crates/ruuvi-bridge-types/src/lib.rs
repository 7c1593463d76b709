//! Platform-agnostic types for the Ruuvi smart-home bridge.
//!
//! This crate provides the data model shared by the reconciliation core
//! (ruuvi-bridge-core) and the service binary (ruuvi-bridge-service).
//!
//! # Features
//!
//! - [`SensorRecord`]: one polled reading from the upstream registry
//! - [`DeviceHandle`]: the stable internal identity of a bridged tag
//! - [`PairingInfo`] and [`CommissioningState`] for the commissioning lifecycle
//! - [`quantize_temperature`] for the centi-degree attribute encoding
//!
//! # Example
//!
//! ```
//! use ruuvi_bridge_types::{SensorRecord, handle};
//! use time::OffsetDateTime;
//!
//! let record = SensorRecord::new("AA:BB:CC:DD:EE:FF", OffsetDateTime::now_utc())
//!     .with_temperature(24.5);
//!
//! assert_eq!(record.handle().unwrap(), handle("aa-bb-cc-dd-ee-ff").unwrap());
//! assert_eq!(record.measured_value(), Some(2450));
//! ```

pub mod error;
pub mod handle;
pub mod types;

pub use error::{IdentityError, IdentityResult};
pub use handle::{DeviceHandle, HANDLE_PREFIX, handle};
pub use types::{CommissioningState, PairingInfo, SensorRecord, quantize_temperature};
