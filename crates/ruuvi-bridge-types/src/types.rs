//! Core types for bridged sensor data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::IdentityResult;
use crate::handle::DeviceHandle;

/// One live sensor record as reported by the upstream registry.
///
/// Records are ephemeral: each poll produces a fresh set. Two records with
/// the same `hardware_address` describe the same tag at different points in
/// time.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorRecord {
    /// Hardware (MAC) address as reported upstream.
    pub hardware_address: String,
    /// Temperature in °C.
    pub temperature: Option<f64>,
    /// Relative humidity in %.
    pub humidity: Option<f64>,
    /// Pressure in Pa.
    pub pressure: Option<f64>,
    /// When the gateway last heard from the tag.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub observed_at: OffsetDateTime,
}

impl SensorRecord {
    /// Create a record with no measurements.
    pub fn new(hardware_address: impl Into<String>, observed_at: OffsetDateTime) -> Self {
        Self {
            hardware_address: hardware_address.into(),
            temperature: None,
            humidity: None,
            pressure: None,
            observed_at,
        }
    }

    /// Set the temperature reading.
    #[must_use]
    pub fn with_temperature(mut self, celsius: f64) -> Self {
        self.temperature = Some(celsius);
        self
    }

    /// Set the humidity reading.
    #[must_use]
    pub fn with_humidity(mut self, percent: f64) -> Self {
        self.humidity = Some(percent);
        self
    }

    /// Set the pressure reading.
    #[must_use]
    pub fn with_pressure(mut self, pascal: f64) -> Self {
        self.pressure = Some(pascal);
        self
    }

    /// Derive the device handle for this record's address.
    pub fn handle(&self) -> IdentityResult<DeviceHandle> {
        DeviceHandle::from_address(&self.hardware_address)
    }

    /// The temperature quantized to centi-degrees, if present.
    pub fn measured_value(&self) -> Option<i16> {
        self.temperature.map(quantize_temperature)
    }
}

/// Quantize a temperature in °C to the integer centi-degree representation
/// used by the temperature measurement attribute.
///
/// The value is multiplied by 100 and rounded to the nearest integer, then
/// saturated to the `i16` range. `NaN` maps to 0.
///
/// ```
/// use ruuvi_bridge_types::quantize_temperature;
///
/// assert_eq!(quantize_temperature(24.5), 2450);
/// assert_eq!(quantize_temperature(-3.456), -346);
/// ```
#[must_use]
pub fn quantize_temperature(celsius: f64) -> i16 {
    // `as` saturates for out-of-range floats and maps NaN to 0
    (celsius * 100.0).round() as i16
}

/// Pairing artifacts offered while the bridge is not commissioned.
///
/// Both values are opaque strings produced by the publishing service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PairingInfo {
    /// Manual pairing code.
    pub manual_code: String,
    /// QR code payload.
    pub qr_payload: String,
}

impl PairingInfo {
    /// Create pairing info from a manual code and QR payload.
    pub fn new(manual_code: impl Into<String>, qr_payload: impl Into<String>) -> Self {
        Self {
            manual_code: manual_code.into(),
            qr_payload: qr_payload.into(),
        }
    }

    /// Pairing info with both artifacts empty.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether neither artifact is available.
    pub fn is_empty(&self) -> bool {
        self.manual_code.is_empty() && self.qr_payload.is_empty()
    }
}

/// Commissioning state of the bridge node.
///
/// The lifecycle is cyclic: `NotCommissioned -> Commissioned -> Decommissioned`,
/// and a decommissioned bridge can be commissioned again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CommissioningState {
    /// Never commissioned since startup; pairing artifacts are valid.
    #[default]
    NotCommissioned,
    /// Joined to a smart-home fabric.
    Commissioned,
    /// Removed from its fabric and idle, waiting to be paired again.
    Decommissioned,
}

impl CommissioningState {
    /// Whether the bridge is currently joined to a fabric.
    pub fn is_commissioned(self) -> bool {
        matches!(self, Self::Commissioned)
    }
}

impl fmt::Display for CommissioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCommissioned => write!(f, "not commissioned"),
            Self::Commissioned => write!(f, "commissioned"),
            Self::Decommissioned => write!(f, "decommissioned"),
        }
    }
}
