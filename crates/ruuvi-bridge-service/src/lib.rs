//! Ruuvi smart-home bridge service.
//!
//! This crate wires the reconciliation core into a long-running service that:
//! - Polls the RuuviTag gateway on a schedule
//! - Publishes every tag with a temperature reading as a bridged sensor
//! - Tracks commissioning and reports pairing codes while unpaired
//! - Exposes a small read-only HTTP API for the companion UI
//!
//! Commissioning is driven by the operator: `--commission commissioned` or
//! `--commission decommissioned` at startup sets the persisted flag.
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/pairing` - Pairing codes (`pairing_code`, `qr_code`)
//! - `GET /api/status` - Commissioning and reconciler status
//! - `GET /api/devices` - Published endpoints
//! - `GET /api/devices/{id}` - One endpoint, by handle or hardware address
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/ruuvi-bridge/bridge.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:5555"
//!
//! [registry]
//! url = "http://localhost:8080/api/tags"
//! poll_interval_secs = 5
//!
//! [bridge]
//! vendor_id = 0xFFF1
//! product_id = 0x8000
//! enabled_tags = ["AA:BB:CC:DD:EE:FF"]
//! pairing_code = "34970112332"
//! qr_code = "MT:Y.K9042C00KA0648G00"
//! ```

pub mod api;
pub mod commissioning;
pub mod config;
pub mod state;

pub use config::{
    BridgeConfig, Config, ConfigError, RegistryConfig, ServerConfig, ValidationError,
    default_config_path,
};
pub use commissioning::{CommissionOverride, apply_override};
pub use state::AppState;
