//! REST API endpoints for the bridge service.
//!
//! Everything here is read-only. Pairing and status come from in-memory
//! snapshots and never wait on the reconciler; only the device listing goes
//! through the publishing service.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. A failing
//! publishing service maps to HTTP 503.
//!
//! # Example
//!
//! ```ignore
//! use ruuvi_bridge_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use time::OffsetDateTime;

use ruuvi_bridge_core::{
    CommissioningSnapshot, DeviceHandle, PublishError, PublishedEndpoint, ReconcilerStatus,
};

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/pairing", get(get_pairing))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/{id}", get(get_device))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Pairing codes for the companion UI.
///
/// Both fields are empty strings when the bridge is commissioned or no codes
/// are available.
#[derive(Debug, Serialize)]
pub struct PairingResponse {
    pub pairing_code: String,
    pub qr_code: String,
}

async fn get_pairing(State(state): State<Arc<AppState>>) -> Json<PairingResponse> {
    let pairing = state.pairing.current_pairing();
    Json(PairingResponse {
        pairing_code: pairing.manual_code,
        qr_code: pairing.qr_payload,
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub uptime_secs: i64,
    pub registry_url: String,
    pub commissioning: CommissioningSnapshot,
    pub reconciler: ReconcilerStatus,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        registry_url: state.config.registry.url.clone(),
        commissioning: state.pairing.snapshot(),
        reconciler: state.reconciler_status(),
    })
}

/// A published endpoint as shown by the API.
#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    pub handle: String,
    pub address: String,
    pub label: String,
    pub serial_number: String,
    pub reachable: bool,
    /// Last published temperature in °C.
    pub temperature: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<PublishedEndpoint> for DeviceResponse {
    fn from(endpoint: PublishedEndpoint) -> Self {
        Self {
            address: endpoint.handle.canonical_address(),
            handle: endpoint.handle.into(),
            label: endpoint.attributes.node_label,
            serial_number: endpoint.attributes.serial_number,
            reachable: endpoint.attributes.reachable,
            temperature: endpoint
                .attributes
                .measured_value
                .map(|v| f64::from(v) / 100.0),
            created_at: endpoint.created_at,
            updated_at: endpoint.updated_at,
        }
    }
}

/// List published endpoints.
///
/// # Errors
///
/// Returns [`AppError::Publisher`] if the publishing service cannot enumerate.
async fn list_devices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DeviceResponse>>, AppError> {
    let endpoints = state.publisher.endpoints().await?;
    Ok(Json(endpoints.into_iter().map(DeviceResponse::from).collect()))
}

/// Get one published endpoint by handle or hardware address.
async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeviceResponse>, AppError> {
    let handle = DeviceHandle::try_from(id.clone())
        .map_err(|e| AppError::BadRequest(format!("Invalid device id '{}': {}", id, e)))?;

    let endpoint = state
        .publisher
        .endpoints()
        .await?
        .into_iter()
        .find(|endpoint| endpoint.handle == handle)
        .ok_or_else(|| AppError::NotFound(format!("Device not found: {}", handle)))?;

    Ok(Json(endpoint.into()))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Publisher(PublishError),
}

impl From<PublishError> for AppError {
    fn from(e: PublishError) -> Self {
        AppError::Publisher(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Publisher(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
