//! Upstream sensor registry polling.
//!
//! The registry is the gateway that listens to RuuviTag advertisements and
//! exposes the tags it currently knows about as a JSON array:
//!
//! ```json
//! [
//!   {"mac": "AA:BB:CC:DD:EE:FF", "temperature": 24.5, "humidity": 41.2,
//!    "pressure": 101325, "last_seen": 1760862000000}
//! ]
//! ```
//!
//! A poll is one bounded GET. It never retries; the reconciler's cadence is
//! the retry policy. A response that is mostly valid still succeeds: broken
//! elements are dropped and reported in [`PollBatch::dropped`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::value::RawValue;
use time::OffsetDateTime;

use ruuvi_bridge_types::SensorRecord;

use crate::error::{Error, PollError, Result};

/// Default registry URL (the gateway's tag list on the same host).
pub const DEFAULT_REGISTRY_URL: &str = "http://localhost:8080/api/tags";

/// Default timeout for one registry request.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// A source of live sensor records.
#[async_trait]
pub trait SensorRegistry: Send + Sync {
    /// Fetch the current set of records.
    async fn poll(&self) -> std::result::Result<PollBatch, PollError>;
}

/// Result of one successful poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollBatch {
    /// Records that parsed cleanly.
    pub records: Vec<SensorRecord>,
    /// Elements of the response that were skipped.
    pub dropped: Vec<DroppedRecord>,
}

impl PollBatch {
    /// A batch of clean records.
    pub fn new(records: Vec<SensorRecord>) -> Self {
        Self {
            records,
            dropped: Vec::new(),
        }
    }

    /// Whether any element of the response was dropped.
    pub fn has_warnings(&self) -> bool {
        !self.dropped.is_empty()
    }
}

/// An element of the registry response that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    /// Position in the response array.
    pub index: usize,
    /// Why it was dropped.
    pub reason: String,
}

/// Wire format of one registry element.
#[derive(Debug, Deserialize)]
struct RegistryRecord {
    mac: String,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    pressure: Option<f64>,
    /// Epoch milliseconds.
    last_seen: i64,
}

impl RegistryRecord {
    fn into_record(self) -> std::result::Result<SensorRecord, String> {
        let nanos = i128::from(self.last_seen) * 1_000_000;
        let observed_at = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|e| format!("last_seen {} out of range: {}", self.last_seen, e))?;

        Ok(SensorRecord {
            hardware_address: self.mac,
            temperature: self.temperature,
            humidity: self.humidity,
            pressure: self.pressure,
            observed_at,
        })
    }
}

/// Parse a registry response body.
///
/// # Errors
///
/// Returns [`PollError::Malformed`] if the body is not a JSON array. Elements
/// of the array that do not match the record format are dropped rather than
/// failing the whole body.
pub fn parse_records(body: &[u8]) -> std::result::Result<PollBatch, PollError> {
    // Keep elements raw so a bad number only costs its own element
    let elements: Vec<Box<RawValue>> =
        serde_json::from_slice(body).map_err(|e| PollError::Malformed(e.to_string()))?;

    let mut batch = PollBatch {
        records: Vec::with_capacity(elements.len()),
        dropped: Vec::new(),
    };

    for (index, element) in elements.iter().enumerate() {
        let parsed = serde_json::from_str::<RegistryRecord>(element.get())
            .map_err(|e| e.to_string())
            .and_then(RegistryRecord::into_record);

        match parsed {
            Ok(record) => batch.records.push(record),
            Err(reason) => batch.dropped.push(DroppedRecord { index, reason }),
        }
    }

    Ok(batch)
}

/// Registry client that polls the gateway's HTTP tag list.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: Client,
    url: String,
}

impl HttpRegistry {
    /// Create a registry client with the given request timeout.
    ///
    /// # Arguments
    ///
    /// * `url` - Full URL of the tag list (e.g. "http://localhost:8080/api/tags")
    /// * `timeout` - Upper bound for a single poll, connect included
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Client)?;

        Self::with_client(url, client)
    }

    /// Create a registry client with a custom reqwest Client.
    pub fn with_client(url: &str, client: Client) -> Result<Self> {
        let url = url.trim().to_string();

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                url
            )));
        }

        Ok(Self { client, url })
    }

    /// The polled URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SensorRegistry for HttpRegistry {
    async fn poll(&self) -> std::result::Result<PollBatch, PollError> {
        let transport = |source| PollError::Transport {
            url: self.url.clone(),
            source,
        };

        let response = self.client.get(&self.url).send().await.map_err(transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(PollError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        parse_records(&body)
    }
}
