//! Error types for ruuvi-bridge-core.
//!
//! None of these errors is fatal to a running bridge. They differ only in how
//! much work they throw away:
//!
//! | Error | Scope | Recovery |
//! |-------|-------|----------|
//! | [`PollError`] | Whole cycle | Cycle skipped, no endpoint touched; next cycle polls again |
//! | [`IdentityError`] | One record | Record dropped |
//! | [`PublishError`] | One device | Logged; presence is re-evaluated next cycle, so the command is retried implicitly |
//!
//! [`Error`] wraps all of them for callers that want a single type, and adds
//! the construction-time failures of the HTTP registry client.

use thiserror::Error;

use ruuvi_bridge_types::{DeviceHandle, IdentityError};

/// Errors from a single registry poll.
///
/// A poll either fully succeeds (possibly with individually dropped records)
/// or fails with one of these and yields no records at all.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PollError {
    /// The registry could not be reached, timed out, or the body could not be read.
    #[error("Registry not reachable at {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The registry answered with something other than 200 OK.
    #[error("Registry returned HTTP {status}")]
    Status { status: u16 },

    /// The response body is not a JSON array of records.
    #[error("Malformed registry response: {0}")]
    Malformed(String),

    /// The source is unavailable for a reason other than HTTP transport.
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

impl PollError {
    /// Whether the failure was a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Transport { source, .. } if source.is_timeout())
    }
}

/// Errors from the device publishing service.
///
/// The reconciler treats every variant as transient.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PublishError {
    /// An endpoint already exists under this handle.
    #[error("Endpoint already exists: {0}")]
    AlreadyExists(DeviceHandle),

    /// No endpoint exists under this handle.
    #[error("Endpoint not found: {0}")]
    NotFound(DeviceHandle),

    /// The service rejected the command.
    #[error("Publishing service rejected {handle}: {message}")]
    Rejected {
        handle: DeviceHandle,
        message: String,
    },

    /// The service is not reachable or not running.
    #[error("Publishing service unavailable: {0}")]
    Unavailable(String),

    /// The operation is not implemented by this publisher.
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// The service could not persist its state.
    #[error("Failed to persist node state: {0}")]
    Storage(String),
}

/// Errors that can occur anywhere in ruuvi-bridge-core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Registry poll failed.
    #[error(transparent)]
    Poll(#[from] PollError),

    /// Publishing service command failed.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Hardware address could not be mapped to a handle.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Registry URL is not an http(s) URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Result type alias using ruuvi-bridge-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use ruuvi_bridge_types::handle;

    #[test]
    fn test_poll_error_display() {
        let err = PollError::Status { status: 503 };
        assert_eq!(err.to_string(), "Registry returned HTTP 503");
        assert!(!err.is_timeout());

        let err = PollError::Malformed("expected array".to_string());
        assert!(err.to_string().contains("expected array"));
    }

    #[test]
    fn test_publish_error_display() {
        let h = handle("AA:BB:CC:DD:EE:FF").unwrap();
        let err = PublishError::AlreadyExists(h.clone());
        assert!(err.to_string().contains("ruuvi-aabbccddeeff"));

        let err = PublishError::Rejected {
            handle: h,
            message: "attribute out of range".to_string(),
        };
        assert!(err.to_string().contains("attribute out of range"));
    }

    #[test]
    fn test_error_from_conversions() {
        let err: Error = PollError::Unavailable("down".to_string()).into();
        assert!(matches!(err, Error::Poll(_)));
        assert_eq!(err.to_string(), "Registry unavailable: down");

        let err: Error = PublishError::Unsupported("remove").into();
        assert!(matches!(err, Error::Publish(_)));

        let err: Error = IdentityError::Empty.into();
        assert!(matches!(err, Error::Identity(_)));
    }
}
