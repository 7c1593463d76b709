//! Error types for identity parsing in ruuvi-bridge-types.

use thiserror::Error;

/// Errors that can occur when deriving a [`DeviceHandle`](crate::DeviceHandle)
/// from a hardware address.
///
/// These are always per-record: a bad address drops the record it belongs to
/// and nothing else.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum IdentityError {
    /// The address was empty (or only whitespace).
    #[error("Invalid identity: hardware address is empty")]
    Empty,

    /// The address does not have the delimited hex-octet form.
    #[error("Invalid identity '{address}': {reason}")]
    Malformed {
        /// The address as received.
        address: String,
        /// What was wrong with it.
        reason: &'static str,
    },
}

/// Result type alias using ruuvi-bridge-types' IdentityError type.
pub type IdentityResult<T> = std::result::Result<T, IdentityError>;
