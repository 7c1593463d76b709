//! Stable device handles derived from hardware addresses.
//!
//! A RuuviTag is identified upstream by its Bluetooth MAC address, which
//! gateways report in whatever shape they like (`AA:BB:CC:DD:EE:FF`,
//! `aa-bb-cc-dd-ee-ff`, ...). The bridge publishes every tag under a
//! [`DeviceHandle`] instead: the hex digits lowercased, separators stripped,
//! and a fixed `ruuvi-` namespace prefix in front.
//!
//! The mapping is pure, so the same tag lands on the same endpoint after a
//! restart without any lookup table.
//!
//! ```
//! use ruuvi_bridge_types::handle;
//!
//! let a = handle("AA:BB:CC:DD:EE:FF").unwrap();
//! let b = handle("aa-bb-cc-dd-ee-ff").unwrap();
//! assert_eq!(a, b);
//! assert_eq!(a.as_str(), "ruuvi-aabbccddeeff");
//! ```

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, IdentityResult};

/// Namespace prefix shared by every handle.
pub const HANDLE_PREFIX: &str = "ruuvi-";

/// Minimum number of octets in a hardware address.
pub const MIN_OCTETS: usize = 2;

/// Maximum number of octets in a hardware address (EUI-64).
pub const MAX_OCTETS: usize = 8;

/// Internal identifier for a bridged device.
///
/// Only constructible through [`DeviceHandle::from_address`] (or
/// deserialization of a previously produced handle), so the inner string is
/// always `ruuvi-` followed by an even number of lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct DeviceHandle(String);

impl DeviceHandle {
    /// Derive the handle for a hardware address.
    ///
    /// Accepts 2 to 8 two-digit hex octets separated consistently by either
    /// `:` or `-`, in any letter case. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Empty`] for an empty address and
    /// [`IdentityError::Malformed`] for anything that is not a delimited
    /// hex-octet sequence.
    pub fn from_address(address: &str) -> IdentityResult<Self> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }

        let malformed = |reason| IdentityError::Malformed {
            address: address.to_string(),
            reason,
        };

        let delimiter = match (trimmed.contains(':'), trimmed.contains('-')) {
            (true, false) => ':',
            (false, true) => '-',
            (true, true) => return Err(malformed("mixed ':' and '-' delimiters")),
            (false, false) => return Err(malformed("expected ':' or '-' delimited octets")),
        };

        let mut digits = String::with_capacity(HANDLE_PREFIX.len() + MAX_OCTETS * 2);
        digits.push_str(HANDLE_PREFIX);

        let mut octets = 0;
        for octet in trimmed.split(delimiter) {
            if octet.len() != 2 {
                return Err(malformed("each octet must be exactly two hex digits"));
            }
            if !octet.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(malformed("octet contains a non-hex character"));
            }
            octets += 1;
            if octets > MAX_OCTETS {
                return Err(malformed("too many octets"));
            }
            digits.push_str(&octet.to_ascii_lowercase());
        }

        if octets < MIN_OCTETS {
            return Err(malformed("too few octets"));
        }

        Ok(Self(digits))
    }

    /// The full handle string, e.g. `ruuvi-aabbccddeeff`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The lowercase hex digits without the namespace prefix.
    pub fn hex(&self) -> &str {
        &self.0[HANDLE_PREFIX.len()..]
    }

    /// Serial number form of the address: uppercase hex, no separators.
    pub fn serial(&self) -> String {
        self.hex().to_ascii_uppercase()
    }

    /// Canonical address form: uppercase octets joined by `:`.
    pub fn canonical_address(&self) -> String {
        let hex = self.serial();
        let mut out = String::with_capacity(hex.len() + hex.len() / 2);
        for (i, pair) in hex.as_bytes().chunks(2).enumerate() {
            if i > 0 {
                out.push(':');
            }
            out.extend(pair.iter().map(|&b| b as char));
        }
        out
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<DeviceHandle> for String {
    fn from(handle: DeviceHandle) -> Self {
        handle.0
    }
}

impl TryFrom<String> for DeviceHandle {
    type Error = IdentityError;

    /// Accepts either an already-derived handle or a raw hardware address.
    fn try_from(value: String) -> IdentityResult<Self> {
        match value.strip_prefix(HANDLE_PREFIX) {
            Some(hex)
                if hex.len() >= MIN_OCTETS * 2
                    && hex.len() <= MAX_OCTETS * 2
                    && hex.len() % 2 == 0
                    && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) =>
            {
                Ok(Self(value))
            }
            _ => Self::from_address(&value),
        }
    }
}

/// Derive the [`DeviceHandle`] for a hardware address.
///
/// Shorthand for [`DeviceHandle::from_address`].
pub fn handle(hardware_address: &str) -> IdentityResult<DeviceHandle> {
    DeviceHandle::from_address(hardware_address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_handle_normalizes_case_and_separator() {
        assert_eq!(handle("AA:BB:CC").unwrap(), handle("aa-bb-cc").unwrap());
        assert_eq!(
            handle("AA:BB:CC:DD:EE:FF").unwrap().as_str(),
            "ruuvi-aabbccddeeff"
        );
    }

    #[test]
    fn test_handle_trims_whitespace() {
        assert_eq!(
            handle("  aa:bb:cc:dd:ee:ff\n").unwrap(),
            handle("AA:BB:CC:DD:EE:FF").unwrap()
        );
    }

    #[test]
    fn test_handle_empty() {
        assert_eq!(handle(""), Err(IdentityError::Empty));
        assert_eq!(handle("   "), Err(IdentityError::Empty));
    }

    #[test]
    fn test_handle_malformed() {
        for bad in [
            "AABBCCDDEEFF",
            "AA:BB-CC",
            "AA:BB:CC:DD:EE:GG",
            "A:BB:CC",
            "AAA:BB:CC",
            "AA::BB",
            "AA:BB:",
            "AA",
            "AA:BB:CC:DD:EE:FF:00:11:22",
            "RuuviTag 12345",
        ] {
            let result = handle(bad);
            assert!(
                matches!(result, Err(IdentityError::Malformed { .. })),
                "expected {bad:?} to be malformed, got {result:?}"
            );
        }
    }

    #[test]
    fn test_malformed_error_keeps_address() {
        let err = handle("not-a-mac").unwrap_err();
        let display = err.to_string();
        assert!(display.contains("not-a-mac"));
    }

    #[test]
    fn test_serial_and_canonical_address() {
        let h = handle("aa-bb-cc-dd-ee-ff").unwrap();
        assert_eq!(h.hex(), "aabbccddeeff");
        assert_eq!(h.serial(), "AABBCCDDEEFF");
        assert_eq!(h.canonical_address(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_eui64_accepted() {
        let h = handle("00:11:22:33:44:55:66:77").unwrap();
        assert_eq!(h.as_str(), "ruuvi-0011223344556677");
    }

    #[test]
    fn test_display_matches_as_str() {
        let h = handle("11:22:33:44:55:66").unwrap();
        assert_eq!(h.to_string(), h.as_str());
    }

    #[test]
    fn test_try_from_accepts_handle_and_address() {
        let from_handle = DeviceHandle::try_from("ruuvi-aabbccddeeff".to_string()).unwrap();
        let from_address = DeviceHandle::try_from("AA:BB:CC:DD:EE:FF".to_string()).unwrap();
        assert_eq!(from_handle, from_address);

        assert!(DeviceHandle::try_from("ruuvi-xyz".to_string()).is_err());
        assert!(DeviceHandle::try_from("ruuvi-AABBCC".to_string()).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_handle_serde_round_trip() {
        let h = handle("AA:BB:CC:DD:EE:FF").unwrap();
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, "\"ruuvi-aabbccddeeff\"");
        let back: DeviceHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);

        let bad: Result<DeviceHandle, _> = serde_json::from_str("\"garbage\"");
        assert!(bad.is_err());
    }

    fn octets() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>(), MIN_OCTETS..=MAX_OCTETS)
    }

    fn render(octets: &[u8], upper: bool, delimiter: &str) -> String {
        octets
            .iter()
            .map(|o| {
                if upper {
                    format!("{o:02X}")
                } else {
                    format!("{o:02x}")
                }
            })
            .collect::<Vec<_>>()
            .join(delimiter)
    }

    proptest! {
        #[test]
        fn prop_handle_is_case_and_separator_insensitive(
            octets in octets(),
            upper_a in any::<bool>(),
            upper_b in any::<bool>(),
            colon_a in any::<bool>(),
            colon_b in any::<bool>(),
        ) {
            let a = render(&octets, upper_a, if colon_a { ":" } else { "-" });
            let b = render(&octets, upper_b, if colon_b { ":" } else { "-" });
            prop_assert_eq!(handle(&a).unwrap(), handle(&b).unwrap());
        }

        #[test]
        fn prop_handle_is_injective(a in octets(), b in octets()) {
            let ha = handle(&render(&a, true, ":")).unwrap();
            let hb = handle(&render(&b, true, ":")).unwrap();
            prop_assert_eq!(a == b, ha == hb);
        }

        #[test]
        fn prop_canonical_address_round_trips(octets in octets()) {
            let h = handle(&render(&octets, false, "-")).unwrap();
            prop_assert_eq!(h.canonical_address(), render(&octets, true, ":"));
            prop_assert_eq!(handle(&h.canonical_address()).unwrap(), h);
        }

        #[test]
        fn prop_handle_never_panics(input in ".{0,40}") {
            let _ = handle(&input);
        }
    }
}
