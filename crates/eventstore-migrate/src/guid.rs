//! 16-byte identifiers and the codec between the two binary layouts.
//!
//! The legacy store keeps identifiers exactly as a .NET `Guid` lays them out
//! in memory: the first three groups are little-endian. Standard UUID text and
//! the RFC 4122 byte order read the same bytes big-endian. Swapping between the
//! two is a fixed permutation of the first eight bytes:
//!
//! ```text
//! legacy:      b0 b1 b2 b3 | b4 b5 | b6 b7 | b8 .. b15
//! destination: b3 b2 b1 b0 | b5 b4 | b7 b6 | b8 .. b15
//! ```
//!
//! This module is the only place that knows about byte layouts. Everything
//! else treats [`Guid`] as an opaque, comparable value.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// A 16-byte identifier, stored in the legacy (mixed-endian) layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid([u8; 16]);

impl Guid {
    /// The all-zero identifier.
    pub const EMPTY: Self = Self([0; 16]);

    /// Wraps bytes that are already in legacy layout.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generates a random identifier.
    #[must_use]
    pub fn new_random() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Builds an identifier from bytes in legacy layout.
    ///
    /// With `swap_order` set, the bytes are taken to be in destination layout
    /// and are permuted back first.
    #[must_use]
    pub fn from_legacy_form(bytes: [u8; 16], swap_order: bool) -> Self {
        Self(permute(bytes, swap_order))
    }

    /// Builds an identifier from a slice that must be exactly 16 bytes long.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGuid`] if the slice has any other length.
    pub fn from_slice(bytes: &[u8], swap_order: bool) -> Result<Self, Error> {
        let bytes: [u8; 16] = bytes.try_into().map_err(|_| {
            Error::InvalidGuid(format!("expected 16 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_legacy_form(bytes, swap_order))
    }

    /// Returns the bytes in destination layout when `swap_order` is set, or
    /// unchanged (legacy layout) otherwise.
    #[must_use]
    pub fn to_destination_form(&self, swap_order: bool) -> [u8; 16] {
        permute(self.0, swap_order)
    }

    /// Raw bytes in legacy layout.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Whether this is [`Guid::EMPTY`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 16]
    }
}

/// The byte permutation between legacy and destination layout.
///
/// It is its own inverse, so the same function serves both directions.
fn permute(bytes: [u8; 16], swap_order: bool) -> [u8; 16] {
    if !swap_order {
        return bytes;
    }

    let mut swapped = bytes;
    swapped[0] = bytes[3];
    swapped[1] = bytes[2];
    swapped[2] = bytes[1];
    swapped[3] = bytes[0];

    swapped[4] = bytes[5];
    swapped[5] = bytes[4];

    swapped[6] = bytes[7];
    swapped[7] = bytes[6];
    swapped
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uuid = Uuid::from_bytes(self.to_destination_form(true));
        write!(f, "{}", uuid.hyphenated())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

impl FromStr for Guid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::parse_str(s.trim())
            .map_err(|e| Error::InvalidGuid(format!("'{}': {}", s, e)))?;
        Ok(Self::from_legacy_form(uuid.into_bytes(), true))
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
