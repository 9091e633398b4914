// crates/canon-core/src/id.rs
// ============================================================================
// Module: Canon Identifiers
// Description: Canonical opaque identifiers used throughout the association
// and projection engine.
// Purpose: Provide strongly typed, serializable identifiers with stable wire
// forms, including the time-ordered ReferenceId.
// Dependencies: serde, time, rand
// ============================================================================

//! ## Overview
//! This module defines the identifiers that flow through the association and
//! projection engine. [`ReferenceId`] is the time-ordered, lexicographically
//! sortable token minted for every canonical entity. The remaining types are
//! opaque UTF-8 newtypes that keep source-system, adapter, and model names
//! from being interchanged with one another at compile time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use rand::RngCore;

// ============================================================================
// SECTION: ReferenceId
// ============================================================================

const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Time-ordered canonical entity identifier (a ULID).
///
/// # Invariants
/// - The leading 48 bits are a millisecond Unix timestamp; identifiers minted
///   later always sort greater than or equal to identifiers minted earlier.
/// - The trailing 80 bits are process-local randomness and carry no meaning.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferenceId([u8; 16]);

impl ReferenceId {
    /// Mints a new reference id from the given millisecond timestamp and an
    /// externally supplied randomness source.
    ///
    /// Exposed separately from [`ReferenceId::generate`] so association can
    /// be tested deterministically without mocking the system clock.
    #[must_use]
    pub fn from_parts(unix_millis: u64, rng: &mut dyn RngCore) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0] = (unix_millis >> 40) as u8;
        bytes[1] = (unix_millis >> 32) as u8;
        bytes[2] = (unix_millis >> 24) as u8;
        bytes[3] = (unix_millis >> 16) as u8;
        bytes[4] = (unix_millis >> 8) as u8;
        bytes[5] = unix_millis as u8;
        rng.fill_bytes(&mut bytes[6..]);
        Self(bytes)
    }

    /// Mints a new reference id using the current wall-clock time.
    #[must_use]
    pub fn generate() -> Self {
        let unix_millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let unix_millis = u64::try_from(unix_millis.max(0)).unwrap_or(u64::MAX);
        Self::from_parts(unix_millis, &mut rand::thread_rng())
    }

    /// Returns the raw 16 bytes backing this identifier.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parses a 26-character Crockford base32 ULID string.
    pub fn parse(text: &str) -> Result<Self, ParseReferenceIdError> {
        let chars: Vec<u8> = text.bytes().collect();
        if chars.len() != 26 {
            return Err(ParseReferenceIdError::BadLength(chars.len()));
        }
        // 26 chars * 5 bits = 130 bits; the first character may only
        // contribute its low 3 bits (the remaining high 2 bits are always
        // zero) for the decoded value to fit in 128 bits.
        let first_digit = decode_crockford_char(chars[0]).ok_or(ParseReferenceIdError::BadChar(chars[0] as char))?;
        if first_digit >= 8 {
            return Err(ParseReferenceIdError::Overflow);
        }
        let mut value: u128 = u128::from(first_digit);
        for &c in &chars[1..] {
            let digit = decode_crockford_char(c).ok_or(ParseReferenceIdError::BadChar(c as char))?;
            value = (value << 5) | u128::from(digit);
        }
        Ok(Self(value.to_be_bytes()))
    }
}

/// Errors returned when parsing a [`ReferenceId`] from text.
#[derive(Debug, thiserror::Error)]
pub enum ParseReferenceIdError {
    /// The input was not exactly 26 characters long.
    #[error("reference id must be 26 characters, got {0}")]
    BadLength(usize),
    /// The input contained a character outside the Crockford base32 alphabet.
    #[error("reference id contains invalid character: {0:?}")]
    BadChar(char),
    /// The decoded value does not fit in 128 bits.
    #[error("reference id decodes to a value wider than 128 bits")]
    Overflow,
}

fn decode_crockford_char(c: u8) -> Option<u8> {
    let upper = c.to_ascii_uppercase();
    match upper {
        b'O' => Some(0),
        b'I' | b'L' => Some(1),
        _ => CROCKFORD_ALPHABET.iter().position(|&a| a == upper).map(|p| p as u8),
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = u128::from_be_bytes(self.0);
        let mut out = [0u8; 26];
        let mut v = value;
        for i in (0..26).rev() {
            out[i] = CROCKFORD_ALPHABET[(v & 0x1f) as usize];
            v >>= 5;
        }
        // SAFETY-free: all bytes come from CROCKFORD_ALPHABET, which is ASCII.
        f.write_str(std::str::from_utf8(&out).unwrap_or_default())
    }
}

impl fmt::Debug for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReferenceId({self})")
    }
}

impl std::str::FromStr for ReferenceId {
    type Err = ParseReferenceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for ReferenceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ReferenceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(|err| D::Error::custom(format!("invalid reference id: {err}")))
    }
}

// ============================================================================
// SECTION: Opaque String Identifiers
// ============================================================================

/// Declares an opaque, UTF-8 newtype identifier with the standard
/// construction/display/conversion surface used across this crate.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied here.
macro_rules! opaque_string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_string_id!(
    /// Stable display and set-naming name of a model type (e.g. `"Contact"`).
    ModelName
);

opaque_string_id!(
    /// Source system name from a record's envelope (e.g. `"crm"`).
    System
);

opaque_string_id!(
    /// Adapter name from a record's envelope (e.g. `"sf"`).
    Adapter
);

opaque_string_id!(
    /// Source-local external identifier for a record.
    ExternalId
);
