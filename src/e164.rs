//! # E164 Phone Numbers
//!
//! The validated phone number type and the fixed-width encoding the
//! discovery protocol uses for sets of numbers.
//!
//! ## Wire Encoding
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        E164 RECORD ENCODING                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  "+1011"          ──►  1011 (decimal)  ──►  00 00 00 00 00 00 03 F3    │
//! │  "+19875550123"   ──►  19875550123     ──►  00 00 00 04 A0 AC D3 AB    │
//! │                                                                         │
//! │  A set of N numbers is N records concatenated in iteration order:      │
//! │                                                                         │
//! │  ┌──────────────┬──────────────┬─────┬──────────────┐                  │
//! │  │  8 bytes BE  │  8 bytes BE  │ ... │  8 bytes BE  │  = 8 × N bytes   │
//! │  └──────────────┴──────────────┴─────┴──────────────┘                  │
//! │                                                                         │
//! │  The codec never sorts or deduplicates. Callers pass ordered sets.     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Size of one encoded phone number
pub const E164_RECORD_LEN: usize = 8;

/// Maximum number of digits in an E164 number (ITU-T E.164)
pub const MAX_E164_DIGITS: usize = 15;

/// A phone number in canonical `+<country><number>` form.
///
/// Stored as its numeric value. Because the first digit can never be zero,
/// the numeric value and the normalized string are interchangeable, so
/// equality, hashing and ordering all follow the string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct E164(u64);

impl E164 {
    /// Parse and validate an E164 string.
    pub fn parse(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix('+')
            .ok_or_else(|| Error::InvalidPhoneNumber(format!("missing leading '+': {s}")))?;

        if digits.is_empty() || digits.len() > MAX_E164_DIGITS {
            return Err(Error::InvalidPhoneNumber(format!(
                "expected 1-{MAX_E164_DIGITS} digits: {s}"
            )));
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidPhoneNumber(format!("non-digit character: {s}")));
        }
        if digits.starts_with('0') {
            return Err(Error::InvalidPhoneNumber(format!("leading zero: {s}")));
        }

        // 15 digits always fit in a u64.
        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|e| Error::InvalidPhoneNumber(format!("{s}: {e}")))
    }

    /// Rebuild a number from its encoded value.
    ///
    /// Zero (padding) and values with too many digits return `None`.
    pub fn from_value(value: u64) -> Option<Self> {
        if value == 0 || value >= 10u64.pow(MAX_E164_DIGITS as u32) {
            return None;
        }
        Some(Self(value))
    }

    /// The numeric value written on the wire
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The 8-byte big-endian wire record
    pub fn to_be_bytes(&self) -> [u8; E164_RECORD_LEN] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for E164 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

impl FromStr for E164 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for E164 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for E164 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// CODEC
// ============================================================================

/// Encode numbers as concatenated 8-byte big-endian records, in iteration order.
pub fn encode_e164s<'a, I>(numbers: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a E164>,
{
    let numbers = numbers.into_iter();
    let mut out = Vec::with_capacity(numbers.size_hint().0 * E164_RECORD_LEN);
    for number in numbers {
        out.extend_from_slice(&number.to_be_bytes());
    }
    out
}

/// Decode one 8-byte record. Zero (padding) decodes to `None`.
pub fn decode_e164(record: [u8; E164_RECORD_LEN]) -> Option<E164> {
    E164::from_value(u64::from_be_bytes(record))
}

// ============================================================================
// TESTS
// ============================================================================
