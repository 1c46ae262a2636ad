//! Canonical fingerprint strings for trust-map entries.
//!
//! Trust maps identify keys by hex strings that range from a 64-bit
//! long id up to a full 160-bit v4 fingerprint.  [`KeyFingerprint`]
//! stores the canonical form (whitespace stripped, `0x` dropped,
//! uppercased) and compares by suffix so that a long id and the
//! fingerprint it abbreviates count as the same key.
//!
//! Like [`crate::KeyId`], the suffix relation is not transitive, so
//! this type implements `PartialEq` but not `Eq`.

use std::fmt;

use crate::{PgpError, Result};

/// A key fingerprint (or long id) in canonical uppercase hex.
#[derive(Debug, Clone, Hash)]
pub struct KeyFingerprint {
    hex: String,
}

/// Minimum number of hex digits two fingerprints must share for the
/// suffix comparison: 8 bytes, the length of a long id.
const MIN_SUFFIX_DIGITS: usize = 16;

impl KeyFingerprint {
    /// Parses a trust-map fingerprint.
    ///
    /// Accepts optional `0x`, internal whitespace, and enforces the
    /// 64..=160 bit bounds trust-map entries must satisfy.
    pub fn parse(s: &str) -> Result<Self> {
        let compact: String = s.split_whitespace().collect();
        let digits = compact
            .strip_prefix("0x")
            .or_else(|| compact.strip_prefix("0X"))
            .unwrap_or(&compact);
        if digits.len() % 2 != 0 {
            return Err(PgpError::OddLengthHex(s.to_string()));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PgpError::MalformedKeyId {
                value: s.to_string(),
                reason: "invalid hex digit".to_string(),
            });
        }
        let hex = digits.to_ascii_uppercase();
        let bits = hex.len() * 4;
        if !(64..=160).contains(&bits) {
            return Err(PgpError::KeyLength { hex, bits });
        }
        Ok(KeyFingerprint { hex })
    }

    /// Canonical form of key material, without the trust-map length
    /// bounds (v5/v6 keys carry 256-bit fingerprints).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        KeyFingerprint {
            hex: hex::encode_upper(bytes),
        }
    }

    /// The canonical hex digits, uppercase, no prefix.
    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Number of bits in this fingerprint.
    pub fn bits(&self) -> usize {
        self.hex.len() * 4
    }

    /// The low 64 bits as a long id, when at least that much is known.
    pub fn long_id(&self) -> Option<u64> {
        if self.hex.len() < MIN_SUFFIX_DIGITS {
            return None;
        }
        u64::from_str_radix(&self.hex[self.hex.len() - MIN_SUFFIX_DIGITS..], 16).ok()
    }
}

impl PartialEq for KeyFingerprint {
    /// Suffix equality: `0x164BD2247B936711` matches the full
    /// fingerprint it abbreviates.  At least 8 bytes must coincide.
    fn eq(&self, other: &Self) -> bool {
        let (short, long) = if self.hex.len() <= other.hex.len() {
            (&self.hex, &other.hex)
        } else {
            (&other.hex, &self.hex)
        };
        short.len() >= MIN_SUFFIX_DIGITS && long.ends_with(short.as_str())
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", self.hex)
    }
}
