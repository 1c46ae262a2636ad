//! Key identifiers.
//!
//! A [`KeyId`] is either a 64-bit long id or a full fingerprint.  For
//! v4 keys the long id is the low 8 bytes of the fingerprint, so the
//! two forms can refer to the same key; [`KeyId::aliases`] implements
//! that relation.  `PartialEq` stays strict (a long id is never *equal*
//! to a fingerprint) because two distinct fingerprints may share a long
//! id, and equality must remain transitive.

use std::fmt;
use std::str::FromStr;

use sequoia_openpgp::packet::key::{PublicParts, UnspecifiedRole};
use sequoia_openpgp::packet::Key;
use sequoia_openpgp::{Cert, KeyHandle, KeyID};

use crate::{PgpError, Result};

/// Identifies an OpenPGP key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyId {
    /// A 64-bit long key id.
    LongId(u64),
    /// A full fingerprint, 20 bytes (v4) or 32 bytes (v5/v6).
    Fingerprint(Vec<u8>),
}

impl KeyId {
    /// Builds a fingerprint-form id, rejecting non-canonical lengths.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            20 | 32 => Ok(KeyId::Fingerprint(bytes.to_vec())),
            n => Err(PgpError::MalformedKeyId {
                value: hex::encode_upper(bytes),
                reason: format!("{} bytes is not a fingerprint length", n),
            }),
        }
    }

    /// The 64-bit long id: for fingerprints, the low 8 bytes.
    pub fn long_id(&self) -> u64 {
        match self {
            KeyId::LongId(id) => *id,
            KeyId::Fingerprint(fp) => {
                let tail: [u8; 8] = fp[fp.len() - 8..]
                    .try_into()
                    .expect("fingerprints are at least 8 bytes");
                u64::from_be_bytes(tail)
            }
        }
    }

    /// The fingerprint bytes, if this id carries them.
    pub fn fingerprint_bytes(&self) -> Option<&[u8]> {
        match self {
            KeyId::LongId(_) => None,
            KeyId::Fingerprint(fp) => Some(fp),
        }
    }

    /// Uppercase hex without the `0x` prefix.
    pub fn to_hex(&self) -> String {
        match self {
            KeyId::LongId(id) => format!("{:016X}", id),
            KeyId::Fingerprint(fp) => hex::encode_upper(fp),
        }
    }

    /// Whether `self` and `other` could identify the same key.
    ///
    /// Two fingerprints alias iff they are equal; a long id aliases a
    /// fingerprint iff it matches the fingerprint's low 8 bytes.
    pub fn aliases(&self, other: &KeyId) -> bool {
        match (self, other) {
            (KeyId::Fingerprint(a), KeyId::Fingerprint(b)) => a == b,
            _ => self.long_id() == other.long_id(),
        }
    }

    /// Finds the matching public key in `cert`.
    ///
    /// A long id matches on the low 64 bits; a fingerprint requires
    /// exact byte equality.
    pub fn lookup_in<'a>(
        &self,
        cert: &'a Cert,
    ) -> Result<&'a Key<PublicParts, UnspecifiedRole>> {
        for ka in cert.keys() {
            let key = ka.key();
            let hit = match self {
                KeyId::LongId(id) => key_long_id(key) == Some(*id),
                KeyId::Fingerprint(fp) => {
                    key.fingerprint().as_bytes() == fp.as_slice()
                }
            };
            if hit {
                return Ok(key);
            }
        }
        Err(PgpError::KeyNotInRing(self.clone()))
    }
}

/// The low 64 bits of a key's identifier, if it has a canonical one.
fn key_long_id(key: &Key<PublicParts, UnspecifiedRole>) -> Option<u64> {
    let keyid = key.keyid();
    let bytes = keyid.as_bytes();
    if bytes.len() == 8 {
        Some(u64::from_be_bytes(bytes.try_into().unwrap()))
    } else {
        None
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<u64> for KeyId {
    fn from(id: u64) -> Self {
        KeyId::LongId(id)
    }
}

impl From<&KeyId> for KeyHandle {
    fn from(id: &KeyId) -> Self {
        match id {
            KeyId::LongId(v) => KeyHandle::KeyID(KeyID::from(*v)),
            KeyId::Fingerprint(fp) => KeyHandle::Fingerprint(
                sequoia_openpgp::Fingerprint::from_bytes(fp),
            ),
        }
    }
}

impl FromStr for KeyId {
    type Err = PgpError;

    /// Parses `0x`-prefixed or bare hex; internal whitespace is
    /// tolerated the way trust-map files write grouped fingerprints.
    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s.split_whitespace().collect();
        let digits = compact
            .strip_prefix("0x")
            .or_else(|| compact.strip_prefix("0X"))
            .unwrap_or(&compact);
        if digits.is_empty() {
            return Err(PgpError::MalformedKeyId {
                value: s.to_string(),
                reason: "empty".to_string(),
            });
        }
        if digits.len() % 2 != 0 {
            return Err(PgpError::OddLengthHex(s.to_string()));
        }
        let bytes = hex::decode(digits).map_err(|e| PgpError::MalformedKeyId {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
        match bytes.len() {
            8 => Ok(KeyId::LongId(u64::from_be_bytes(
                bytes.as_slice().try_into().unwrap(),
            ))),
            20 | 32 => Ok(KeyId::Fingerprint(bytes)),
            n => Err(PgpError::MalformedKeyId {
                value: s.to_string(),
                reason: format!("{} bytes is neither a long id nor a fingerprint", n),
            }),
        }
    }
}
