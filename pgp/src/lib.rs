//! OpenPGP primitives for artifact signature verification.
//!
//! This crate wraps the pieces of [`sequoia_openpgp`] that the verifier
//! needs: identifying keys ([`KeyId`], [`KeyFingerprint`]), loading and
//! validating public key rings ([`KeyRing`]), and parsing and checking
//! detached signatures ([`signature`]).
//!
//! Everything here is pure computation over already-obtained bytes;
//! fetching keys from the network and caching them on disk live in
//! their own crates.

pub mod fingerprint;
pub mod keyid;
pub mod ring;
pub mod signature;

pub use fingerprint::KeyFingerprint;
pub use keyid::KeyId;
pub use ring::{ring_policy, KeyInfo, KeyRing, RevocationInfo};
pub use signature::{
    issuer_key_id, load_signature, signature_info, verify_detached,
    weak_hash_algorithm, SignatureInfo,
};

/// Errors produced by this crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PgpError {
    /// The input stream contained no signature packet.
    #[error("no signature found in the input stream")]
    SignatureNotFound,

    /// The requested key is not part of the given key ring.
    #[error("key {0} not present in the key ring")]
    KeyNotInRing(KeyId),

    /// The hashed and unhashed issuer subpackets name different keys.
    #[error("signature issuer key ids disagree: \
             hashed 0x{hashed:016X}, unhashed 0x{unhashed:016X}")]
    KeyIdMismatch { hashed: u64, unhashed: u64 },

    /// A v4 issuer fingerprint does not embed the stated issuer key id.
    #[error("issuer fingerprint 0x{fingerprint} does not match \
             issuer key id 0x{key_id:016X}")]
    FingerprintKeyIdMismatch { fingerprint: String, key_id: u64 },

    /// The signature names no issuer at all.
    #[error("signature carries no issuer information")]
    MissingIssuer,

    /// The hash algorithm id is not one this verifier knows about.
    #[error("unsupported hash algorithm id {0}")]
    UnsupportedHashAlgorithm(u8),

    /// A sub-key in the ring lacks a verifiable binding signature.
    #[error("sub-key 0x{subkey} has no valid binding signature \
             from primary 0x{primary}")]
    SubkeyBinding { subkey: String, primary: String },

    /// A key id or fingerprint string could not be parsed.
    #[error("malformed key id {value:?}: {reason}")]
    MalformedKeyId { value: String, reason: String },

    /// A hex key id had an odd number of digits.
    #[error("odd number of hex digits in key id {0:?}")]
    OddLengthHex(String),

    /// A fingerprint is outside the accepted length bounds.
    #[error("Key length for = 0x{hex} is {bits} bits, \
             should be between 64 and 160 bits")]
    KeyLength { hex: String, bits: usize },

    /// The cryptographic verification machinery reported a hard error
    /// (as opposed to a clean mismatch).
    #[error("signature verification failed: {0}")]
    Verification(String),

    /// An error bubbled up from the OpenPGP library.
    #[error("{0}")]
    Library(anyhow::Error),
}

impl PgpError {
    pub(crate) fn library(e: anyhow::Error) -> Self {
        PgpError::Library(e)
    }
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, PgpError>;
