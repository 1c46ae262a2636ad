//! Artifact signature verification against a trust map.
//!
//! The pipeline: a detached signature names an issuer key id; the
//! [`vouch_store::KeysCache`] produces that key's ring (locally or via
//! the key servers); the signature is checked over the artifact bytes;
//! and the trust map decides whether the signing key — or the absence
//! of a signature, key or valid signature — is acceptable for those
//! coordinates.

pub mod check;
pub mod cli;
pub mod config;
pub mod report;
pub mod verify;

pub use check::{check_signature, SignatureCheckResult, SignatureStatus};
pub use config::VerifierConfig;
pub use verify::{verify_artifacts, EntryOutcome, VerifyOptions};
