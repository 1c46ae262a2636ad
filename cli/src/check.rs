//! The per-artifact signature check pipeline.
//!
//! [`check_signature`] never fails: every outcome, including internal
//! errors, is encoded in the returned [`SignatureCheckResult`] so the
//! orchestrator can decide acceptance from the trust map alone.

use std::fmt;
use std::fs::File;
use std::path::Path;

use tracing::debug;
use vouch_pgp::{
    issuer_key_id, load_signature, signature_info, verify_detached,
    weak_hash_algorithm, KeyInfo, RevocationInfo, SignatureInfo,
};
use vouch_policy::ArtifactInfo;
use vouch_store::{CacheError, KeysCache};

/// Where the pipeline ended up for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    /// The artifact's bytes are not available.
    ArtifactNotResolved,
    /// No signature file was available.
    SignatureNotResolved,
    /// The signature failed to parse, or verification errored hard.
    SignatureError,
    /// The signing key exists on no configured server.
    KeyNotFound,
    /// The ring is revoked and unusable.
    KeyRevocation,
    /// The signature cryptographically verifies.
    SignatureValid,
    /// The signature is well-formed but does not verify.
    SignatureInvalid,
    /// Infrastructure failure (network, cache, I/O).
    Error,
    /// Resolution succeeded; no verdict was reached yet.
    Resolved,
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SignatureStatus::ArtifactNotResolved => "ARTIFACT_NOT_RESOLVED",
            SignatureStatus::SignatureNotResolved => "SIGNATURE_NOT_RESOLVED",
            SignatureStatus::SignatureError => "SIGNATURE_ERROR",
            SignatureStatus::KeyNotFound => "KEY_NOT_FOUND",
            SignatureStatus::KeyRevocation => "KEY_REVOCATION",
            SignatureStatus::SignatureValid => "SIGNATURE_VALID",
            SignatureStatus::SignatureInvalid => "SIGNATURE_INVALID",
            SignatureStatus::Error => "ERROR",
            SignatureStatus::Resolved => "RESOLVED",
        };
        f.write_str(s)
    }
}

/// Everything the pipeline learned about one artifact.
#[derive(Debug)]
pub struct SignatureCheckResult {
    pub artifact: ArtifactInfo,
    pub status: SignatureStatus,
    pub key: Option<KeyInfo>,
    pub key_show_url: Option<String>,
    pub signature: Option<SignatureInfo>,
    pub revocation: Option<RevocationInfo>,
    /// Name of the hash algorithm, iff it is too weak to trust.
    pub weak_hash: Option<&'static str>,
    pub error: Option<String>,
}

impl SignatureCheckResult {
    fn new(artifact: ArtifactInfo) -> Self {
        SignatureCheckResult {
            artifact,
            status: SignatureStatus::Resolved,
            key: None,
            key_show_url: None,
            signature: None,
            revocation: None,
            weak_hash: None,
            error: None,
        }
    }

    fn failed(mut self, status: SignatureStatus, error: impl fmt::Display) -> Self {
        self.status = status;
        self.error = Some(error.to_string());
        self
    }
}

/// Runs the full pipeline for one artifact/signature pair.
pub fn check_signature(
    artifact: &ArtifactInfo,
    signature_path: Option<&Path>,
    cache: &KeysCache,
) -> SignatureCheckResult {
    let mut result = SignatureCheckResult::new(artifact.clone());

    let Some(artifact_path) = artifact.resolved_path.clone() else {
        result.status = SignatureStatus::ArtifactNotResolved;
        return result;
    };
    let Some(sig_path) = signature_path.filter(|p| p.exists()) else {
        result.status = SignatureStatus::SignatureNotResolved;
        return result;
    };

    debug!(artifact = %artifact, signature = %sig_path.display(), "checking signature");

    let sig = match File::open(sig_path) {
        Ok(file) => match load_signature(file) {
            Ok(sig) => sig,
            Err(e) => return result.failed(SignatureStatus::SignatureError, e),
        },
        Err(e) => return result.failed(SignatureStatus::SignatureError, e),
    };

    let key_id = match issuer_key_id(&sig) {
        Ok(id) => id,
        Err(e) => return result.failed(SignatureStatus::SignatureError, e),
    };
    match signature_info(&sig) {
        Ok(info) => result.signature = Some(info),
        Err(e) => return result.failed(SignatureStatus::SignatureError, e),
    }
    result.weak_hash = match weak_hash_algorithm(&sig) {
        Ok(weak) => weak,
        Err(e) => return result.failed(SignatureStatus::SignatureError, e),
    };

    let ring = match cache.get_key_ring(&key_id) {
        Ok(ring) => ring,
        Err(CacheError::KeyNotFound(_)) => {
            result.key_show_url = cache
                .client()
                .and_then(|c| c.key_show_url(&key_id.to_hex()));
            result.status = SignatureStatus::KeyNotFound;
            return result;
        }
        Err(e) => return result.failed(SignatureStatus::Error, e),
    };

    result.revocation = ring.revocation();
    let key_info = match ring.key_info(&key_id) {
        Ok(info) => info,
        Err(e) => {
            // A revocation certificate without usable key material.
            if result.revocation.is_some() {
                return result.failed(SignatureStatus::KeyRevocation, e);
            }
            return result.failed(SignatureStatus::Error, e);
        }
    };
    result.key_show_url = cache
        .client()
        .and_then(|c| c.key_show_url(key_info.fingerprint.as_hex()));
    result.key = Some(key_info);

    let artifact_file = match File::open(&artifact_path) {
        Ok(file) => file,
        Err(e) => return result.failed(SignatureStatus::Error, e),
    };
    match verify_detached(&sig, &ring, artifact_file) {
        Ok(true) => result.status = SignatureStatus::SignatureValid,
        Ok(false) => result.status = SignatureStatus::SignatureInvalid,
        Err(e) => return result.failed(SignatureStatus::SignatureError, e),
    }
    result
}
