//! The verify orchestrator: runs the pipeline over a set of artifacts
//! and decides acceptance from the trust map.

use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{info, warn};
use vouch_policy::{ArtifactInfo, KeysMap};
use vouch_store::KeysCache;

use crate::check::{check_signature, SignatureCheckResult, SignatureStatus};

/// Orchestrator knobs.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Treat weak-hash signatures as failures instead of warnings.
    pub fail_weak_signature: bool,
    /// Verify with this many workers; `1` stays sequential.
    pub jobs: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        VerifyOptions {
            fail_weak_signature: false,
            jobs: 1,
        }
    }
}

/// One artifact's verdict: the pipeline result plus the trust-map
/// decision.
#[derive(Debug)]
pub struct EntryOutcome {
    pub result: SignatureCheckResult,
    pub accepted: bool,
    /// Human-readable reason when not accepted.
    pub failure: Option<String>,
}

impl EntryOutcome {
    fn accept(result: SignatureCheckResult) -> Self {
        EntryOutcome {
            result,
            accepted: true,
            failure: None,
        }
    }

    fn reject(result: SignatureCheckResult, failure: String) -> Self {
        EntryOutcome {
            result,
            accepted: false,
            failure: Some(failure),
        }
    }
}

/// Verifies one artifact end to end.
pub fn verify_artifact(
    artifact: &ArtifactInfo,
    signature_path: Option<&PathBuf>,
    cache: &KeysCache,
    keys_map: &KeysMap,
    options: &VerifyOptions,
) -> EntryOutcome {
    let signature_path = signature_path.filter(|p| p.exists());

    // Unsigned artifacts are decided by the map alone.
    if signature_path.is_none() {
        let result = check_signature(artifact, None, cache);
        if result.status == SignatureStatus::ArtifactNotResolved {
            return EntryOutcome::reject(
                result,
                format!("Artifact not resolved: {}", artifact),
            );
        }
        return if keys_map.is_no_signature(artifact) {
            info!(artifact = %artifact, "unsigned artifact allowed by keys map");
            EntryOutcome::accept(result)
        } else {
            EntryOutcome::reject(
                result,
                format!("Unsigned artifact not listed in keys map: {}", artifact),
            )
        };
    }

    let result = check_signature(artifact, signature_path.map(|p| p.as_path()), cache);

    if let Some(weak) = result.weak_hash {
        warn!(artifact = %artifact, algorithm = weak, "signature over a weak hash algorithm");
    }

    match result.status {
        SignatureStatus::SignatureValid => {
            if options.fail_weak_signature {
                if let Some(weak) = result.weak_hash {
                    return EntryOutcome::reject(
                        result,
                        format!("Weak signature algorithm {} used", weak),
                    );
                }
            }
            let key = result
                .key
                .as_ref()
                .expect("a valid signature always carries key info");
            if keys_map.is_valid_key(artifact, key) {
                EntryOutcome::accept(result)
            } else {
                let failure = format!(
                    "Not allowed artifact {} and keyID {}{}",
                    artifact,
                    key.key_id_description(),
                    result
                        .key_show_url
                        .as_deref()
                        .map(|url| format!(" ({})", url))
                        .unwrap_or_default(),
                );
                EntryOutcome::reject(result, failure)
            }
        }
        SignatureStatus::SignatureInvalid | SignatureStatus::SignatureError => {
            if keys_map.is_broken_signature(artifact) {
                info!(artifact = %artifact, "broken signature allowed by keys map");
                EntryOutcome::accept(result)
            } else {
                let detail = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "signature does not verify".to_string());
                EntryOutcome::reject(
                    result,
                    format!("Broken signature for {}: {}", artifact, detail),
                )
            }
        }
        SignatureStatus::KeyNotFound => {
            if keys_map.is_key_missing(artifact) {
                info!(artifact = %artifact, "missing key allowed by keys map");
                EntryOutcome::accept(result)
            } else {
                EntryOutcome::reject(
                    result,
                    format!("Key for {} not found on key servers", artifact),
                )
            }
        }
        status => {
            let detail = result
                .error
                .clone()
                .unwrap_or_else(|| status.to_string());
            EntryOutcome::reject(
                result,
                format!("Verification of {} failed: {}", artifact, detail),
            )
        }
    }
}

/// Verifies every `(artifact, signature)` pair; the run succeeds iff
/// every entry was accepted.
///
/// The cache, client and map are all thread-safe, so `jobs > 1` fans
/// out over a worker pool with no extra synchronization.
pub fn verify_artifacts(
    entries: &[(ArtifactInfo, Option<PathBuf>)],
    cache: &KeysCache,
    keys_map: &KeysMap,
    options: &VerifyOptions,
) -> (Vec<EntryOutcome>, bool) {
    let run = |(artifact, sig): &(ArtifactInfo, Option<PathBuf>)| {
        verify_artifact(artifact, sig.as_ref(), cache, keys_map, options)
    };

    let outcomes: Vec<EntryOutcome> = if options.jobs > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs)
            .build()
            .expect("worker pool construction");
        pool.install(|| entries.par_iter().map(run).collect())
    } else {
        entries.iter().map(run).collect()
    };

    let ok = outcomes.iter().all(|o| o.accepted);
    (outcomes, ok)
}
