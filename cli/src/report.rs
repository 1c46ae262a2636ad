//! JSON report of a verification run.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::verify::EntryOutcome;

fn rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

fn outcome_json(outcome: &EntryOutcome) -> serde_json::Value {
    let result = &outcome.result;
    json!({
        "artifact": result.artifact.to_string(),
        "status": result.status.to_string(),
        "accepted": outcome.accepted,
        "failure": outcome.failure,
        "weakHashAlgorithm": result.weak_hash,
        "keyShowUrl": result.key_show_url,
        "error": result.error,
        "signature": result.signature.as_ref().map(|sig| json!({
            "version": sig.version,
            "keyAlgorithm": sig.key_algorithm.to_string(),
            "hashAlgorithm": sig.hash_algorithm.to_string(),
            "created": sig.created.map(rfc3339),
            "keyId": sig.key_id.to_string(),
        })),
        "key": result.key.as_ref().map(|key| json!({
            "fingerprint": key.fingerprint.to_string(),
            "master": key.master.as_ref().map(|m| m.to_string()),
            "uids": key.uids,
            "version": key.version,
            "algorithm": key.algorithm,
            "bits": key.bits,
            "date": rfc3339(key.date),
            "revoked": key.revoked,
        })),
        "revocation": result.revocation.as_ref().map(|rev| json!({
            "fingerprint": rev.fingerprint.to_string(),
            "created": rev.created.map(rfc3339),
            "reason": rev.reason,
        })),
    })
}

/// Writes the whole run as a JSON document.
pub fn write_report(path: &Path, outcomes: &[EntryOutcome], ok: bool) -> Result<()> {
    let document = json!({
        "generated": rfc3339(SystemTime::now()),
        "ok": ok,
        "artifacts": outcomes.iter().map(outcome_json).collect::<Vec<_>>(),
    });
    let file = File::create(path)
        .with_context(|| format!("cannot create report file {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &document)
        .with_context(|| format!("cannot write report file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{SignatureCheckResult, SignatureStatus};
    use vouch_policy::ArtifactInfo;

    #[test]
    fn report_round_trips_as_json() {
        let artifact = ArtifactInfo::new("junit", "junit", "4.12");
        let outcome = EntryOutcome {
            result: SignatureCheckResult {
                artifact,
                status: SignatureStatus::SignatureNotResolved,
                key: None,
                key_show_url: None,
                signature: None,
                revocation: None,
                weak_hash: None,
                error: None,
            },
            accepted: true,
            failure: None,
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_report(&path, &[outcome], true).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["ok"], true);
        assert_eq!(parsed["artifacts"][0]["status"], "SIGNATURE_NOT_RESOLVED");
        assert_eq!(parsed["artifacts"][0]["artifact"], "junit:junit:jar:4.12");
    }
}
