//! Command-line interface.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use vouch_policy::ArtifactInfo;

/// Verify OpenPGP signatures of build artifacts against a trust map.
#[derive(Debug, Parser)]
#[command(name = "vouch", version, about)]
pub struct Cli {
    /// Log filter (tracing syntax, e.g. `info` or `vouch_net=debug`).
    #[arg(long, global = true, default_value = "warn")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Verify artifact signatures and check them against the trust map.
    Check(CheckArgs),
    /// Print signature and signing-key details for one artifact.
    Show(ShowArgs),
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Artifacts as `group:name:version[:type[:classifier]]=path`;
    /// the detached signature is looked for at `<path>.asc`.
    #[arg(required = true, value_name = "COORDS=PATH")]
    pub artifacts: Vec<String>,

    /// Trust-map file; may be given several times, later files accrete.
    #[arg(long = "keys-map", value_name = "FILE")]
    pub keys_map: Vec<PathBuf>,

    /// TOML config file (cache, key servers, proxy, keys-map locations).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Key ring cache directory.
    #[arg(long, value_name = "DIR")]
    pub cache: Option<PathBuf>,

    /// Key server URI (hkp/hkps/http/https); repeat for fallbacks.
    #[arg(long = "keyserver", value_name = "URI")]
    pub keyservers: Vec<String>,

    /// Rotate requests across all key servers.
    #[arg(long)]
    pub load_balance: bool,

    /// Never touch the network; only cached keys are available.
    #[arg(long)]
    pub offline: bool,

    /// Fail artifacts whose signature uses a weak hash algorithm.
    #[arg(long)]
    pub fail_weak: bool,

    /// Verify with this many parallel workers.
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Write a JSON report of the run.
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Only print failures and the summary.
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Artifact as `group:name:version[:type[:classifier]]=path`.
    #[arg(value_name = "COORDS=PATH")]
    pub artifact: String,

    /// TOML config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Key ring cache directory.
    #[arg(long, value_name = "DIR")]
    pub cache: Option<PathBuf>,

    /// Key server URI; repeat for fallbacks.
    #[arg(long = "keyserver", value_name = "URI")]
    pub keyservers: Vec<String>,

    /// Never touch the network.
    #[arg(long)]
    pub offline: bool,
}

/// Parses `group:name:version[:type[:classifier]]=path` and finds the
/// sibling `.asc` signature when it exists.
pub fn parse_artifact_arg(spec: &str) -> Result<(ArtifactInfo, Option<PathBuf>)> {
    let (coords, path) = spec
        .split_once('=')
        .with_context(|| format!("expected COORDS=PATH, got {:?}", spec))?;
    let fields: Vec<&str> = coords.split(':').collect();
    if !(3..=5).contains(&fields.len()) {
        bail!(
            "expected group:name:version[:type[:classifier]], got {:?}",
            coords
        );
    }

    let mut artifact = ArtifactInfo::new(fields[0], fields[1], fields[2]);
    if let Some(kind) = fields.get(3) {
        artifact = artifact.with_kind(kind);
    }
    if let Some(classifier) = fields.get(4) {
        artifact = artifact.with_classifier(classifier);
    }
    let path = PathBuf::from(path);
    if path.exists() {
        artifact = artifact.with_path(&path);
    }

    let mut sig = path.into_os_string();
    sig.push(".asc");
    let sig = PathBuf::from(sig);
    let signature = sig.exists().then_some(sig);

    Ok((artifact, signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_minimal_coordinates() {
        let (artifact, sig) = parse_artifact_arg("junit:junit:4.12=/no/such/file").unwrap();
        assert_eq!(artifact.group, "junit");
        assert_eq!(artifact.name, "junit");
        assert_eq!(artifact.version, "4.12");
        assert_eq!(artifact.kind, "jar");
        assert!(!artifact.is_resolved());
        assert!(sig.is_none());
    }

    #[test]
    fn parse_full_coordinates_and_finds_signature() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("widget.jar");
        std::fs::File::create(&jar)
            .unwrap()
            .write_all(b"bytes")
            .unwrap();
        std::fs::File::create(dir.path().join("widget.jar.asc")).unwrap();

        let spec = format!("org.example:widget:1.0:jar:sources={}", jar.display());
        let (artifact, sig) = parse_artifact_arg(&spec).unwrap();
        assert!(artifact.is_resolved());
        assert_eq!(artifact.classifier.as_deref(), Some("sources"));
        assert!(sig.is_some());
    }

    #[test]
    fn parse_rejects_bad_shapes() {
        assert!(parse_artifact_arg("junit:junit:4.12").is_err());
        assert!(parse_artifact_arg("junit:junit=x").is_err());
        assert!(parse_artifact_arg("a:b:c:d:e:f=x").is_err());
    }

    #[test]
    fn cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
