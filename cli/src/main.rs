use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vouch::check::{check_signature, SignatureStatus};
use vouch::cli::{parse_artifact_arg, CheckArgs, Cli, Command, ShowArgs};
use vouch::config::VerifierConfig;
use vouch::report::write_report;
use vouch::verify::{verify_artifacts, VerifyOptions};
use vouch_net::KeyServerClient;
use vouch_policy::{KeysMap, KeysMapLocationConfig};
use vouch_store::KeysCache;

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let outcome = match cli.command {
        Command::Check(args) => run_check(args),
        Command::Show(args) => run_show(args),
    };
    match outcome {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {:#}", error);
            ExitCode::from(2)
        }
    }
}

fn build_cache(config: &VerifierConfig) -> Result<KeysCache> {
    let client = if config.offline {
        None
    } else {
        Some(KeyServerClient::new(config.client_config())?)
    };
    Ok(KeysCache::new(config.cache_config(), client)?)
}

fn run_check(args: CheckArgs) -> Result<ExitCode> {
    let mut config = VerifierConfig::default();
    if let Some(path) = &args.config {
        config.merge_file(path)?;
    }
    if let Some(cache) = args.cache {
        config.cache_path = cache;
    }
    if !args.keyservers.is_empty() {
        config.keyservers = args.keyservers.clone();
    }
    config.load_balance |= args.load_balance;
    config.offline |= args.offline;
    config.fail_weak_signature |= args.fail_weak;
    for path in &args.keys_map {
        config
            .keys_map_locations
            .push(KeysMapLocationConfig::new(path));
    }

    let mut keys_map = KeysMap::new();
    for location in &config.keys_map_locations {
        keys_map.load(location)?;
    }

    let entries = args
        .artifacts
        .iter()
        .map(|spec| parse_artifact_arg(spec))
        .collect::<Result<Vec<_>>>()?;

    let cache = build_cache(&config)?;
    let options = VerifyOptions {
        fail_weak_signature: config.fail_weak_signature,
        jobs: args.jobs.unwrap_or(1).max(1),
    };

    let (outcomes, ok) = verify_artifacts(&entries, &cache, &keys_map, &options);

    for outcome in &outcomes {
        if outcome.accepted {
            if !args.quiet {
                println!(
                    "OK   {} [{}]",
                    outcome.result.artifact, outcome.result.status
                );
            }
        } else {
            eprintln!(
                "FAIL {}: {}",
                outcome.result.artifact,
                outcome.failure.as_deref().unwrap_or("rejected")
            );
        }
    }
    let failed = outcomes.iter().filter(|o| !o.accepted).count();
    if !args.quiet || failed > 0 {
        println!(
            "{} artifact(s) checked, {} failed",
            outcomes.len(),
            failed
        );
    }

    if let Some(report) = &args.report {
        write_report(report, &outcomes, ok)?;
    }

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn run_show(args: ShowArgs) -> Result<ExitCode> {
    let mut config = VerifierConfig::default();
    if let Some(path) = &args.config {
        config.merge_file(path)?;
    }
    if let Some(cache) = args.cache {
        config.cache_path = cache;
    }
    if !args.keyservers.is_empty() {
        config.keyservers = args.keyservers.clone();
    }
    config.offline |= args.offline;

    let (artifact, signature) = parse_artifact_arg(&args.artifact)?;
    let cache = build_cache(&config)?;
    let result = check_signature(&artifact, signature.as_deref(), &cache);

    println!("artifact:     {}", result.artifact);
    if let Some(path) = &result.artifact.resolved_path {
        println!("file:         {}", path.display());
    }
    println!("status:       {}", result.status);
    if let Some(sig) = &result.signature {
        println!("signature:    version {}, {} over {}", sig.version, sig.key_algorithm, sig.hash_algorithm);
        if let Some(created) = sig.created {
            println!("created:      {}", chrono::DateTime::<chrono::Utc>::from(created).to_rfc3339());
        }
        println!("issuer:       {}", sig.key_id);
    }
    if let Some(weak) = result.weak_hash {
        println!("weak hash:    {}", weak);
    }
    if let Some(key) = &result.key {
        println!("key:          {}", key.key_id_description());
        println!("algorithm:    {} ({} bits)", key.algorithm, key.bits);
        println!("key created:  {}", chrono::DateTime::<chrono::Utc>::from(key.date).to_rfc3339());
        for uid in &key.uids {
            println!("uid:          {}", uid);
        }
        if key.revoked {
            println!("revoked:      yes");
        }
    }
    if let Some(revocation) = &result.revocation {
        println!(
            "revocation:   {}{}",
            revocation.fingerprint,
            revocation
                .reason
                .as_deref()
                .map(|r| format!(" ({})", r))
                .unwrap_or_default()
        );
    }
    if let Some(url) = &result.key_show_url {
        println!("key page:     {}", url);
    }
    if let Some(error) = &result.error {
        println!("error:        {}", error);
    }

    let ok = matches!(
        result.status,
        SignatureStatus::SignatureValid | SignatureStatus::Resolved
    );
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
