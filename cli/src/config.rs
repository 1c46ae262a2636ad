//! Verifier configuration.
//!
//! One [`VerifierConfig`] carries everything the core crates need; it
//! is materialized from CLI flags layered over an optional TOML file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use vouch_net::{ClientConfig, ProxyConfig};
use vouch_policy::{Filter, KeysMapLocationConfig};
use vouch_store::CacheConfig;

/// The fully resolved configuration.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub cache_path: PathBuf,
    pub keyservers: Vec<String>,
    pub load_balance: bool,
    pub not_found_ttl_hours: u64,
    pub offline: bool,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub fail_weak_signature: bool,
    pub proxy: Option<ProxyConfig>,
    pub keys_map_locations: Vec<KeysMapLocationConfig>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        VerifierConfig {
            cache_path: PathBuf::from("pgp-keys-cache"),
            keyservers: vec!["hkps://keyserver.ubuntu.com".to_string()],
            load_balance: false,
            not_found_ttl_hours: 24,
            offline: false,
            connect_timeout_secs: 5,
            read_timeout_secs: 20,
            fail_weak_signature: false,
            proxy: None,
            keys_map_locations: Vec::new(),
        }
    }
}

impl VerifierConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            servers: self.keyservers.clone(),
            load_balance: self.load_balance,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            proxy: self.proxy.clone(),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            root: self.cache_path.clone(),
            not_found_ttl: Duration::from_secs(self.not_found_ttl_hours * 60 * 60),
            offline: self.offline,
        }
    }

    /// Layers a TOML config file under the current values: only file
    /// keys that were set replace defaults.
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&text)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;

        if let Some(v) = file.cache_path {
            self.cache_path = v;
        }
        if let Some(v) = file.keyservers {
            self.keyservers = v;
        }
        if let Some(v) = file.load_balance {
            self.load_balance = v;
        }
        if let Some(v) = file.not_found_ttl_hours {
            self.not_found_ttl_hours = v;
        }
        if let Some(v) = file.offline {
            self.offline = v;
        }
        if let Some(v) = file.connect_timeout_secs {
            self.connect_timeout_secs = v;
        }
        if let Some(v) = file.read_timeout_secs {
            self.read_timeout_secs = v;
        }
        if let Some(v) = file.fail_weak_signature {
            self.fail_weak_signature = v;
        }
        if let Some(p) = file.proxy {
            self.proxy = Some(ProxyConfig {
                host: p.host,
                port: p.port,
                protocol: p.protocol.unwrap_or_else(|| "http".to_string()),
                non_proxy_hosts: p.non_proxy_hosts.unwrap_or_default(),
                username: p.username,
                password: p.password,
            });
        }
        for entry in file.keys_map.unwrap_or_default() {
            self.keys_map_locations.push(entry.into_location()?);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    cache_path: Option<PathBuf>,
    keyservers: Option<Vec<String>>,
    load_balance: Option<bool>,
    not_found_ttl_hours: Option<u64>,
    offline: Option<bool>,
    connect_timeout_secs: Option<u64>,
    read_timeout_secs: Option<u64>,
    fail_weak_signature: Option<bool>,
    proxy: Option<ProxyFile>,
    keys_map: Option<Vec<KeysMapFile>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProxyFile {
    host: String,
    port: u16,
    protocol: Option<String>,
    non_proxy_hosts: Option<Vec<String>>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeysMapFile {
    location: PathBuf,
    #[serde(default)]
    includes: Vec<FilterFile>,
    #[serde(default)]
    excludes: Vec<FilterFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterFile {
    pattern: Option<String>,
    value: Option<String>,
}

impl KeysMapFile {
    fn into_location(self) -> Result<KeysMapLocationConfig> {
        let compile = |filters: Vec<FilterFile>| -> Result<Vec<Filter>> {
            filters
                .into_iter()
                .map(|f| {
                    Ok(Filter {
                        pattern: f
                            .pattern
                            .map(|p| {
                                regex::Regex::new(&p).with_context(|| {
                                    format!("invalid keys map filter pattern {:?}", p)
                                })
                            })
                            .transpose()?,
                        value: f.value,
                    })
                })
                .collect()
        };
        Ok(KeysMapLocationConfig {
            location: self.location,
            includes: compile(self.includes)?,
            excludes: compile(self.excludes)?,
        })
    }
}
