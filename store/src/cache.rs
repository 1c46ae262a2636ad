//! The keys cache proper.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, info};
use vouch_net::{KeyServerClient, NetError};
use vouch_pgp::{KeyId, KeyRing};

use crate::{CacheError, Result};

/// Cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache root directory; created if missing.
    pub root: PathBuf,
    /// How long a `.404` marker suppresses remote lookups.
    pub not_found_ttl: Duration,
    /// Never touch the network; only cached keys are available.
    pub offline: bool,
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CacheConfig {
            root: root.into(),
            not_found_ttl: Duration::from_secs(24 * 60 * 60),
            offline: false,
        }
    }
}

/// Process-wide key ring cache.
///
/// All methods take `&self`; the cache is safe to share across a
/// worker pool.  For one key id, at most one download is in flight at
/// a time; concurrent callers for the same key block on the per-key
/// lock and then observe the installed result.
pub struct KeysCache {
    root: PathBuf,
    not_found_ttl: Duration,
    offline: bool,
    client: Option<KeyServerClient>,
    inflight: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl KeysCache {
    /// Opens (and if needed creates) the cache.  `client` may be
    /// `None` for a cache that can only serve what is already on
    /// disk.
    pub fn new(config: CacheConfig, client: Option<KeyServerClient>) -> Result<Self> {
        fs::create_dir_all(&config.root).map_err(|source| CacheError::Io {
            path: config.root.clone(),
            source,
        })?;
        info!(root = %config.root.display(), offline = config.offline, "keys cache ready");
        Ok(KeysCache {
            root: config.root,
            not_found_ttl: config.not_found_ttl,
            offline: config.offline,
            client,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// The key server client behind this cache, if it has one.
    pub fn client(&self) -> Option<&KeyServerClient> {
        self.client.as_ref()
    }

    /// The on-disk location for `key_id`'s ring.
    pub fn ring_path(&self, key_id: &KeyId) -> PathBuf {
        let hex = format!("{:016X}", key_id.long_id());
        self.root
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{}.asc", hex))
    }

    /// Serves the ring for `key_id`, locally when possible.
    pub fn get_key_ring(&self, key_id: &KeyId) -> Result<KeyRing> {
        let path = self.ring_path(key_id);
        if path.exists() {
            return self.load_ring(&path, key_id);
        }
        if self.negative_is_fresh(&path)? {
            debug!(%key_id, "fresh negative cache entry");
            return Err(CacheError::KeyNotFound(key_id.clone()));
        }
        if self.offline {
            return Err(CacheError::Offline(key_id.clone()));
        }

        let lock = self.lock_for(key_id);
        let _guard = lock.lock().unwrap();

        // Someone else may have completed the download while this
        // caller waited on the lock.
        if path.exists() {
            return self.load_ring(&path, key_id);
        }
        if self.negative_is_fresh(&path)? {
            return Err(CacheError::KeyNotFound(key_id.clone()));
        }

        let client = self
            .client
            .as_ref()
            .ok_or_else(|| CacheError::Offline(key_id.clone()))?;
        match client.fetch(key_id) {
            Ok(bytes) => {
                // Validate before installing: a ring that fails its
                // sub-key binding checks never reaches the cache.
                let ring = KeyRing::from_bytes(&bytes).map_err(|source| {
                    CacheError::Ring {
                        key_id: key_id.clone(),
                        source,
                    }
                })?;
                self.install(&path, &bytes)?;
                debug!(%key_id, path = %path.display(), "key ring installed");
                Ok(ring)
            }
            Err(NetError::KeyNotFound) => {
                self.touch_negative(&path)?;
                Err(CacheError::KeyNotFound(key_id.clone()))
            }
            Err(error) => Err(CacheError::Network(error)),
        }
    }

    fn load_ring(&self, path: &Path, key_id: &KeyId) -> Result<KeyRing> {
        let file = File::open(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        KeyRing::from_reader(file).map_err(|source| CacheError::Ring {
            key_id: key_id.clone(),
            source,
        })
    }

    /// Writes `bytes` next to `path` and renames into place; the
    /// rename is atomic on the same filesystem, so readers see either
    /// nothing or the full ring.
    fn install(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let parent = path.parent().expect("cache paths always have a parent");
        fs::create_dir_all(parent).map_err(|source| CacheError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        let mut tmp =
            NamedTempFile::new_in(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        tmp.write_all(bytes).map_err(|source| CacheError::Io {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        tmp.persist(path).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        // A stale negative marker no longer applies.
        let _ = fs::remove_file(negative_path(path));
        Ok(())
    }

    /// Creates or refreshes the `.404` marker; its mtime is the
    /// not-found time, so the latest 404 wins.
    fn touch_negative(&self, path: &Path) -> Result<()> {
        let parent = path.parent().expect("cache paths always have a parent");
        fs::create_dir_all(parent).map_err(|source| CacheError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        let marker = negative_path(path);
        File::create(&marker).map_err(|source| CacheError::Io {
            path: marker.clone(),
            source,
        })?;
        Ok(())
    }

    fn negative_is_fresh(&self, path: &Path) -> Result<bool> {
        let marker = negative_path(path);
        match fs::metadata(&marker) {
            Ok(meta) => {
                let age = meta.modified().ok().and_then(|m| m.elapsed().ok());
                Ok(age.map_or(false, |age| age < self.not_found_ttl))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io {
                path: marker,
                source,
            }),
        }
    }

    fn lock_for(&self, key_id: &KeyId) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().unwrap();
        Arc::clone(
            inflight
                .entry(key_id.long_id())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

fn negative_path(ring_path: &Path) -> PathBuf {
    let mut name = ring_path.as_os_str().to_os_string();
    name.push(".404");
    PathBuf::from(name)
}
