//! On-disk cache of public key rings.
//!
//! The cache is content-addressed by long key id, fanned out over two
//! directory levels (`<root>/<HH>/<HH>/<16-hex>.asc`).  Negative
//! lookups leave a sibling `.404` marker whose mtime carries a TTL, so
//! repeated asks for a missing key stay off the network.  Installs go
//! through a temp file and an atomic rename: a reader never observes a
//! partially written ring.

use std::path::PathBuf;

use vouch_pgp::KeyId;

pub mod cache;

pub use cache::{CacheConfig, KeysCache};

/// Errors raised by the cache.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    /// Every configured server answered 404 (possibly remembered via
    /// a fresh negative marker).
    #[error("public key {0} was not found on the key servers")]
    KeyNotFound(KeyId),

    /// The key is not cached and the cache may not go to the network.
    #[error("key {0} is not cached and the cache is offline")]
    Offline(KeyId),

    /// The fetched or cached ring failed to parse or validate.
    #[error("unusable key ring for {key_id}")]
    Ring {
        key_id: KeyId,
        #[source]
        source: vouch_pgp::PgpError,
    },

    /// A network failure that is not "key not found".
    #[error(transparent)]
    Network(#[from] vouch_net::NetError),

    /// Filesystem trouble underneath the cache root.
    #[error("cache i/o error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, CacheError>;
