//! The trust map: policy binding artifact coordinates to the keys
//! allowed to sign them.
//!
//! A trust map is a line-oriented text file mapping artifact patterns
//! (`group[:name[:type[:version]]]`, `*`-globs, Maven version ranges)
//! to sets of key items: fingerprints, `*`/`any`, the special verdicts
//! `noSig`, `noKey` and `badSig`, and `!`-negated forms of all of
//! these.  Several files compose into one [`KeysMap`], optionally
//! narrowed by include/exclude [`filter::Filter`]s per file.

use std::fmt;

pub mod artifact;
pub mod filter;
pub mod item;
pub mod map;
pub mod pattern;
pub mod version;

pub use artifact::ArtifactInfo;
pub use filter::Filter;
pub use item::{KeyItem, KeyItems};
pub use map::{KeysMap, KeysMapEntry, KeysMapLocationConfig};
pub use pattern::ArtifactPattern;
pub use version::{ArtifactVersion, VersionRange};

/// Where in a trust-map file something was read from, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineContext {
    pub file: String,
    pub line: usize,
}

impl fmt::Display for LineContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "keysMap: {}:{}", self.file, self.line)
    }
}

/// Errors produced while loading or evaluating a trust map.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PolicyError {
    /// An artifact pattern could not be parsed.
    #[error("Invalid artifact definition: {pattern}")]
    InvalidArtifactDefinition {
        pattern: String,
        #[source]
        cause: Option<Box<PolicyError>>,
    },

    /// A version field is not a valid Maven version range.
    #[error("Invalid maven version range: {0}")]
    InvalidVersionRange(String),

    /// A key item token is none of the accepted forms.
    #[error("invalid keyItem {token:?} - accepted are: 0x<hex>, *, any, \
             noSig, noKey, badSig, and their !-negated forms ({location})")]
    InvalidKeyId { token: String, location: LineContext },

    /// A literal `null` token in a key item list.
    #[error("null keyItem is not allowed ({location})")]
    NullNotAllowed { location: LineContext },

    /// A fingerprint token was rejected (length bounds, odd hex, …).
    #[error("{cause} ({location})")]
    Key {
        #[source]
        cause: vouch_pgp::PgpError,
        location: LineContext,
    },

    /// A line is not `<pattern> = <keyitems>`.
    #[error("malformed keys map line {file}:{line}: {content:?}")]
    MalformedLine {
        file: String,
        line: usize,
        content: String,
    },

    /// A line parsed, but one of its halves did not.
    #[error("invalid keys map entry at {file}:{line}: {content:?}")]
    Entry {
        file: String,
        line: usize,
        content: String,
        #[source]
        cause: Box<PolicyError>,
    },

    /// The trust-map file could not be read.
    #[error("cannot read keys map {file}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, PolicyError>;
