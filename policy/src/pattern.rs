//! Artifact patterns on the left-hand side of trust-map entries.
//!
//! `group[:name[:type[:version]]]` — missing fields and `*` both mean
//! "any".  Group, name and type are case-insensitive globs where `*`
//! is the only metacharacter and `.` is literal; the version field is
//! a Maven version range.

use std::fmt;
use std::hash::{Hash, Hasher};

use regex::Regex;

use crate::version::{ArtifactVersion, VersionRange};
use crate::{ArtifactInfo, PolicyError, Result};

/// A parsed artifact pattern.
///
/// Equality and hashing go by the source string, so the same pattern
/// written twice merges regardless of how it compiled.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    source: String,
    group: Regex,
    name: Regex,
    kind: Regex,
    range: VersionRange,
}

impl ArtifactPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let source = pattern.trim();
        let structural = || PolicyError::InvalidArtifactDefinition {
            pattern: source.to_string(),
            cause: None,
        };
        if source.is_empty() {
            return Err(structural());
        }
        let fields: Vec<&str> = source.split(':').collect();
        if fields.len() > 4 {
            return Err(structural());
        }

        let group = compile_glob(fields[0]);
        let name = compile_glob(fields.get(1).copied().unwrap_or("*"));
        let kind = compile_glob(fields.get(2).copied().unwrap_or("*"));
        let range = VersionRange::parse(fields.get(3).copied().unwrap_or("*"))
            .map_err(|cause| PolicyError::InvalidArtifactDefinition {
                pattern: source.to_string(),
                cause: Some(Box::new(cause)),
            })?;

        Ok(ArtifactPattern {
            source: source.to_string(),
            group,
            name,
            kind,
            range,
        })
    }

    /// The pattern as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, artifact: &ArtifactInfo) -> bool {
        self.group.is_match(&artifact.group)
            && self.name.is_match(&artifact.name)
            && self.kind.is_match(&artifact.kind)
            && self
                .range
                .contains(&ArtifactVersion::new(&artifact.base_version()))
    }
}

/// `*` becomes `.*`, everything else is literal; anchored both ends,
/// case-insensitive.
fn compile_glob(field: &str) -> Regex {
    let field = field.trim();
    let mut pattern = String::from("(?i)^");
    if field.is_empty() || field == "*" {
        pattern.push_str(".*");
    } else {
        for c in field.chars() {
            if c == '*' {
                pattern.push_str(".*");
            } else {
                pattern.push_str(&regex::escape(&c.to_string()));
            }
        }
    }
    pattern.push('$');
    // The only variable parts are escaped literals and `.*`.
    Regex::new(&pattern).expect("glob compilation is infallible")
}

impl PartialEq for ArtifactPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for ArtifactPattern {}

impl Hash for ArtifactPattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl fmt::Display for ArtifactPattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.source)
    }
}
