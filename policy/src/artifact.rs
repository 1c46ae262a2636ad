//! Artifact coordinates.

use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// Timestamped snapshot suffix, e.g. `1.0-20240101.120000-7`.
static UNIQUE_SNAPSHOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*)-(\d{8}\.\d{6})-(\d+)$").unwrap());

/// A unit of build output: `group:name:version` plus packaging type
/// and optional classifier.  `resolved_path` is where the artifact's
/// bytes live, when they were resolved at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactInfo {
    pub group: String,
    pub name: String,
    pub version: String,
    pub kind: String,
    pub classifier: Option<String>,
    pub resolved_path: Option<PathBuf>,
}

impl ArtifactInfo {
    pub fn new(group: &str, name: &str, version: &str) -> Self {
        ArtifactInfo {
            group: group.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            kind: "jar".to_string(),
            classifier: None,
            resolved_path: None,
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    pub fn with_classifier(mut self, classifier: &str) -> Self {
        self.classifier = Some(classifier.to_string());
        self
    }

    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.resolved_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// The version with unique-snapshot timestamps folded back to
    /// `-SNAPSHOT`.  Trust-map matching always uses this form.
    pub fn base_version(&self) -> String {
        match UNIQUE_SNAPSHOT.captures(&self.version) {
            Some(caps) => format!("{}-SNAPSHOT", &caps[1]),
            None => self.version.clone(),
        }
    }

    /// Whether the artifact's bytes are available on disk.
    pub fn is_resolved(&self) -> bool {
        self.resolved_path.is_some()
    }
}

impl fmt::Display for ArtifactInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.kind)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        write!(f, ":{}", self.version)
    }
}
