//! The trust map itself: file loading and the queries the
//! verification pipeline asks.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};
use vouch_pgp::KeyInfo;

use crate::filter::{apply_filters, Filter};
use crate::item::KeyItems;
use crate::pattern::ArtifactPattern;
use crate::{ArtifactInfo, LineContext, PolicyError, Result};

/// Where to load a trust-map file from, and how to narrow it.
#[derive(Debug, Clone, Default)]
pub struct KeysMapLocationConfig {
    pub location: PathBuf,
    pub includes: Vec<Filter>,
    pub excludes: Vec<Filter>,
}

impl KeysMapLocationConfig {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        KeysMapLocationConfig {
            location: location.into(),
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

/// One loaded trust-map entry.
#[derive(Debug, Clone)]
pub struct KeysMapEntry {
    pub pattern: ArtifactPattern,
    pub items: KeyItems,
    pub origin: LineContext,
}

/// The composed trust map.
///
/// Entries accrete across [`KeysMap::load`] calls in file order.
/// Matching unions every entry whose pattern covers the artifact;
/// insertion order matters only for diagnostics.
#[derive(Debug, Default)]
pub struct KeysMap {
    entries: Vec<KeysMapEntry>,
    relaxed_warned: AtomicBool,
}

impl KeysMap {
    pub fn new() -> Self {
        KeysMap::default()
    }

    /// Loads and appends one trust-map file.
    pub fn load(&mut self, config: &KeysMapLocationConfig) -> Result<()> {
        let file = config.location.display().to_string();
        let text = fs::read_to_string(&config.location).map_err(|source| {
            PolicyError::Io {
                file: file.clone(),
                source,
            }
        })?;
        self.load_str(&text, &file, &config.includes, &config.excludes)
    }

    /// Parses trust-map text.  `file` labels diagnostics.
    pub fn load_str(
        &mut self,
        text: &str,
        file: &str,
        includes: &[Filter],
        excludes: &[Filter],
    ) -> Result<()> {
        let raw: Vec<&str> = text.lines().collect();
        let mut i = 0;
        while i < raw.len() {
            let line_no = i + 1;
            let mut line = strip_comment(raw[i]).trim_end().to_string();
            // Backslash continuation: splice the next line, leading
            // whitespace stripped.
            while line.ends_with('\\') && i + 1 < raw.len() {
                line.pop();
                i += 1;
                line.push_str(strip_comment(raw[i]).trim_end().trim_start());
            }
            if line.ends_with('\\') {
                line.pop();
            }
            i += 1;

            let content = line.trim();
            if content.is_empty() {
                continue;
            }
            let (lhs, rhs) = content.split_once('=').ok_or_else(|| {
                PolicyError::MalformedLine {
                    file: file.to_string(),
                    line: line_no,
                    content: content.to_string(),
                }
            })?;

            let origin = LineContext {
                file: file.to_string(),
                line: line_no,
            };
            let pattern = ArtifactPattern::parse(lhs).map_err(|cause| {
                PolicyError::Entry {
                    file: file.to_string(),
                    line: line_no,
                    content: content.to_string(),
                    cause: Box::new(cause),
                }
            })?;
            let items = KeyItems::parse(rhs, &origin)?;
            let items = apply_filters(items, pattern.source(), includes, excludes);
            self.insert(pattern, items, origin);
        }
        Ok(())
    }

    fn insert(&mut self, pattern: ArtifactPattern, items: KeyItems, origin: LineContext) {
        match self
            .entries
            .iter()
            .position(|entry| entry.pattern == pattern)
        {
            Some(idx) => {
                let existing = &mut self.entries[idx];
                debug!(
                    pattern = %pattern,
                    first = %existing.origin,
                    second = %origin,
                    "merging entries with identical artifact pattern"
                );
                existing.items.merge(items, Some(&origin));
            }
            None => self.entries.push(KeysMapEntry {
                pattern,
                items,
                origin,
            }),
        }
    }

    /// Number of entries that can still match something (entries
    /// emptied out by exclude filters don't count).
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.items.is_empty())
            .count()
    }

    /// True when nothing was loaded at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[KeysMapEntry] {
        &self.entries
    }

    fn matching<'a>(
        &'a self,
        artifact: &'a ArtifactInfo,
    ) -> impl Iterator<Item = &'a KeysMapEntry> {
        self.entries
            .iter()
            .filter(|entry| !entry.items.is_empty() && entry.pattern.matches(artifact))
    }

    /// Whether `key` may sign `artifact`.
    ///
    /// All matching entries are unioned; an empty map accepts any key
    /// and warns once that trust checking is relaxed.
    pub fn is_valid_key(&self, artifact: &ArtifactInfo, key: &KeyInfo) -> bool {
        if self.entries.is_empty() {
            if !self.relaxed_warned.swap(true, Ordering::Relaxed) {
                warn!("keys map is empty - trust checks are fully relaxed");
            }
            return true;
        }
        let mut combined = KeyItems::default();
        for entry in self.matching(artifact) {
            combined.union_silent(&entry.items);
        }
        !combined.is_empty() && combined.is_key_match(key)
    }

    /// Whether `artifact` may be unsigned.
    pub fn is_no_signature(&self, artifact: &ArtifactInfo) -> bool {
        self.matching(artifact).any(|e| e.items.is_no_signature())
    }

    /// Whether `artifact` tolerates a cryptographically broken
    /// signature.
    pub fn is_broken_signature(&self, artifact: &ArtifactInfo) -> bool {
        self.matching(artifact).any(|e| e.items.is_broken_signature())
    }

    /// Whether `artifact` tolerates its signing key being absent from
    /// the key servers.
    pub fn is_key_missing(&self, artifact: &ArtifactInfo) -> bool {
        self.matching(artifact).any(|e| e.items.is_key_missing())
    }

    /// Whether some matching entry names a concrete key.
    pub fn is_with_key(&self, artifact: &ArtifactInfo) -> bool {
        self.matching(artifact).any(|e| e.items.is_with_key())
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}
