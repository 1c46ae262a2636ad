//! Key items: the right-hand side of trust-map entries.

use std::fmt;

use tracing::warn;
use vouch_pgp::{KeyFingerprint, KeyInfo};

use crate::{LineContext, PolicyError, Result};

/// A single trust-map value.
#[derive(Debug, Clone)]
pub enum KeyItem {
    /// `*` / `any`: any key that verifies.
    Any,
    /// The artifact may be unsigned.
    NoSig,
    /// The signing key may be missing from the key servers.
    NoKey,
    /// The signature may fail cryptographic verification.
    BadSig,
    /// A concrete key, by fingerprint or long id.
    Fingerprint(KeyFingerprint),
    /// `!…`: explicitly withdraws the inner verdict.
    Negated(Box<KeyItem>),
}

impl KeyItem {
    /// Parses one comma-separated token.  Empty tokens are handled by
    /// the caller (they are deprecated shorthand, not an error).
    pub fn parse(token: &str, location: &LineContext) -> Result<Self> {
        let t = token.trim();
        if let Some(negated) = t.strip_prefix('!') {
            if negated.trim().is_empty() {
                return Err(PolicyError::InvalidKeyId {
                    token: t.to_string(),
                    location: location.clone(),
                });
            }
            return Ok(KeyItem::Negated(Box::new(Self::parse(negated, location)?)));
        }
        if t == "*" || t.eq_ignore_ascii_case("any") {
            return Ok(KeyItem::Any);
        }
        if t.eq_ignore_ascii_case("noSig") {
            return Ok(KeyItem::NoSig);
        }
        if t.eq_ignore_ascii_case("noKey") {
            return Ok(KeyItem::NoKey);
        }
        if t.eq_ignore_ascii_case("badSig") {
            return Ok(KeyItem::BadSig);
        }
        if t.eq_ignore_ascii_case("null") {
            return Err(PolicyError::NullNotAllowed {
                location: location.clone(),
            });
        }
        if t.starts_with("0x") || t.starts_with("0X") {
            let fingerprint =
                KeyFingerprint::parse(t).map_err(|cause| PolicyError::Key {
                    cause,
                    location: location.clone(),
                })?;
            return Ok(KeyItem::Fingerprint(fingerprint));
        }
        Err(PolicyError::InvalidKeyId {
            token: t.to_string(),
            location: location.clone(),
        })
    }
}

impl fmt::Display for KeyItem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyItem::Any => f.write_str("*"),
            KeyItem::NoSig => f.write_str("noSig"),
            KeyItem::NoKey => f.write_str("noKey"),
            KeyItem::BadSig => f.write_str("badSig"),
            KeyItem::Fingerprint(fp) => fp.fmt(f),
            KeyItem::Negated(inner) => write!(f, "!{}", inner),
        }
    }
}

/// Whether `fp` names `key` — its own fingerprint or, for sub-keys,
/// the primary's.
fn fingerprint_matches(fp: &KeyFingerprint, key: &KeyInfo) -> bool {
    *fp == key.fingerprint
        || key.master.as_ref().map_or(false, |master| fp == master)
}

/// An ordered, de-duplicated set of [`KeyItem`]s.
#[derive(Debug, Clone, Default)]
pub struct KeyItems {
    items: Vec<KeyItem>,
}

impl KeyItems {
    /// Parses a comma-separated item list.
    ///
    /// An empty token is deprecated shorthand for `noSig` and warns;
    /// so an empty right-hand side altogether means "may be unsigned".
    pub fn parse(value: &str, location: &LineContext) -> Result<Self> {
        let mut items = KeyItems::default();
        for token in value.split(',') {
            let t = token.trim();
            if t.is_empty() {
                warn!(
                    %location,
                    "deprecated empty keyItem, treated as noSig"
                );
                items.insert(KeyItem::NoSig, Some(location));
                continue;
            }
            items.insert(KeyItem::parse(t, location)?, Some(location));
        }
        Ok(items)
    }

    /// Adds an item, dropping duplicates.  A location makes the
    /// duplicate warning attributable.
    fn insert(&mut self, item: KeyItem, location: Option<&LineContext>) {
        let rendered = item.to_string();
        if self.items.iter().any(|existing| existing.to_string() == rendered) {
            if let Some(location) = location {
                warn!(%location, item = %rendered, "duplicate keyItem ignored");
            }
            return;
        }
        self.items.push(item);
    }

    /// Set-union with another item list, warning on duplicates.
    pub fn merge(&mut self, other: KeyItems, location: Option<&LineContext>) {
        for item in other.items {
            self.insert(item, location);
        }
    }

    /// Set-union without duplicate diagnostics, for combining entries
    /// at query time.
    pub fn union_silent(&mut self, other: &KeyItems) {
        for item in &other.items {
            self.insert(item.clone(), None);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[KeyItem] {
        &self.items
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&KeyItem) -> bool) {
        self.items.retain(|item| keep(item));
    }

    /// Whether `key` is acceptable under this item set.
    ///
    /// A negated fingerprint naming the key (or its primary) vetoes
    /// everything else; `*` accepts unless itself negated; otherwise a
    /// listed fingerprint must name the key or its primary.
    pub fn is_key_match(&self, key: &KeyInfo) -> bool {
        for item in &self.items {
            if let KeyItem::Negated(inner) = item {
                if let KeyItem::Fingerprint(fp) = inner.as_ref() {
                    if fingerprint_matches(fp, key) {
                        return false;
                    }
                }
            }
        }
        let any_negated = self
            .items
            .iter()
            .any(|i| matches!(i, KeyItem::Negated(inner) if matches!(**inner, KeyItem::Any)));
        if !any_negated && self.items.iter().any(|i| matches!(i, KeyItem::Any)) {
            return true;
        }
        self.items.iter().any(
            |i| matches!(i, KeyItem::Fingerprint(fp) if fingerprint_matches(fp, key)),
        )
    }

    pub fn is_no_signature(&self) -> bool {
        self.verdict(|i| matches!(i, KeyItem::NoSig))
    }

    pub fn is_key_missing(&self) -> bool {
        self.verdict(|i| matches!(i, KeyItem::NoKey))
    }

    pub fn is_broken_signature(&self) -> bool {
        self.verdict(|i| matches!(i, KeyItem::BadSig))
    }

    /// Whether a concrete key (or `*`) is named, as opposed to only
    /// special verdicts.
    pub fn is_with_key(&self) -> bool {
        self.items
            .iter()
            .any(|i| matches!(i, KeyItem::Fingerprint(_) | KeyItem::Any))
    }

    /// Present and not negated.
    fn verdict(&self, probe: impl Fn(&KeyItem) -> bool) -> bool {
        let present = self.items.iter().any(|i| probe(i));
        let negated = self
            .items
            .iter()
            .any(|i| matches!(i, KeyItem::Negated(inner) if probe(inner.as_ref())));
        present && !negated
    }
}

impl FromIterator<KeyItem> for KeyItems {
    fn from_iter<I: IntoIterator<Item = KeyItem>>(iter: I) -> Self {
        let mut items = KeyItems::default();
        for item in iter {
            items.insert(item, None);
        }
        items
    }
}

impl fmt::Display for KeyItems {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            item.fmt(f)?;
        }
        Ok(())
    }
}
