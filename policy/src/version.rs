//! Maven-style version ordering and ranges.
//!
//! Versions order the way Maven's `ComparableVersion` orders them:
//! dot- and dash-separated numeric and qualifier tokens, with the
//! qualifier ladder `alpha < beta < milestone < rc < snapshot <
//! (release) < sp` and unknown qualifiers after all of those,
//! lexically.  `1`, `1.0` and `1.0-ga` are all the same version.
//!
//! Ranges use Maven syntax: a bare version is an exact requirement,
//! `[1.0,2.0)`, `(,1.5]` and friends are interval sets, `*` or an
//! empty field accepts anything.  A `*` anywhere else is invalid.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::{PolicyError, Result};

/// One token of a parsed version.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Int(u64),
    Qualifier(String),
    List(Vec<Item>),
}

/// Qualifiers in ascending order; the empty string is the release.
const QUALIFIERS: [&str; 7] = ["alpha", "beta", "milestone", "rc", "snapshot", "", "sp"];

fn qualifier_rank(q: &str) -> (usize, &str) {
    match QUALIFIERS.iter().position(|known| *known == q) {
        Some(i) => (i, ""),
        // Unknown qualifiers sort after every known one, lexically
        // among themselves.
        None => (QUALIFIERS.len(), q),
    }
}

fn cmp_qualifiers(a: &str, b: &str) -> Ordering {
    qualifier_rank(a).cmp(&qualifier_rank(b))
}

impl Item {
    /// Whether this item is indistinguishable from "nothing here":
    /// a zero, a release-equivalent qualifier, or an empty list.
    fn is_null(&self) -> bool {
        match self {
            Item::Int(n) => *n == 0,
            Item::Qualifier(q) => cmp_qualifiers(q, "") == Ordering::Equal,
            Item::List(items) => items.is_empty(),
        }
    }
}

fn cmp_items(a: Option<&Item>, b: Option<&Item>) -> Ordering {
    use Item::*;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => cmp_items(b, a).reverse(),
        (Some(Int(n)), None) => {
            if *n == 0 {
                Ordering::Equal
            } else {
                Ordering::Greater
            }
        }
        (Some(Qualifier(q)), None) => cmp_qualifiers(q, ""),
        (Some(List(items)), None) => {
            for item in items {
                let ord = cmp_items(Some(item), None);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        (Some(Int(x)), Some(Int(y))) => x.cmp(y),
        // Numbers beat qualifiers and dash-lists: 1.0.1 > 1.0-alpha.
        (Some(Int(_)), Some(_)) => Ordering::Greater,
        (Some(Qualifier(_)), Some(Int(_))) => Ordering::Less,
        (Some(Qualifier(x)), Some(Qualifier(y))) => cmp_qualifiers(x, y),
        (Some(Qualifier(_)), Some(List(_))) => Ordering::Less,
        (Some(List(_)), Some(Int(_))) => Ordering::Less,
        // 1.0-1 > 1.0-alpha.
        (Some(List(_)), Some(Qualifier(_))) => Ordering::Greater,
        (Some(List(x)), Some(List(y))) => cmp_lists(x, y),
    }
}

fn cmp_lists(a: &[Item], b: &[Item]) -> Ordering {
    for i in 0..a.len().max(b.len()) {
        let ord = cmp_items(a.get(i), b.get(i));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Removes trailing null items; null items directly in front of a
/// trailing sub-list go too, so `1.0-alpha` equals `1-alpha`.
fn normalize(items: &mut Vec<Item>) {
    let mut i = items.len();
    while i > 0 {
        i -= 1;
        if items[i].is_null() {
            items.remove(i);
        } else if !matches!(items[i], Item::List(_)) {
            break;
        }
    }
}

fn make_item(is_digit: bool, text: &str, followed_by_digit: bool) -> Item {
    if text.is_empty() {
        return Item::Int(0);
    }
    if is_digit {
        return Item::Int(text.parse().unwrap_or(u64::MAX));
    }
    // Single-letter shorthands only count when a digit follows:
    // 1.0a1 is 1.0-alpha-1, but 1.0a is the qualifier "a".
    let expanded = if followed_by_digit && text.len() == 1 {
        match text {
            "a" => "alpha",
            "b" => "beta",
            "m" => "milestone",
            other => other,
        }
    } else {
        text
    };
    let aliased = match expanded {
        "ga" | "final" | "release" => "",
        "cr" => "rc",
        other => other,
    };
    Item::Qualifier(aliased.to_string())
}

/// A version ordered by Maven rules.
#[derive(Debug, Clone)]
pub struct ArtifactVersion {
    raw: String,
    items: Vec<Item>,
}

impl ArtifactVersion {
    pub fn new(version: &str) -> Self {
        ArtifactVersion {
            raw: version.to_string(),
            items: parse_version(version),
        }
    }

    /// The version string as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Parses into the nested item structure: every dash (explicit, or
/// implicit at a digit/letter boundary) opens a sub-list holding the
/// remainder at that level.
fn parse_version(version: &str) -> Vec<Item> {
    // Arena of partially built lists; children refer to parents by
    // insertion, so ownership stays simple while building.
    enum Slot {
        Leaf(Item),
        Child(usize),
    }
    let lowered = version.trim().to_ascii_lowercase();
    let bytes = lowered.as_bytes();

    let mut arena: Vec<Vec<Slot>> = vec![Vec::new()];
    let mut current = 0usize;
    let mut is_digit = false;
    let mut start = 0usize;

    let open_child = |arena: &mut Vec<Vec<Slot>>, current: &mut usize| {
        arena.push(Vec::new());
        let idx = arena.len() - 1;
        arena[*current].push(Slot::Child(idx));
        *current = idx;
    };

    for (i, &c) in bytes.iter().enumerate() {
        match c {
            b'.' => {
                let item = make_item(is_digit, &lowered[start..i], false);
                arena[current].push(Slot::Leaf(item));
                start = i + 1;
            }
            b'-' => {
                let item = make_item(is_digit, &lowered[start..i], false);
                arena[current].push(Slot::Leaf(item));
                start = i + 1;
                open_child(&mut arena, &mut current);
            }
            c if c.is_ascii_digit() => {
                if !is_digit && i > start {
                    let item = make_item(false, &lowered[start..i], true);
                    arena[current].push(Slot::Leaf(item));
                    start = i;
                    open_child(&mut arena, &mut current);
                }
                is_digit = true;
            }
            _ => {
                if is_digit && i > start {
                    let item = make_item(true, &lowered[start..i], false);
                    arena[current].push(Slot::Leaf(item));
                    start = i;
                    open_child(&mut arena, &mut current);
                }
                is_digit = false;
            }
        }
    }
    if lowered.len() > start {
        let item = make_item(is_digit, &lowered[start..], false);
        arena[current].push(Slot::Leaf(item));
    }

    fn build(arena: &[Vec<Slot>], idx: usize) -> Vec<Item> {
        let mut out: Vec<Item> = arena[idx]
            .iter()
            .map(|slot| match slot {
                Slot::Leaf(item) => item.clone(),
                Slot::Child(child) => Item::List(build(arena, *child)),
            })
            .collect();
        normalize(&mut out);
        out
    }
    build(&arena, 0)
}

impl PartialEq for ArtifactVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ArtifactVersion {}

impl PartialOrd for ArtifactVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArtifactVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_lists(&self.items, &other.items)
    }
}

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ArtifactVersion {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(ArtifactVersion::new(s))
    }
}

/// One interval of a version range.
#[derive(Debug, Clone)]
pub struct Restriction {
    lower: Option<ArtifactVersion>,
    lower_inclusive: bool,
    upper: Option<ArtifactVersion>,
    upper_inclusive: bool,
}

impl Restriction {
    fn contains(&self, version: &ArtifactVersion) -> bool {
        if let Some(lower) = &self.lower {
            match version.cmp(lower) {
                Ordering::Less => return false,
                Ordering::Equal if !self.lower_inclusive => return false,
                _ => {}
            }
        }
        if let Some(upper) = &self.upper {
            match version.cmp(upper) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.upper_inclusive => return false,
                _ => {}
            }
        }
        true
    }
}

/// A parsed version requirement.
#[derive(Debug, Clone)]
pub enum VersionRange {
    /// `*` or empty: anything goes.
    Any,
    /// A bare version: exact match.
    Exact(ArtifactVersion),
    /// One or more bracketed intervals.
    Restrictions { source: String, set: Vec<Restriction> },
}

impl VersionRange {
    pub fn parse(spec: &str) -> Result<Self> {
        let s = spec.trim();
        if s.is_empty() || s == "*" {
            return Ok(VersionRange::Any);
        }
        if s.contains('*') {
            return Err(PolicyError::InvalidVersionRange(s.to_string()));
        }
        if !s.starts_with('[') && !s.starts_with('(') {
            return Ok(VersionRange::Exact(ArtifactVersion::new(s)));
        }

        let invalid = || PolicyError::InvalidVersionRange(s.to_string());
        let mut set = Vec::new();
        let mut rest = s;
        loop {
            let lower_inclusive = match rest.as_bytes().first() {
                Some(b'[') => true,
                Some(b'(') => false,
                _ => return Err(invalid()),
            };
            let close = rest.find([']', ')']).ok_or_else(invalid)?;
            let upper_inclusive = rest.as_bytes()[close] == b']';
            let body = &rest[1..close];
            set.push(parse_restriction(
                body,
                lower_inclusive,
                upper_inclusive,
                invalid,
            )?);
            rest = &rest[close + 1..];
            if rest.is_empty() {
                break;
            }
            rest = rest.strip_prefix(',').ok_or_else(invalid)?;
            if !rest.starts_with('[') && !rest.starts_with('(') {
                return Err(invalid());
            }
        }
        Ok(VersionRange::Restrictions {
            source: s.to_string(),
            set,
        })
    }

    pub fn contains(&self, version: &ArtifactVersion) -> bool {
        match self {
            VersionRange::Any => true,
            VersionRange::Exact(exact) => exact == version,
            VersionRange::Restrictions { set, .. } => {
                set.iter().any(|r| r.contains(version))
            }
        }
    }
}

fn parse_restriction(
    body: &str,
    lower_inclusive: bool,
    upper_inclusive: bool,
    invalid: impl Fn() -> PolicyError,
) -> Result<Restriction> {
    match body.find(',') {
        None => {
            // A single version must be written [1.0]; (1.0) would be
            // the empty set.
            if body.trim().is_empty() || !(lower_inclusive && upper_inclusive) {
                return Err(invalid());
            }
            let exact = ArtifactVersion::new(body);
            Ok(Restriction {
                lower: Some(exact.clone()),
                lower_inclusive: true,
                upper: Some(exact),
                upper_inclusive: true,
            })
        }
        Some(idx) => {
            let (lo, hi) = body.split_at(idx);
            let hi = &hi[1..];
            if hi.contains(',') {
                return Err(invalid());
            }
            let lower = match lo.trim() {
                "" => None,
                v => Some(ArtifactVersion::new(v)),
            };
            let upper = match hi.trim() {
                "" => None,
                v => Some(ArtifactVersion::new(v)),
            };
            if let (Some(l), Some(u)) = (&lower, &upper) {
                if l > u {
                    return Err(invalid());
                }
            }
            Ok(Restriction {
                lower,
                lower_inclusive,
                upper,
                upper_inclusive,
            })
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VersionRange::Any => f.write_str("*"),
            VersionRange::Exact(v) => v.fmt(f),
            VersionRange::Restrictions { source, .. } => f.write_str(source),
        }
    }
}
