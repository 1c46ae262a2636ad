//! Include/exclude filters applied when loading a trust-map file.

use regex::Regex;

use crate::item::{KeyItem, KeyItems};

/// A filter over `(entry pattern, key item)` pairs.
///
/// `pattern` is matched against the entry's source pattern, `value`
/// against the serialized form of an item; a missing field matches
/// anything, and both present fields must match (conjunctive within a
/// filter).
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub pattern: Option<Regex>,
    pub value: Option<String>,
}

impl Filter {
    pub fn matches(&self, pattern_source: &str, item: &KeyItem) -> bool {
        let pattern_ok = self
            .pattern
            .as_ref()
            .map_or(true, |re| re.is_match(pattern_source));
        let value_ok = match &self.value {
            None => true,
            // `ANY` keeps everything; it exists so an includes list
            // can be written down without narrowing.
            Some(v) if v.eq_ignore_ascii_case("any") => true,
            Some(v) => item.to_string().eq_ignore_ascii_case(v),
        };
        pattern_ok && value_ok
    }
}

/// Applies `includes` (disjunctive across filters; empty list keeps
/// all) and then `excludes` to one entry's items.
pub fn apply_filters(
    items: KeyItems,
    pattern_source: &str,
    includes: &[Filter],
    excludes: &[Filter],
) -> KeyItems {
    let mut filtered = items;
    filtered.retain(|item| {
        let included = includes.is_empty()
            || includes.iter().any(|f| f.matches(pattern_source, item));
        let excluded = excludes.iter().any(|f| f.matches(pattern_source, item));
        included && !excluded
    });
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LineContext;

    fn ctx() -> LineContext {
        LineContext {
            file: "test".to_string(),
            line: 1,
        }
    }

    fn items(value: &str) -> KeyItems {
        KeyItems::parse(value, &ctx()).unwrap()
    }

    #[test]
    fn empty_includes_keep_everything() {
        let kept = apply_filters(items("noSig, 0xAABBCCDDEEFF0011"), "g:n", &[], &[]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn include_by_value() {
        let includes = vec![Filter {
            pattern: None,
            value: Some("noSig".to_string()),
        }];
        let kept = apply_filters(
            items("noSig, 0xAABBCCDDEEFF0011"),
            "g:n",
            &includes,
            &[],
        );
        assert_eq!(kept.len(), 1);
        assert!(kept.is_no_signature());
    }

    #[test]
    fn exclude_by_pattern_and_value() {
        let excludes = vec![Filter {
            pattern: Some(Regex::new(r".*:test2").unwrap()),
            value: Some("noSig".to_string()),
        }];
        // Pattern matches: the noSig item goes.
        let kept = apply_filters(items("noSig, *"), "noSig:test2", &[], &excludes);
        assert_eq!(kept.len(), 1);
        assert!(!kept.is_no_signature());
        // Pattern does not match: nothing goes.
        let kept = apply_filters(items("noSig, *"), "noSig:test1", &[], &excludes);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn any_include_is_a_noop() {
        let includes = vec![Filter {
            pattern: None,
            value: Some("ANY".to_string()),
        }];
        let kept = apply_filters(items("noSig, 0xAABBCCDDEEFF0011"), "g:n", &includes, &[]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn exclude_can_empty_an_entry() {
        let excludes = vec![Filter {
            pattern: None,
            value: Some("noSig".to_string()),
        }];
        let kept = apply_filters(items("noSig"), "g:n", &[], &excludes);
        assert!(kept.is_empty());
    }
}
