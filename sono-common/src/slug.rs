//! Machine key derivation for protocols and taxonomy nodes
//!
//! Keys are derived from display names so the same name always yields the
//! same key: trim, lowercase, whitespace runs to `_`, diacritics stripped,
//! everything outside `[a-z0-9_]` dropped.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Derive the machine key for a display name
///
/// Returns an empty string when nothing in `name` survives the filter;
/// callers treat that as invalid input.
///
/// ```
/// use sono_common::derive_key;
///
/// assert_eq!(derive_key("Lung US"), "lung_us");
/// assert_eq!(
///     derive_key("  Évaluation Protócol v2.1 (Revised)!  "),
///     "evaluation_protocol_v21_revised"
/// );
/// ```
pub fn derive_key(name: &str) -> String {
    let lowered = name.trim().to_lowercase();

    let mut collapsed = String::with_capacity(lowered.len());
    let mut in_whitespace = false;
    for c in lowered.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                collapsed.push('_');
            }
            in_whitespace = true;
        } else {
            collapsed.push(c);
            in_whitespace = false;
        }
    }

    collapsed
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// True when `key` is already in derived form
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reference_name() {
        assert_eq!(
            derive_key("  Évaluation Protócol v2.1 (Revised)!  "),
            "evaluation_protocol_v21_revised"
        );
    }

    #[test]
    fn test_simple_names() {
        assert_eq!(derive_key("Lung US"), "lung_us");
        assert_eq!(derive_key("FAST"), "fast");
        assert_eq!(derive_key("Cardiac   Window\t2"), "cardiac_window_2");
    }

    #[test]
    fn test_diacritics_stripped() {
        assert_eq!(derive_key("Pléural Épanchement"), "pleural_epanchement");
        assert_eq!(derive_key("Ñandú"), "nandu");
    }

    #[test]
    fn test_nothing_survives() {
        assert_eq!(derive_key("   "), "");
        assert_eq!(derive_key("!!!"), "");
        assert_eq!(derive_key("日本語"), "");
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("lung_us"));
        assert!(is_valid_key("a1"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("Lung"));
        assert!(!is_valid_key("lung-us"));
    }

    proptest! {
        #[test]
        fn prop_idempotent(name in "\\PC{0,40}") {
            let once = derive_key(&name);
            prop_assert_eq!(derive_key(&once), once);
        }

        #[test]
        fn prop_charset(name in "\\PC{0,40}") {
            let key = derive_key(&name);
            prop_assert!(key.is_empty() || is_valid_key(&key));
            prop_assert_eq!(key.to_lowercase(), key.clone());
        }

        #[test]
        fn prop_ascii_words_survive(words in proptest::collection::vec("[a-z0-9]{1,8}", 1..5)) {
            let name = words.join(" ");
            prop_assert_eq!(derive_key(&name), words.join("_"));
        }
    }
}
