//! Text helpers shared by matching and prompting.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase and strip diacritics, so "Salarié" and "salarie" compare equal.
pub fn fold(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Collapse whitespace runs to single spaces and trim.
pub fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `text` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_strips_accents() {
        assert_eq!(fold("Salarié"), "salarie");
        assert_eq!(fold("IMPÔT"), "impot");
    }

    #[test]
    fn test_clean_and_truncate() {
        assert_eq!(clean("  a \n b  "), "a b");
        assert_eq!(truncate_chars("déjà", 2), "dé");
        assert_eq!(truncate_chars("ab", 5), "ab");
    }
}
