//! Candidate term extraction from a question.

use std::collections::HashSet;

use regex::Regex;

use crate::config::RetrievalSettings;
use crate::error::{GraphRagError, GraphRagResult};

const TRIM_CHARS: &[char] = &[' ', ',', ';', ':', '.', '(', ')', '[', ']', '{', '}', '?', '!', '"', '\'', '«', '»'];

/// Function words long enough to pass the length filter but useless for
/// matching entity labels.
const STOP_WORDS: &[&str] = &[
    "alors", "aussi", "avec", "cette", "ces", "chez", "comme", "comment", "dans", "depuis", "doit", "donc", "elle",
    "elles", "entre", "est-ce", "être", "faut", "leur", "leurs", "mais", "moins", "peut", "plus", "pour", "quand",
    "quel", "quelle", "quelles", "quels", "sans", "selon", "sont", "sous", "tous", "tout", "toute", "toutes", "vers",
];

/// Heuristic extraction of terms worth matching against entity labels.
///
/// Terms come, in order, from uppercase acronyms, the domain keyword list,
/// then every word of at least `min_word_len` letters together with its
/// singular form. Duplicates are dropped case-insensitively.
#[derive(Debug, Clone)]
pub struct CandidateExtractor {
    acronyms: Regex,
    keywords: Option<Regex>,
    words: Regex,
    min_word_len: usize,
    max_candidates: usize,
}

impl CandidateExtractor {
    pub fn new(settings: &RetrievalSettings) -> GraphRagResult<Self> {
        let acronyms = Regex::new(r"\b[A-Z]{2,}\b").map_err(|e| GraphRagError::config(e.to_string()))?;
        let words = Regex::new(r"[A-Za-zÀ-ÿ'\-]+").map_err(|e| GraphRagError::config(e.to_string()))?;

        let alternatives: Vec<String> = settings
            .domain_keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();
        let keywords = if alternatives.is_empty() {
            None
        } else {
            let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
            Some(Regex::new(&pattern).map_err(|e| GraphRagError::config(format!("domain keywords: {e}")))?)
        };

        Ok(Self {
            acronyms,
            keywords,
            words,
            min_word_len: settings.min_word_len,
            max_candidates: settings.max_candidates,
        })
    }

    pub fn extract(&self, question: &str) -> Vec<String> {
        let mut raw: Vec<String> = Vec::new();
        raw.extend(self.acronyms.find_iter(question).map(|m| m.as_str().to_string()));
        if let Some(keywords) = &self.keywords {
            raw.extend(keywords.find_iter(question).map(|m| m.as_str().to_string()));
        }
        for m in self.words.find_iter(question) {
            // Elided articles: "l'impôt" -> "impôt".
            let word = m.as_str().rsplit('\'').next().unwrap_or_default().trim_matches(TRIM_CHARS);
            if word.chars().count() < self.min_word_len || STOP_WORDS.contains(&word.to_lowercase().as_str()) {
                continue;
            }
            raw.push(word.to_string());
            if let Some(singular) = singular(word) {
                raw.push(singular);
            }
        }

        let mut seen = HashSet::new();
        raw.into_iter()
            .map(|t| t.trim_matches(TRIM_CHARS).to_string())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(t.to_lowercase()))
            .take(self.max_candidates)
            .collect()
    }
}

/// Drop a plural `s` or `x` from words long enough to carry one.
fn singular(word: &str) -> Option<String> {
    if word.chars().count() < 5 {
        return None;
    }
    let stripped = word.strip_suffix(['s', 'x', 'S', 'X'])?;
    Some(stripped.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> CandidateExtractor {
        CandidateExtractor::new(&RetrievalSettings::default()).unwrap()
    }

    #[test]
    fn test_acronyms_keywords_and_singulars() {
        let terms = extractor().extract("Quel est le taux de l'IR applicable aux salariés ?");
        assert_eq!(terms[0], "IR");
        assert!(terms.contains(&"salariés".to_string()));
        assert!(terms.contains(&"salarié".to_string()));
        assert!(terms.contains(&"taux".to_string()));
        assert!(!terms.iter().any(|t| t.eq_ignore_ascii_case("quel")));
    }

    #[test]
    fn test_dedup_is_case_insensitive() {
        let terms = extractor().extract("TVA tva Tva");
        assert_eq!(terms, vec!["TVA"]);
    }

    #[test]
    fn test_domain_keyword_accented() {
        let terms = extractor().extract("impôt dû");
        assert_eq!(terms, vec!["impôt"]);
    }

    #[test]
    fn test_cap() {
        // 40 distinct eligible words: "motaa", "motab", ... with no plural ending.
        let letters = b"abcdefghij";
        let words: Vec<String> = (0..40)
            .map(|i| format!("mot{}{}", letters[i / 10] as char, letters[i % 10] as char))
            .collect();
        let terms = extractor().extract(&words.join(" "));
        assert_eq!(terms.len(), 30);
        assert_eq!(terms[..], words[..30]);
    }

    #[test]
    fn test_no_candidates() {
        assert!(extractor().extract("a b c ?").is_empty());
    }
}
