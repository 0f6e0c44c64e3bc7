//! Lenient parsing of the model's answer.

use serde_json::{Map, Value};
use tracing::debug;

use super::model::{Answer, ANSWER_KIND};
use crate::json;

/// Turn raw model output into an [`Answer`]. Never fails: output that holds no
/// JSON object becomes the answer text with no citations.
///
/// Missing fields take defaults; empty citations are replaced with
/// `fallback_ids`.
pub fn parse_answer(raw: &str, source_document_label: &str, fallback_ids: &[String]) -> Answer {
    let mut answer = match json::parse_object(raw) {
        Ok(map) => from_map(&map, raw),
        Err(e) => {
            debug!(error = %e, "Answer was not JSON; using raw text");
            Answer {
                answer_kind: ANSWER_KIND.to_string(),
                answer_text: raw.trim().to_string(),
                cited_source_ids: Vec::new(),
                source_document_label: String::new(),
            }
        }
    };

    if answer.answer_kind.is_empty() {
        answer.answer_kind = ANSWER_KIND.to_string();
    }
    if answer.source_document_label.is_empty() {
        answer.source_document_label = source_document_label.to_string();
    }
    if answer.cited_source_ids.is_empty() {
        answer.cited_source_ids = fallback_ids.to_vec();
    }
    answer
}

fn from_map(map: &Map<String, Value>, raw: &str) -> Answer {
    let text = first_str(map, &["answer_text", "reponse_textuelle", "answer"]);
    Answer {
        answer_kind: first_str(map, &["answer_kind", "type_reponse"]),
        // An object without any answer text still carries the model's words.
        answer_text: if text.is_empty() { raw.trim().to_string() } else { text },
        cited_source_ids: ["cited_source_ids", "sources_citees", "communities_citees", "citations"]
            .iter()
            .map(|k| json::str_list_of(map, k))
            .find(|ids| !ids.is_empty())
            .unwrap_or_default(),
        source_document_label: first_str(map, &["source_document_label", "source_document"]),
    }
}

fn first_str(map: &Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .map(|k| json::str_of(map, k))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_well_formed_answer() {
        let raw = r#"{"answer_kind": "graphrag", "answer_text": "L'IR s'applique [Data: Sources (12)].", "cited_source_ids": ["12"], "source_document_label": "CGI 2025"}"#;
        let a = parse_answer(raw, "CGI", &ids(&["99"]));
        assert_eq!(a.cited_source_ids, vec!["12"]);
        assert_eq!(a.source_document_label, "CGI 2025");
    }

    #[test]
    fn test_fenced_answer_with_legacy_keys_and_numeric_ids() {
        let raw = "```json\n{\"type_reponse\": \"graphrag\", \"reponse_textuelle\": \"Oui.\", \"communities_citees\": [1, 2]}\n```";
        let a = parse_answer(raw, "CGI", &[]);
        assert_eq!(a.answer_text, "Oui.");
        assert_eq!(a.cited_source_ids, vec!["1", "2"]);
        assert_eq!(a.source_document_label, "CGI");
    }

    #[test]
    fn test_garbage_never_fails() {
        for raw in ["", "   ", "{", "}{", "[1,2]", "null", "texte libre sans JSON"] {
            let a = parse_answer(raw, "CGI", &ids(&["c1"]));
            assert_eq!(a.answer_kind, "graphrag");
            assert_eq!(a.source_document_label, "CGI");
            assert_eq!(a.cited_source_ids, vec!["c1"]);
        }
    }

    #[test]
    fn test_missing_citations_are_backfilled() {
        let a = parse_answer(r#"{"answer_text": "Réponse."}"#, "CGI", &ids(&["c12", "c40"]));
        assert_eq!(a.cited_source_ids, vec!["c12", "c40"]);
    }
}
