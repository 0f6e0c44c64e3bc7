//! Answer contract.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Kind reported for answers produced by the graph pipeline.
pub const ANSWER_KIND: &str = "graphrag";

/// Text returned when the evidence cannot support an answer.
pub const INSUFFICIENT_INFORMATION: &str =
    "Les données du graphe ne contiennent pas suffisamment d'information pour répondre à cette question.";

/// The fixed response shape handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer_kind: String,
    pub answer_text: String,
    pub cited_source_ids: Vec<String>,
    pub source_document_label: String,
}

impl Answer {
    pub fn insufficient(source_document_label: &str) -> Self {
        Self {
            answer_kind: ANSWER_KIND.to_string(),
            answer_text: INSUFFICIENT_INFORMATION.to_string(),
            cited_source_ids: Vec::new(),
            source_document_label: source_document_label.to_string(),
        }
    }

    /// Plain-text rendering for terminals.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.answer_text.trim());
        let _ = writeln!(out);
        let _ = writeln!(out, "Source : {}", self.source_document_label);
        if !self.cited_source_ids.is_empty() {
            let _ = writeln!(out, "Références : {}", self.cited_source_ids.join(", "));
        }
        out
    }
}

/// How the caller wants the answer printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "txt" => Ok(Self::Text),
            other => Err(format!("unknown output format '{other}' (expected json or text)")),
        }
    }
}
