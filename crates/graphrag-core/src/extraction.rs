//! Entity and relation extraction from text chunks.
//!
//! Each chunk goes through two completion calls: one listing the entities
//! it mentions, one listing relations among the confident ones. Results are
//! appended to a JSON-lines file, one record per chunk, and chunks already
//! present there are skipped on the next run.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ExtractionSettings;
use crate::error::{GraphRagError, GraphRagResult};
use crate::graph::ids;
use crate::json;
use crate::persist;
use crate::retry::RetryPolicy;
use crate::services::{CompletionRequest, CompletionService};

/// Entity types the extractor may assign.
pub const ENTITY_TYPES: &[&str] = &[
    "IMPOT",
    "PERSONNE",
    "REVENU",
    "TAUX",
    "DEDUCTION",
    "ABATTEMENT",
    "EXONERATION",
    "PROCEDURE",
    "DELAI",
    "SANCTION",
    "OBLIGATION",
    "DOCUMENT",
    "ADMINISTRATION",
    "ACTIVITE",
    "BASE_IMPOSABLE",
    "ASSIETTE",
    "RECOUVREMENT",
    "DECLARATION",
];

/// Relation vocabulary.
pub const RELATION_TYPES: &[&str] = &[
    "DEFINI_PAR",
    "APPLIQUE_A",
    "CONCERNE",
    "INCLUT",
    "EXONERE",
    "DEDUIT",
    "IMPOSE",
    "TAUX_DE",
    "CALCULE_SUR",
    "OBLIGE_A",
    "DECLARER",
    "PAYER",
    "DELAI_DE",
    "SANCTIONNE",
    "REFERENCE",
];

/// A unit of source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub article: Option<String>,
    pub text: String,
}

impl Chunk {
    /// Read a chunk record whose id may be a number or a string.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = match value.get("id").or_else(|| value.get("chunk_id"))? {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let text = value.get("text").and_then(Value::as_str)?.to_string();
        let title = value.get("title").and_then(Value::as_str).unwrap_or_default().to_string();
        let article = match value.get("article") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Some(Self { id, title, article, text })
    }
}

/// Load chunk records from a JSON array or JSON-lines file.
pub fn load_chunks(path: &Path) -> GraphRagResult<Vec<Chunk>> {
    let records = persist::read_records(path)?;
    let total = records.len();
    let chunks: Vec<Chunk> = records.iter().filter_map(Chunk::from_value).collect();
    if chunks.len() < total {
        warn!(skipped = total - chunks.len(), "Chunk records without id or text were skipped");
    }
    Ok(chunks)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub label: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub head: String,
    pub relation: String,
    pub tail: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub confidence: f64,
}

/// One line of the extraction output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub chunk_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub article: Option<String>,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
}

/// Counters for one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionReport {
    pub total: usize,
    pub skipped_done: usize,
    pub extracted: usize,
    pub failed: usize,
    pub entities: usize,
    pub relations: usize,
}

/// Runs the two-step extraction over chunks.
pub struct ExtractionPipeline {
    completion: Arc<dyn CompletionService>,
    settings: ExtractionSettings,
    retry: RetryPolicy,
}

impl ExtractionPipeline {
    pub fn new(completion: Arc<dyn CompletionService>, settings: ExtractionSettings, retry: RetryPolicy) -> Self {
        Self {
            completion,
            settings,
            retry,
        }
    }

    /// Extract every chunk not yet present in `out_path`, appending one
    /// record per chunk. A failing chunk is logged and counted.
    pub async fn run(
        &self,
        chunks: &[Chunk],
        out_path: &Path,
        mut on_done: impl FnMut(&str, bool),
    ) -> GraphRagResult<ExtractionReport> {
        let done = completed_chunk_ids(out_path)?;
        let pending: Vec<&Chunk> = chunks.iter().filter(|c| !done.contains(&c.id)).collect();

        let mut report = ExtractionReport {
            total: chunks.len(),
            skipped_done: chunks.len() - pending.len(),
            ..ExtractionReport::default()
        };
        info!(pending = pending.len(), skipped = report.skipped_done, "Extracting chunks");

        let mut results = stream::iter(pending)
            .map(|chunk| async move { (chunk, self.extract(chunk).await) })
            .buffer_unordered(self.settings.concurrency.max(1));

        while let Some((chunk, result)) = results.next().await {
            match result {
                Ok(record) => {
                    report.extracted += 1;
                    report.entities += record.entities.len();
                    report.relations += record.relations.len();
                    persist::append_jsonl(out_path, &record)?;
                    on_done(&chunk.id, true);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(chunk = %chunk.id, error = %e, "Chunk extraction failed");
                    on_done(&chunk.id, false);
                }
            }
        }

        info!(
            extracted = report.extracted,
            failed = report.failed,
            entities = report.entities,
            relations = report.relations,
            "Extraction finished"
        );
        Ok(report)
    }

    /// Extract entities then relations for one chunk.
    pub async fn extract(&self, chunk: &Chunk) -> GraphRagResult<ExtractionRecord> {
        let entities = self.extract_entities(chunk).await?;

        let reliable: Vec<&ExtractedEntity> = entities
            .iter()
            .filter(|e| e.confidence >= self.settings.min_entity_confidence)
            .collect();
        let relations = if reliable.len() < 2 {
            debug!(chunk = %chunk.id, reliable = reliable.len(), "Too few confident entities for relations");
            Vec::new()
        } else {
            self.extract_relations(chunk, &reliable).await?
        };

        Ok(ExtractionRecord {
            chunk_id: chunk.id.clone(),
            title: chunk.title.clone(),
            article: chunk.article.clone(),
            entities,
            relations,
        })
    }

    async fn extract_entities(&self, chunk: &Chunk) -> GraphRagResult<Vec<ExtractedEntity>> {
        let request = CompletionRequest::new(ENTITY_SYSTEM, entity_prompt(chunk), 0.0);
        let raw = self
            .retry
            .run(&format!("entities chunk {}", chunk.id), || self.completion.complete(&request))
            .await?;
        let map = json::parse_object(&raw)?;
        Ok(parse_entities(map.get("entities")))
    }

    async fn extract_relations(
        &self,
        chunk: &Chunk,
        entities: &[&ExtractedEntity],
    ) -> GraphRagResult<Vec<ExtractedRelation>> {
        let listed = serde_json::to_string(entities)?;
        let request = CompletionRequest::new(RELATION_SYSTEM, relation_prompt(chunk, &listed), 0.0);
        let raw = self
            .retry
            .run(&format!("relations chunk {}", chunk.id), || self.completion.complete(&request))
            .await?;
        let map = json::parse_object(&raw)?;
        Ok(parse_relations(map.get("relations"), self.settings.max_evidence_words))
    }
}

/// Chunk ids already present in an extraction output file.
pub fn completed_chunk_ids(path: &Path) -> GraphRagResult<HashSet<String>> {
    Ok(persist::read_jsonl(path)?
        .iter()
        .filter_map(|v| match v.get("chunk_id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

/// Read extraction records back as raw JSON for the graph builder.
pub fn load_records(path: &Path) -> GraphRagResult<Vec<Value>> {
    if !path.exists() {
        return Err(GraphRagError::InputFormat(format!(
            "extraction output {} does not exist",
            path.display()
        )));
    }
    persist::read_jsonl(path)
}

const ENTITY_SYSTEM: &str = "Tu es un expert de la fiscalité marocaine. \
Tu identifies les entités juridiques et fiscales d'un extrait du Code Général des Impôts. \
Tu réponds uniquement par un objet JSON valide.";

const RELATION_SYSTEM: &str = "Tu es un expert de la fiscalité marocaine. \
Tu identifies les relations juridiques et fiscales entre entités d'un extrait du Code Général des Impôts. \
Tu réponds uniquement par un objet JSON valide.";

fn chunk_header(chunk: &Chunk) -> String {
    format!(
        "Extrait {id}\nTitre : {title}\nArticle : {article}\n\nTexte :\n{text}",
        id = chunk.id,
        title = chunk.title,
        article = chunk.article.as_deref().unwrap_or("-"),
        text = chunk.text,
    )
}

fn entity_prompt(chunk: &Chunk) -> String {
    format!(
        "{header}\n\n\
         Liste les entités juridiques ou fiscales importantes du texte, sans doublon. \
         Garde le libellé du texte ; mets les formes abrégées explicitement présentes en alias.\n\
         Pour chaque entité :\n\
         - \"label\" : libellé ;\n\
         - \"type\" : un type parmi {types} ;\n\
         - \"aliases\" : liste, éventuellement vide ;\n\
         - \"confidence\" : nombre entre 0 et 1.\n\n\
         Format attendu :\n\
         {{\"entities\": [{{\"label\": \"...\", \"type\": \"...\", \"aliases\": [], \"confidence\": 0.0}}]}}",
        header = chunk_header(chunk),
        types = ENTITY_TYPES.join(", "),
    )
}

fn relation_prompt(chunk: &Chunk, entities_json: &str) -> String {
    format!(
        "{header}\n\n\
         Entités déjà identifiées :\n{entities_json}\n\n\
         Donne seulement les relations explicites ou clairement implicites dans le texte, \
         entre entités de la liste, avec un type parmi {relations}.\n\
         Pour chaque relation :\n\
         - \"head\" : libellé de l'entité source ;\n\
         - \"relation\" : type ;\n\
         - \"tail\" : libellé de l'entité cible ;\n\
         - \"evidence\" : citation courte du texte, 25 mots au plus ;\n\
         - \"confidence\" : nombre entre 0 et 1.\n\n\
         Format attendu :\n\
         {{\"relations\": [{{\"head\": \"...\", \"relation\": \"...\", \"tail\": \"...\", \"evidence\": \"...\", \"confidence\": 0.0}}]}}",
        header = chunk_header(chunk),
        relations = RELATION_TYPES.join(", "),
    )
}

fn parse_entities(value: Option<&Value>) -> Vec<ExtractedEntity> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            let label = json::str_of(obj, "label");
            if label.is_empty() {
                return None;
            }
            let entity_type = ids::normalize_type(&json::str_of(obj, "type"));
            if !seen.insert((ids::normalize_label(&label), entity_type.clone())) {
                return None;
            }
            Some(ExtractedEntity {
                label,
                entity_type,
                aliases: json::str_list_of(obj, "aliases"),
                confidence: confidence_of(obj.get("confidence")),
            })
        })
        .collect()
}

fn parse_relations(value: Option<&Value>, max_evidence_words: usize) -> Vec<ExtractedRelation> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            let head = json::str_of(obj, "head");
            let tail = json::str_of(obj, "tail");
            let relation = ids::normalize_relation(&json::str_of(obj, "relation"));
            if head.is_empty() || tail.is_empty() {
                return None;
            }
            if !RELATION_TYPES.contains(&relation.as_str()) {
                debug!(%relation, "Dropping relation outside the vocabulary");
                return None;
            }
            let evidence = json::str_of(obj, "evidence")
                .split_whitespace()
                .take(max_evidence_words)
                .collect::<Vec<_>>()
                .join(" ");
            Some(ExtractedRelation {
                head,
                relation,
                tail,
                evidence,
                confidence: confidence_of(obj.get("confidence")),
            })
        })
        .collect()
}

fn confidence_of(value: Option<&Value>) -> f64 {
    let c = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if c.is_finite() {
        c.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{graph_input_from_records, EntityGraphBuilder};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeExtractor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionService for FakeExtractor {
        fn model(&self) -> &str {
            "fake"
        }

        async fn complete(&self, request: &CompletionRequest) -> GraphRagResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.user.contains("Extrait broken") {
                return Ok("not json at all".to_string());
            }
            if request.system.contains("relations") {
                return Ok(json!({"relations": [
                    {"head": "IR", "relation": "applique a", "tail": "Salarié", "evidence": "l'IR s'applique aux salariés", "confidence": 0.9},
                    {"head": "IR", "relation": "INVENTE", "tail": "Salarié"}
                ]})
                .to_string());
            }
            Ok(json!({"entities": [
                {"label": "IR", "type": "impot", "aliases": ["Impôt sur le revenu"], "confidence": 0.95},
                {"label": "Salarié", "type": "PERSONNE", "confidence": "0.8"},
                {"label": "ir", "type": "IMPOT"},
                {"label": "Bruit", "type": "DOCUMENT", "confidence": 0.1}
            ]})
            .to_string())
        }
    }

    fn chunk(id: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            title: "Impôt sur le revenu".to_string(),
            article: Some("56".to_string()),
            text: "Sont soumis à l'IR les salariés.".to_string(),
        }
    }

    #[test]
    fn test_chunk_from_value_accepts_numeric_id() {
        let c = Chunk::from_value(&json!({"id": 3, "text": "x", "article": 12})).unwrap();
        assert_eq!(c.id, "3");
        assert_eq!(c.article.as_deref(), Some("12"));
        assert!(Chunk::from_value(&json!({"id": 3})).is_none());
    }

    #[test]
    fn test_evidence_is_truncated() {
        let long = (0..40).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let rels = parse_relations(
            Some(&json!([{"head": "A", "tail": "B", "relation": "CONCERNE", "evidence": long}])),
            25,
        );
        assert_eq!(rels[0].evidence.split_whitespace().count(), 25);
    }

    #[tokio::test]
    async fn test_run_appends_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("extraction.jsonl");
        let service = Arc::new(FakeExtractor {
            calls: AtomicUsize::new(0),
        });
        let pipeline = ExtractionPipeline::new(service.clone(), ExtractionSettings::default(), RetryPolicy::immediate(1));

        let chunks = vec![chunk("1"), chunk("broken"), chunk("2")];
        let report = pipeline.run(&chunks, &out, |_, _| {}).await.unwrap();
        assert_eq!(report.extracted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.relations, 2);

        let records = load_records(&out).unwrap();
        assert_eq!(records.len(), 2);
        let first: ExtractionRecord = serde_json::from_value(records[0].clone()).unwrap();
        assert_eq!(first.entities.len(), 3);
        assert_eq!(first.relations[0].relation, "APPLIQUE_A");

        let calls = service.calls.load(Ordering::SeqCst);
        let again = pipeline.run(&chunks, &out, |_, _| {}).await.unwrap();
        assert_eq!(again.skipped_done, 2);
        assert_eq!(service.calls.load(Ordering::SeqCst), calls + 1);

        // The records feed the graph builder directly.
        let (nodes, edges) = graph_input_from_records(&records);
        let mut builder = EntityGraphBuilder::new();
        builder.add_nodes(&nodes).add_edges(&edges);
        let graph = builder.build();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);
    }
}
