//! Canonical graph construction from raw extraction records.
//!
//! Extraction output is loosely shaped: labels may sit under `label` or
//! `name`, relations arrive as strings or lists, chunk ids as numbers or
//! strings. The builder absorbs all of that and emits deduplicated nodes and
//! edges. Records it cannot use are counted in the [`BuildReport`], never
//! treated as errors.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::ids;
use super::model::{Edge, Node};

/// Counters describing one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub nodes_in: usize,
    pub nodes_out: usize,
    pub nodes_skipped: usize,
    pub nodes_merged: usize,
    pub edges_in: usize,
    pub edges_out: usize,
    pub edges_skipped_missing_endpoint: usize,
    pub edges_skipped_malformed: usize,
    pub edges_merged: usize,
}

/// Deduplicated nodes and edges plus the build report.
#[derive(Debug, Clone, Default)]
pub struct BuiltGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub report: BuildReport,
}

/// Normalizes extracted mentions into canonical nodes and edges.
#[derive(Debug, Default)]
pub struct EntityGraphBuilder {
    nodes: Vec<Node>,
    node_index: HashMap<String, usize>,
    label_to_id: HashMap<String, String>,
    edges: Vec<Edge>,
    edge_index: HashMap<String, usize>,
    report: BuildReport,
}

impl EntityGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register raw node records. Call before [`Self::add_edges`] so edge
    /// endpoints can resolve.
    pub fn add_nodes<'a>(&mut self, records: impl IntoIterator<Item = &'a Value>) -> &mut Self {
        for record in records {
            self.report.nodes_in += 1;
            self.add_node(record);
        }
        self
    }

    fn add_node(&mut self, record: &Value) {
        let Some(label) = str_field(record, &["label", "name"]) else {
            self.report.nodes_skipped += 1;
            debug!(record = %record, "Skipping node without label");
            return;
        };
        let node_type = ids::normalize_type(str_field(record, &["type"]).unwrap_or_default().as_str());
        let id = ids::node_id(&label, &node_type);
        let aliases = string_list(record.get("aliases"));

        self.label_to_id.insert(label.clone(), id.clone());
        self.label_to_id.insert(ids::normalize_label(&label), id.clone());
        for alias in &aliases {
            self.label_to_id
                .entry(ids::normalize_label(alias))
                .or_insert_with(|| id.clone());
        }

        match self.node_index.get(&id) {
            Some(&pos) => {
                let existing = &mut self.nodes[pos];
                for alias in aliases {
                    if !existing.aliases.contains(&alias) {
                        existing.aliases.push(alias);
                    }
                }
                self.report.nodes_merged += 1;
            }
            None => {
                self.node_index.insert(id.clone(), self.nodes.len());
                self.nodes.push(Node {
                    id,
                    label,
                    node_type,
                    aliases,
                });
            }
        }
    }

    /// Register raw edge records, resolving endpoints against known nodes.
    pub fn add_edges<'a>(&mut self, records: impl IntoIterator<Item = &'a Value>) -> &mut Self {
        for record in records {
            self.report.edges_in += 1;
            self.add_edge(record);
        }
        self
    }

    fn add_edge(&mut self, record: &Value) {
        if !record.is_object() {
            self.report.edges_skipped_malformed += 1;
            return;
        }

        let head_id = self.resolve_endpoint(record, "head_id", &["head", "source", "from"]);
        let tail_id = self.resolve_endpoint(record, "tail_id", &["tail", "target", "to"]);
        let (Some(head_id), Some(tail_id)) = (head_id, tail_id) else {
            self.report.edges_skipped_missing_endpoint += 1;
            return;
        };

        let relation = ids::normalize_relation(&relation_str(record.get("relation").or_else(|| record.get("type"))));
        let source_chunk_id = scalar_string(record.get("chunk_id").or_else(|| record.get("source_chunk_id")));
        let confidence = number_field(record.get("confidence")).clamp(0.0, 1.0);
        let evidence = str_field(record, &["evidence"]).unwrap_or_default();
        let dedup_key = ids::edge_dedup_key(&head_id, &tail_id, &relation, source_chunk_id.as_deref());

        let edge = Edge {
            head_id,
            tail_id,
            relation,
            confidence,
            evidence,
            source_chunk_id,
            dedup_key: dedup_key.clone(),
        };

        match self.edge_index.get(&dedup_key) {
            Some(&pos) => {
                self.edges[pos] = edge;
                self.report.edges_merged += 1;
            }
            None => {
                self.edge_index.insert(dedup_key, self.edges.len());
                self.edges.push(edge);
            }
        }
    }

    fn resolve_endpoint(&self, record: &Value, id_key: &str, label_keys: &[&str]) -> Option<String> {
        if let Some(id) = str_field(record, &[id_key]) {
            if self.node_index.contains_key(&id) {
                return Some(id);
            }
        }
        let label = str_field(record, label_keys)?;
        self.label_to_id
            .get(&label)
            .or_else(|| self.label_to_id.get(&ids::normalize_label(&label)))
            .cloned()
    }

    /// Finish the build.
    pub fn build(mut self) -> BuiltGraph {
        self.report.nodes_out = self.nodes.len();
        self.report.edges_out = self.edges.len();

        info!(
            nodes_in = self.report.nodes_in,
            nodes_out = self.report.nodes_out,
            edges_in = self.report.edges_in,
            edges_out = self.report.edges_out,
            skipped_missing = self.report.edges_skipped_missing_endpoint,
            "Graph built"
        );

        BuiltGraph {
            nodes: self.nodes,
            edges: self.edges,
            report: self.report,
        }
    }
}

/// Split extraction records (one per chunk, carrying `entities` and
/// `relations` arrays) into raw node and edge records. Each relation inherits
/// the record's `chunk_id` unless it names its own.
pub fn graph_input_from_records(records: &[Value]) -> (Vec<Value>, Vec<Value>) {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    for record in records {
        let chunk_id = record.get("chunk_id").cloned().unwrap_or(Value::Null);

        if let Some(entities) = record.get("entities").and_then(Value::as_array) {
            nodes.extend(entities.iter().cloned());
        }

        if let Some(relations) = record.get("relations").and_then(Value::as_array) {
            for relation in relations {
                let mut relation = relation.clone();
                if let Some(obj) = relation.as_object_mut() {
                    obj.entry("chunk_id").or_insert_with(|| chunk_id.clone());
                }
                edges.push(relation);
            }
        }
    }

    (nodes, edges)
}

/// First non-empty trimmed string among `keys`.
fn str_field(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Strings, numbers and booleans rendered as a string; anything else is none.
fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number_field(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() { n } else { 0.0 }
}

/// A relation given as a string, or as a list whose first element is used.
fn relation_str(value: Option<&Value>) -> String {
    match value {
        Some(Value::Array(items)) => items.first().map(|v| relation_str(Some(v))).unwrap_or_default(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// A list of strings, or a comma-separated string.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    let raw: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| scalar_string(Some(v)))
            .collect(),
        Some(Value::String(s)) => s.split([',', '\n']).map(|p| p.trim().to_string()).collect(),
        _ => Vec::new(),
    };

    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for item in raw {
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(nodes: Value, edges: Value) -> BuiltGraph {
        let mut builder = EntityGraphBuilder::new();
        builder.add_nodes(nodes.as_array().unwrap());
        builder.add_edges(edges.as_array().unwrap());
        builder.build()
    }

    #[test]
    fn test_duplicate_mentions_collapse_to_one_node() {
        let graph = build(
            json!([
                {"label": "Impôt sur le Revenu", "type": "impot", "aliases": ["IR"]},
                {"label": "impôt  sur le revenu", "type": "IMPOT", "aliases": ["IR", "impôt revenu"]},
            ]),
            json!([]),
        );
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].label, "Impôt sur le Revenu");
        assert_eq!(graph.nodes[0].aliases, vec!["IR", "impôt revenu"]);
        assert_eq!(graph.report.nodes_merged, 1);
    }

    #[test]
    fn test_edge_resolves_regardless_of_case() {
        let graph = build(
            json!([
                {"label": "IR", "type": "IMPOT"},
                {"label": "Salarié", "type": "PERSONNE"},
            ]),
            json!([
                {"head": "ir", "tail": "SALARIÉ", "relation": ["applique a", "x"], "chunk_id": 12, "confidence": 0.9}
            ]),
        );
        assert_eq!(graph.edges.len(), 1);
        let edge = &graph.edges[0];
        assert_eq!(edge.relation, "APPLIQUE_A");
        assert_eq!(edge.source_chunk_id.as_deref(), Some("12"));
        assert_eq!(edge.head_id, ids::node_id("IR", "IMPOT"));
    }

    #[test]
    fn test_unresolved_edges_are_counted_not_fatal() {
        let graph = build(
            json!([{"label": "TVA", "type": "IMPOT"}]),
            json!([
                {"head": "TVA", "tail": "Unknown", "relation": "CONCERNE"},
                "not an object",
                {"head": "TVA", "tail": "TVA", "relation": ""}
            ]),
        );
        assert_eq!(graph.report.edges_skipped_missing_endpoint, 1);
        assert_eq!(graph.report.edges_skipped_malformed, 1);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].relation, "REL");
        assert_eq!(graph.edges[0].confidence, 0.0);
    }

    #[test]
    fn test_nodes_without_label_are_skipped() {
        let graph = build(json!([{"type": "IMPOT"}, {"label": "  "}, {"name": "Dahir"}]), json!([]));
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].node_type, "ENTITY");
        assert_eq!(graph.report.nodes_skipped, 2);
    }

    #[test]
    fn test_duplicate_edges_upsert() {
        let graph = build(
            json!([{"label": "A"}, {"label": "B"}]),
            json!([
                {"head": "A", "tail": "B", "relation": "INCLUT", "chunk_id": "c1", "confidence": 0.2},
                {"head": "A", "tail": "B", "relation": "inclut", "chunk_id": "c1", "confidence": "0.7"},
                {"head": "A", "tail": "B", "relation": "INCLUT", "chunk_id": "c2", "confidence": 3.0}
            ]),
        );
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[0].confidence, 0.7);
        assert_eq!(graph.edges[1].confidence, 1.0);
        assert_eq!(graph.report.edges_merged, 1);
    }

    #[test]
    fn test_records_split_into_graph_input() {
        let records = vec![json!({
            "chunk_id": 7,
            "entities": [{"label": "IS", "type": "IMPOT"}],
            "relations": [{"head": "IS", "tail": "IS", "relation": "REFERENCE"}]
        })];
        let (nodes, edges) = graph_input_from_records(&records);
        assert_eq!(nodes.len(), 1);
        assert_eq!(edges[0]["chunk_id"], json!(7));
    }
}
