//! Knowledge graph domain models.

use serde::{Deserialize, Serialize};

/// A canonical entity node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// A directed relation between two canonical nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub head_id: String,
    pub tail_id: String,
    pub relation: String,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub source_chunk_id: Option<String>,
    pub dedup_key: String,
}

/// An edge joined with its endpoint labels, as handed to the answer prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceTriple {
    pub head_id: String,
    pub head_label: String,
    pub head_type: String,
    pub relation: String,
    pub tail_id: String,
    pub tail_label: String,
    pub tail_type: String,
    pub evidence: String,
    pub source_chunk_id: Option<String>,
    pub confidence: f64,
    pub dedup_key: String,
}

impl EvidenceTriple {
    /// Build a triple from an edge and its resolved endpoints.
    pub fn from_parts(edge: &Edge, head: &Node, tail: &Node) -> Self {
        Self {
            head_id: head.id.clone(),
            head_label: head.label.clone(),
            head_type: head.node_type.clone(),
            relation: edge.relation.clone(),
            tail_id: tail.id.clone(),
            tail_label: tail.label.clone(),
            tail_type: tail.node_type.clone(),
            evidence: edge.evidence.clone(),
            source_chunk_id: edge.source_chunk_id.clone(),
            confidence: edge.confidence,
            dedup_key: edge.dedup_key.clone(),
        }
    }

    /// Identifier the answer cites for this triple: the source chunk, or the
    /// edge key when the extraction carried no chunk.
    pub fn source_id(&self) -> String {
        match &self.source_chunk_id {
            Some(chunk) if !chunk.is_empty() => chunk.clone(),
            _ => format!("edge:{}", crate::text::truncate_chars(&self.dedup_key, 12)),
        }
    }
}

/// Short description of a community, as stored next to the graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommunityBrief {
    pub id: String,
    pub size: usize,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// One node's membership in a community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityMembership {
    pub node_id: String,
    pub community: CommunityBrief,
}

/// Full graph contents, as read back from a store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Node, relationship and community counts for status display.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphCounts {
    pub nodes: usize,
    pub relationships: usize,
    pub communities: usize,
}
