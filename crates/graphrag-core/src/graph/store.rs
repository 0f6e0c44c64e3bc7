//! Graph store abstraction and an in-process implementation.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use super::model::{CommunityBrief, CommunityMembership, Edge, EvidenceTriple, GraphCounts, GraphSnapshot, Node};
use crate::community::model::Community;
use crate::community::profile::CommunityProfile;
use crate::error::{GraphRagError, GraphRagResult};
use crate::text;

/// Narrow interface over the property-graph database.
///
/// Nodes are upserted by id and edges by dedup key; nothing is ever deleted
/// except community assignments, which are replaced wholesale per run.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_nodes(&self, nodes: &[Node]) -> GraphRagResult<usize>;

    async fn upsert_edges(&self, edges: &[Edge]) -> GraphRagResult<usize>;

    async fn load_graph(&self) -> GraphRagResult<GraphSnapshot>;

    /// Drop previous community assignments and write `communities`.
    async fn replace_communities(&self, communities: &[Community]) -> GraphRagResult<usize>;

    /// Attach title, summary and keywords to existing communities.
    async fn upsert_profiles(&self, profiles: &[CommunityProfile]) -> GraphRagResult<usize>;

    /// Nodes whose label or an alias contains one of `candidates`, compared
    /// case- and accent-insensitively. A candidate that hits no label or alias
    /// falls back to the nodes whose type it names ("impôt" finds `IMPOT`
    /// nodes); those rank after every label hit. Distinct, in candidate
    /// order, at most `limit`.
    async fn match_entities(&self, candidates: &[String], limit: usize) -> GraphRagResult<Vec<Node>>;

    async fn community_memberships(&self, node_ids: &[String]) -> GraphRagResult<Vec<CommunityMembership>>;

    /// Triples touching any of `node_ids`, strongest first. A non-empty
    /// `community_ids` keeps only triples with an endpoint in one of them.
    async fn incident_triples(
        &self,
        node_ids: &[String],
        community_ids: &[String],
        limit: usize,
    ) -> GraphRagResult<Vec<EvidenceTriple>>;

    async fn counts(&self) -> GraphRagResult<GraphCounts>;
}

/// Folded text a node is matched against: label and aliases.
pub fn search_text(node: &Node) -> String {
    let mut parts = Vec::with_capacity(node.aliases.len() + 1);
    parts.push(text::fold(&node.label));
    parts.extend(node.aliases.iter().map(|a| text::fold(a)));
    parts.join("\n")
}

/// Folded node type, compared whole against candidates.
pub fn type_key(node_type: &str) -> String {
    text::fold(node_type.trim())
}

/// Append the aliases of `incoming` not already present in `existing`.
pub fn merge_aliases(existing: &mut Vec<String>, incoming: &[String]) {
    for alias in incoming {
        if !existing.contains(alias) {
            existing.push(alias.clone());
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: Vec<Node>,
    node_index: HashMap<String, usize>,
    edges: Vec<Edge>,
    edge_index: HashMap<String, usize>,
    communities: HashMap<String, CommunityBrief>,
    membership: HashMap<String, String>,
}

/// Graph store held entirely in memory. Used by tests and offline runs.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: RwLock<MemoryState>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> GraphRagResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| GraphRagError::storage("memory graph lock poisoned"))
    }

    fn write(&self) -> GraphRagResult<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| GraphRagError::storage("memory graph lock poisoned"))
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_nodes(&self, nodes: &[Node]) -> GraphRagResult<usize> {
        let mut state = self.write()?;
        for node in nodes {
            match state.node_index.get(&node.id).copied() {
                Some(pos) => {
                    let stored = &mut state.nodes[pos];
                    let mut aliases = std::mem::take(&mut stored.aliases);
                    merge_aliases(&mut aliases, &node.aliases);
                    *stored = Node {
                        aliases,
                        ..node.clone()
                    };
                }
                None => {
                    let pos = state.nodes.len();
                    state.node_index.insert(node.id.clone(), pos);
                    state.nodes.push(node.clone());
                }
            }
        }
        Ok(nodes.len())
    }

    async fn upsert_edges(&self, edges: &[Edge]) -> GraphRagResult<usize> {
        let mut state = self.write()?;
        let mut written = 0;
        for edge in edges {
            if !state.node_index.contains_key(&edge.head_id) || !state.node_index.contains_key(&edge.tail_id) {
                continue;
            }
            match state.edge_index.get(&edge.dedup_key).copied() {
                Some(pos) => state.edges[pos] = edge.clone(),
                None => {
                    let pos = state.edges.len();
                    state.edge_index.insert(edge.dedup_key.clone(), pos);
                    state.edges.push(edge.clone());
                }
            }
            written += 1;
        }
        Ok(written)
    }

    async fn load_graph(&self) -> GraphRagResult<GraphSnapshot> {
        let state = self.read()?;
        Ok(GraphSnapshot {
            nodes: state.nodes.clone(),
            edges: state.edges.clone(),
        })
    }

    async fn replace_communities(&self, communities: &[Community]) -> GraphRagResult<usize> {
        let mut state = self.write()?;
        state.communities.clear();
        state.membership.clear();
        for community in communities {
            state.communities.insert(
                community.id.clone(),
                CommunityBrief {
                    id: community.id.clone(),
                    size: community.size,
                    title: community.title.clone(),
                    summary: community.summary.clone(),
                    keywords: community.keywords.clone(),
                },
            );
            for member in &community.member_node_ids {
                state.membership.insert(member.clone(), community.id.clone());
            }
        }
        Ok(communities.len())
    }

    async fn upsert_profiles(&self, profiles: &[CommunityProfile]) -> GraphRagResult<usize> {
        let mut state = self.write()?;
        let mut updated = 0;
        for profile in profiles.iter().filter(|p| p.error.is_none()) {
            if let Some(brief) = state.communities.get_mut(&profile.community_id) {
                brief.title = profile.title.clone();
                brief.summary = profile.summary.clone();
                brief.keywords = profile.keywords.clone();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn match_entities(&self, candidates: &[String], limit: usize) -> GraphRagResult<Vec<Node>> {
        let state = self.read()?;
        let haystacks: Vec<String> = state.nodes.iter().map(search_text).collect();
        let types: Vec<String> = state.nodes.iter().map(|n| type_key(&n.node_type)).collect();
        let needles: Vec<String> = candidates
            .iter()
            .map(|c| text::fold(c.trim()))
            .filter(|c| !c.is_empty())
            .collect();

        // Best rank per node position: label hits rank by candidate, type
        // fallbacks after all of them.
        let mut ranks: HashMap<usize, usize> = HashMap::new();
        for (i, needle) in needles.iter().enumerate() {
            let by_label: Vec<usize> = (0..state.nodes.len()).filter(|&p| haystacks[p].contains(needle.as_str())).collect();
            let (hits, rank) = if by_label.is_empty() {
                let by_type: Vec<usize> = (0..state.nodes.len()).filter(|&p| &types[p] == needle).collect();
                (by_type, needles.len() + i)
            } else {
                (by_label, i)
            };
            for pos in hits {
                let best = ranks.entry(pos).or_insert(rank);
                *best = (*best).min(rank);
            }
        }

        let mut ranked: Vec<(usize, usize)> = ranks.into_iter().map(|(pos, rank)| (rank, pos)).collect();
        ranked.sort_unstable();
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(_, pos)| state.nodes[pos].clone())
            .collect())
    }

    async fn community_memberships(&self, node_ids: &[String]) -> GraphRagResult<Vec<CommunityMembership>> {
        let state = self.read()?;
        Ok(node_ids
            .iter()
            .filter_map(|id| {
                let cid = state.membership.get(id)?;
                let brief = state.communities.get(cid)?;
                Some(CommunityMembership {
                    node_id: id.clone(),
                    community: brief.clone(),
                })
            })
            .collect())
    }

    async fn incident_triples(
        &self,
        node_ids: &[String],
        community_ids: &[String],
        limit: usize,
    ) -> GraphRagResult<Vec<EvidenceTriple>> {
        let state = self.read()?;
        let wanted: HashSet<&str> = node_ids.iter().map(String::as_str).collect();
        let filter: HashSet<&str> = community_ids.iter().map(String::as_str).collect();
        let in_filter = |node_id: &str| {
            state
                .membership
                .get(node_id)
                .is_some_and(|cid| filter.contains(cid.as_str()))
        };

        let mut hits: Vec<&Edge> = state
            .edges
            .iter()
            .filter(|e| wanted.contains(e.head_id.as_str()) || wanted.contains(e.tail_id.as_str()))
            .filter(|e| filter.is_empty() || in_filter(&e.head_id) || in_filter(&e.tail_id))
            .collect();
        hits.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.dedup_key.cmp(&b.dedup_key))
        });

        let mut out = Vec::new();
        for edge in hits.into_iter().take(limit) {
            let head = state.node_index.get(&edge.head_id).map(|&i| &state.nodes[i]);
            let tail = state.node_index.get(&edge.tail_id).map(|&i| &state.nodes[i]);
            if let (Some(head), Some(tail)) = (head, tail) {
                out.push(EvidenceTriple::from_parts(edge, head, tail));
            }
        }
        Ok(out)
    }

    async fn counts(&self) -> GraphRagResult<GraphCounts> {
        let state = self.read()?;
        Ok(GraphCounts {
            nodes: state.nodes.len(),
            relationships: state.edges.len(),
            communities: state.communities.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ids;

    fn node(label: &str, node_type: &str, aliases: &[&str]) -> Node {
        Node {
            id: ids::node_id(label, node_type),
            label: label.to_string(),
            node_type: node_type.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn edge(head: &Node, tail: &Node, relation: &str, confidence: f64) -> Edge {
        Edge {
            head_id: head.id.clone(),
            tail_id: tail.id.clone(),
            relation: relation.to_string(),
            confidence,
            evidence: String::new(),
            source_chunk_id: None,
            dedup_key: ids::edge_dedup_key(&head.id, &tail.id, relation, None),
        }
    }

    #[tokio::test]
    async fn test_match_is_accent_and_case_insensitive() {
        let store = MemoryGraphStore::new();
        let ir = node("IR", "IMPOT", &["Impôt sur le revenu"]);
        let sal = node("Salarié", "PERSONNE", &[]);
        store.upsert_nodes(&[ir.clone(), sal.clone()]).await.unwrap();

        let hits = store
            .match_entities(&["impot".to_string(), "SALARIE".to_string(), "ir".to_string()], 8)
            .await
            .unwrap();
        assert_eq!(hits.iter().map(|n| n.id.clone()).collect::<Vec<_>>(), vec![ir.id, sal.id]);
    }

    #[tokio::test]
    async fn test_candidate_naming_a_type_matches_its_nodes() {
        let store = MemoryGraphStore::new();
        let ir = node("IR", "IMPOT", &[]);
        let sal = node("Salarié", "PERSONNE", &[]);
        let tva = node("TVA", "IMPOT", &["taxe sur la valeur ajoutée"]);
        store.upsert_nodes(&[ir.clone(), sal.clone(), tva.clone()]).await.unwrap();

        let hits = store
            .match_entities(&["impôt".to_string(), "salarié".to_string()], 8)
            .await
            .unwrap();
        let labels: Vec<&str> = hits.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["Salarié", "IR", "TVA"]);

        // A label or alias hit means no type fallback for that candidate.
        let hits = store.match_entities(&["taxe".to_string()], 8).await.unwrap();
        assert_eq!(hits.iter().map(|n| n.label.as_str()).collect::<Vec<_>>(), vec!["TVA"]);
        let hits = store.match_entities(&["personne".to_string()], 8).await.unwrap();
        assert_eq!(hits.iter().map(|n| n.label.as_str()).collect::<Vec<_>>(), vec!["Salarié"]);
    }

    #[tokio::test]
    async fn test_reupsert_keeps_earlier_aliases() {
        let store = MemoryGraphStore::new();
        store
            .upsert_nodes(&[node("IR", "IMPOT", &["Impôt sur le revenu"])])
            .await
            .unwrap();
        store
            .upsert_nodes(&[node("IR", "IMPOT", &["impôt revenu", "Impôt sur le revenu"])])
            .await
            .unwrap();

        let graph = store.load_graph().await.unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].aliases, vec!["Impôt sur le revenu", "impôt revenu"]);
        let hits = store.match_entities(&["sur le revenu".to_string()], 8).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_match_respects_limit() {
        let store = MemoryGraphStore::new();
        let nodes: Vec<Node> = (0..5).map(|i| node(&format!("taxe {i}"), "IMPOT", &[])).collect();
        store.upsert_nodes(&nodes).await.unwrap();
        let hits = store.match_entities(&["taxe".to_string()], 3).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_incident_triples_filtered_by_community() {
        let store = MemoryGraphStore::new();
        let a = node("A", "X", &[]);
        let b = node("B", "X", &[]);
        let c = node("C", "X", &[]);
        store.upsert_nodes(&[a.clone(), b.clone(), c.clone()]).await.unwrap();
        store
            .upsert_edges(&[edge(&a, &b, "R1", 0.4), edge(&a, &c, "R2", 0.9)])
            .await
            .unwrap();
        store
            .replace_communities(&[
                Community::new("0", vec![a.id.clone(), b.id.clone()]),
                Community::new("1", vec![c.id.clone()]),
            ])
            .await
            .unwrap();

        let all = store.incident_triples(&[a.id.clone()], &[], 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].relation, "R2");

        let only_c = store
            .incident_triples(&[b.id.clone(), c.id.clone()], &["1".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(only_c.len(), 1);
        assert_eq!(only_c[0].tail_label, "C");

        let counts = store.counts().await.unwrap();
        assert_eq!((counts.nodes, counts.relationships, counts.communities), (3, 2, 2));
    }

    #[tokio::test]
    async fn test_edges_with_unknown_endpoints_are_not_stored() {
        let store = MemoryGraphStore::new();
        let a = node("A", "X", &[]);
        let ghost = node("Ghost", "X", &[]);
        store.upsert_nodes(&[a.clone()]).await.unwrap();
        let written = store.upsert_edges(&[edge(&a, &ghost, "R", 1.0)]).await.unwrap();
        assert_eq!(written, 0);
    }
}
