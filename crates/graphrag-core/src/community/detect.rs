//! Community detection with small-community merging.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::leiden::leiden;
use super::louvain::{louvain, modularity};
use super::model::{CommunityInfo, CommunitySnapshot, TopNode};
use super::weighted::WeightedGraph;
use crate::config::DetectionSettings;
use crate::error::{GraphRagError, GraphRagResult};
use crate::graph::model::GraphSnapshot;

/// Clustering algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    /// Leiden under the Constant Potts Model.
    Leiden,
    /// Louvain under modularity.
    Louvain,
}

impl DetectionMethod {
    /// The method tried when this one fails.
    pub fn fallback(self) -> Self {
        match self {
            Self::Leiden => Self::Louvain,
            Self::Louvain => Self::Leiden,
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leiden => write!(f, "leiden"),
            Self::Louvain => write!(f, "louvain"),
        }
    }
}

impl std::str::FromStr for DetectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "leiden" => Ok(Self::Leiden),
            "louvain" => Ok(Self::Louvain),
            other => Err(format!("unknown detection method '{other}' (expected leiden or louvain)")),
        }
    }
}

/// Counters for one detection run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionReport {
    pub nodes: usize,
    pub edges_used: usize,
    pub edges_dangling: usize,
    pub method: String,
    pub fell_back: bool,
    pub raw_communities: usize,
    pub merged_communities: usize,
    pub final_communities: usize,
    /// Final ids of undersized communities with no external neighbor.
    pub isolated_small: Vec<u32>,
    pub modularity: f64,
}

/// Snapshot plus the report describing how it was produced.
#[derive(Debug, Clone)]
pub struct Detection {
    pub snapshot: CommunitySnapshot,
    pub report: DetectionReport,
}

/// Partitions the graph and merges undersized communities into neighbors.
#[derive(Debug, Clone)]
pub struct CommunityDetector {
    settings: DetectionSettings,
}

impl CommunityDetector {
    pub fn new(settings: DetectionSettings) -> Self {
        Self { settings }
    }

    pub fn detect(&self, graph: &GraphSnapshot) -> GraphRagResult<Detection> {
        let resolution = self.settings.resolution;
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(GraphRagError::CommunityDetection(format!(
                "resolution must be a positive number, got {resolution}"
            )));
        }

        let (weighted, dangling) = WeightedGraph::from_snapshot(graph);
        if dangling > 0 {
            warn!(dangling, "Edges reference unknown nodes; ignored for clustering");
        }

        let primary = self.settings.method;
        let (method, raw, fell_back) = match self.cluster(primary, &weighted) {
            Ok(raw) => (primary, raw, false),
            Err(primary_err) => {
                let fallback = primary.fallback();
                warn!(%primary, %fallback, error = %primary_err, "Primary clustering failed, trying fallback");
                match self.cluster(fallback, &weighted) {
                    Ok(raw) => (fallback, raw, true),
                    Err(fallback_err) => {
                        return Err(GraphRagError::CommunityDetection(format!(
                            "{primary} failed ({primary_err}); {fallback} failed ({fallback_err})"
                        )))
                    }
                }
            }
        };

        let node_ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        let raw = order_by_size(&raw, &node_ids);
        let raw_communities = raw.iter().copied().max().map_or(0, |m| m + 1);

        let (merged, frozen) = merge_small(&weighted, raw, self.settings.min_size);
        let final_membership = order_by_size(&merged, &node_ids);
        let final_communities = final_membership.iter().copied().max().map_or(0, |m| m + 1);

        let mut isolated_small: Vec<u32> = frozen
            .iter()
            .filter_map(|&node| final_membership.get(node).map(|&c| c as u32))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        isolated_small.sort_unstable();

        let report = DetectionReport {
            nodes: weighted.len(),
            edges_used: weighted.adj.iter().map(Vec::len).sum::<usize>() / 2,
            edges_dangling: dangling,
            method: method.to_string(),
            fell_back,
            raw_communities,
            merged_communities: raw_communities.saturating_sub(final_communities),
            final_communities,
            isolated_small,
            modularity: modularity(&weighted, &final_membership, 1.0),
        };

        info!(
            method = %report.method,
            nodes = report.nodes,
            raw = report.raw_communities,
            merged = report.merged_communities,
            communities = report.final_communities,
            modularity = report.modularity,
            "Communities detected"
        );

        let assignments: BTreeMap<String, u32> = graph
            .nodes
            .iter()
            .zip(&final_membership)
            .map(|(n, &c)| (n.id.clone(), c as u32))
            .collect();

        let snapshot = CommunitySnapshot {
            version: 0,
            generated_at: Utc::now(),
            method: method.to_string(),
            resolution,
            min_size: self.settings.min_size,
            seed: self.settings.seed,
            info: community_info(graph, &weighted, &final_membership),
            assignments,
        };

        Ok(Detection { snapshot, report })
    }

    fn cluster(&self, method: DetectionMethod, graph: &WeightedGraph) -> GraphRagResult<Vec<usize>> {
        let mut rng = match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let levels = self.settings.max_iterations;
        match method {
            DetectionMethod::Leiden => leiden(graph, self.settings.resolution, &mut rng, levels),
            DetectionMethod::Louvain => louvain(graph, self.settings.resolution, &mut rng, levels),
        }
    }
}

/// Renumber so id 0 is the largest community; ties go to the community whose
/// smallest member id sorts first.
fn order_by_size(membership: &[usize], node_ids: &[&str]) -> Vec<usize> {
    let mut groups: HashMap<usize, (usize, &str)> = HashMap::new();
    for (v, &c) in membership.iter().enumerate() {
        let entry = groups.entry(c).or_insert((0, node_ids[v]));
        entry.0 += 1;
        if node_ids[v] < entry.1 {
            entry.1 = node_ids[v];
        }
    }
    let mut order: Vec<(usize, usize, &str)> = groups.into_iter().map(|(c, (size, min))| (c, size, min)).collect();
    order.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.2.cmp(b.2)));
    let rank: HashMap<usize, usize> = order.iter().enumerate().map(|(i, &(c, _, _))| (c, i)).collect();
    membership.iter().map(|c| rank[c]).collect()
}

/// Fold every community smaller than `min_size` into the neighbor it shares
/// the most edges with, smallest first, until none is left that can move.
///
/// Returns the new membership and one representative node for each
/// undersized community that has no external neighbor.
fn merge_small(graph: &WeightedGraph, mut membership: Vec<usize>, min_size: usize) -> (Vec<usize>, Vec<usize>) {
    let k = membership.iter().copied().max().map_or(0, |m| m + 1);
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (v, &c) in membership.iter().enumerate() {
        members[c].push(v);
    }
    let mut frozen: HashSet<usize> = HashSet::new();

    loop {
        let candidate = (0..k)
            .filter(|&c| !members[c].is_empty() && members[c].len() < min_size && !frozen.contains(&c))
            .min_by_key(|&c| (members[c].len(), c));
        let Some(small) = candidate else {
            break;
        };

        // Each neighbor pair counts once, however many relations join it.
        let mut links: HashMap<usize, usize> = HashMap::new();
        for &v in &members[small] {
            for &(u, _) in &graph.adj[v] {
                let target = membership[u];
                if target != small {
                    *links.entry(target).or_insert(0) += 1;
                }
            }
        }

        let best = links.into_iter().max_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| members[a.0].len().cmp(&members[b.0].len()))
                .then_with(|| b.0.cmp(&a.0))
        });

        match best {
            Some((target, _)) => {
                let moved = std::mem::take(&mut members[small]);
                for &v in &moved {
                    membership[v] = target;
                }
                members[target].extend(moved);
            }
            None => {
                frozen.insert(small);
            }
        }
    }

    let representatives = frozen
        .iter()
        .filter_map(|&c| members[c].first().copied())
        .collect();
    (membership, representatives)
}

fn community_info(graph: &GraphSnapshot, weighted: &WeightedGraph, membership: &[usize]) -> Vec<CommunityInfo> {
    let k = membership.iter().copied().max().map_or(0, |m| m + 1);
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (v, &c) in membership.iter().enumerate() {
        members[c].push(v);
    }

    members
        .into_iter()
        .enumerate()
        .map(|(cid, mut nodes)| {
            nodes.sort_by(|&a, &b| {
                weighted.adj[b]
                    .len()
                    .cmp(&weighted.adj[a].len())
                    .then_with(|| graph.nodes[a].label.cmp(&graph.nodes[b].label))
            });

            let top_nodes: Vec<TopNode> = nodes
                .iter()
                .take(10)
                .map(|&v| TopNode {
                    id: graph.nodes[v].id.clone(),
                    label: graph.nodes[v].label.clone(),
                    degree: weighted.adj[v].len(),
                })
                .collect();
            let top_labels: Vec<String> = top_nodes.iter().map(|n| n.label.clone()).collect();

            let mut type_counts: HashMap<&str, usize> = HashMap::new();
            for &v in &nodes {
                *type_counts.entry(graph.nodes[v].node_type.as_str()).or_insert(0) += 1;
            }
            let mut types: Vec<(&str, usize)> = type_counts.into_iter().collect();
            types.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

            CommunityInfo {
                community_id: cid as u32,
                size: nodes.len(),
                theme: top_labels.iter().take(5).cloned().collect::<Vec<_>>().join(" | "),
                top_types: types.into_iter().take(5).map(|(t, _)| t.to_string()).collect(),
                top_labels,
                top_nodes,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ids;
    use crate::graph::model::{Edge, Node};

    fn node(label: &str) -> Node {
        Node {
            id: ids::node_id(label, "ENTITY"),
            label: label.to_string(),
            node_type: "ENTITY".to_string(),
            aliases: Vec::new(),
        }
    }

    fn edge(a: &Node, b: &Node) -> Edge {
        Edge {
            head_id: a.id.clone(),
            tail_id: b.id.clone(),
            relation: "REL".to_string(),
            confidence: 1.0,
            evidence: String::new(),
            source_chunk_id: None,
            dedup_key: ids::edge_dedup_key(&a.id, &b.id, "REL", None),
        }
    }

    /// Two dense groups of `big` nodes, a small triangle hanging off the
    /// first group, and two isolated nodes.
    fn sample_graph(big: usize) -> GraphSnapshot {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for group in ["a", "b"] {
            let members: Vec<Node> = (0..big).map(|i| node(&format!("{group}{i}"))).collect();
            for i in 0..members.len() {
                for j in i + 1..members.len() {
                    edges.push(edge(&members[i], &members[j]));
                }
            }
            nodes.extend(members);
        }
        let tri: Vec<Node> = (0..3).map(|i| node(&format!("t{i}"))).collect();
        edges.push(edge(&tri[0], &tri[1]));
        edges.push(edge(&tri[1], &tri[2]));
        edges.push(edge(&tri[0], &tri[2]));
        edges.push(edge(&tri[0], &nodes[0]));
        edges.push(edge(&nodes[0], &nodes[big]));
        nodes.extend(tri);
        nodes.push(node("lonely1"));
        nodes.push(node("lonely2"));
        GraphSnapshot { nodes, edges }
    }

    fn settings(method: DetectionMethod, min_size: usize) -> DetectionSettings {
        DetectionSettings {
            method,
            resolution: 0.6,
            min_size,
            seed: Some(42),
            max_iterations: 50,
        }
    }

    #[test]
    fn test_partition_and_merge_invariant() {
        let graph = sample_graph(10);
        let detection = CommunityDetector::new(settings(DetectionMethod::Leiden, 8))
            .detect(&graph)
            .unwrap();
        let snapshot = &detection.snapshot;

        // Strict partition: every node assigned exactly once.
        assert_eq!(snapshot.assignments.len(), graph.nodes.len());
        for n in &graph.nodes {
            assert!(snapshot.assignments.contains_key(&n.id));
        }

        // No undersized community unless it has no external neighbor.
        let sizes = snapshot.sizes();
        for (cid, size) in &sizes {
            if *size < 8 {
                let id: u32 = cid.parse().unwrap();
                assert!(detection.report.isolated_small.contains(&id), "community {cid} of size {size} was not merged");
            }
        }

        // The triangle joined the group it hangs off.
        let t0 = &snapshot.assignments[&ids::node_id("t0", "ENTITY")];
        assert_eq!(t0, &snapshot.assignments[&ids::node_id("a0", "ENTITY")]);

        // Ids are dense and ordered by descending size.
        let ordered: Vec<usize> = (0..sizes.len()).map(|i| sizes[&i.to_string()]).collect();
        assert!(ordered.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(snapshot.info.len(), sizes.len());
        assert_eq!(detection.report.isolated_small.len(), 2);
    }

    #[test]
    fn test_seeded_runs_match() {
        let graph = sample_graph(9);
        let detector = CommunityDetector::new(settings(DetectionMethod::Louvain, 4));
        let a = detector.detect(&graph).unwrap().snapshot.assignments;
        let b = detector.detect(&graph).unwrap().snapshot.assignments;
        assert_eq!(a, b);
    }

    #[test]
    fn test_both_methods_failing_is_fatal() {
        let graph = sample_graph(4);
        let mut s = settings(DetectionMethod::Leiden, 2);
        s.max_iterations = 0;
        let err = CommunityDetector::new(s).detect(&graph).unwrap_err();
        assert!(matches!(err, GraphRagError::CommunityDetection(_)));
    }

    #[test]
    fn test_invalid_resolution_rejected() {
        let mut s = settings(DetectionMethod::Leiden, 8);
        s.resolution = -1.0;
        assert!(CommunityDetector::new(s).detect(&sample_graph(3)).is_err());
    }

    #[test]
    fn test_info_theme_uses_top_labels() {
        let graph = sample_graph(10);
        let detection = CommunityDetector::new(settings(DetectionMethod::Leiden, 8))
            .detect(&graph)
            .unwrap();
        let info = &detection.snapshot.info[0];
        assert_eq!(info.top_labels.len(), 10);
        assert_eq!(info.theme.split(" | ").count(), 5);
        assert_eq!(info.top_types, vec!["ENTITY"]);
        assert!(info.top_nodes[0].degree >= info.top_nodes[9].degree);
    }

    /// Nodes `n0..n{count}` plus one edge per `(head, tail, relation)`.
    fn indexed_graph(count: usize, links: &[(usize, usize, &str)]) -> WeightedGraph {
        let nodes: Vec<Node> = (0..count).map(|i| node(&format!("n{i}"))).collect();
        let edges = links
            .iter()
            .map(|&(h, t, relation)| Edge {
                relation: relation.to_string(),
                dedup_key: ids::edge_dedup_key(&nodes[h].id, &nodes[t].id, relation, None),
                ..edge(&nodes[h], &nodes[t])
            })
            .collect();
        WeightedGraph::from_snapshot(&GraphSnapshot { nodes, edges }).0
    }

    #[test]
    fn test_merge_counts_each_neighbor_once() {
        // n0 alone; community 1 = {n1, n2}, community 2 = {n3, n4}.
        // Three parallel relations to n1 still count as one link.
        let graph = indexed_graph(
            5,
            &[
                (1, 2, "REL"),
                (3, 4, "REL"),
                (0, 1, "APPLIQUE_A"),
                (0, 1, "DEFINI_PAR"),
                (0, 1, "EXONERE"),
                (0, 3, "REL"),
                (0, 4, "REL"),
            ],
        );
        let (membership, frozen) = merge_small(&graph, vec![0, 1, 1, 2, 2], 2);
        assert_eq!(membership[0], 2);
        assert!(frozen.is_empty());
    }

    #[test]
    fn test_merge_tie_prefers_larger_then_lower_id() {
        // Equal link counts: the larger target wins.
        let graph = indexed_graph(6, &[(1, 2, "REL"), (3, 4, "REL"), (4, 5, "REL"), (0, 1, "REL"), (0, 3, "REL")]);
        let (membership, _) = merge_small(&graph, vec![0, 1, 1, 2, 2, 2], 2);
        assert_eq!(membership[0], 2);

        // Equal counts and sizes: the lower community id wins.
        let graph = indexed_graph(5, &[(1, 2, "REL"), (3, 4, "REL"), (0, 3, "REL"), (0, 1, "REL")]);
        let (membership, _) = merge_small(&graph, vec![0, 1, 1, 2, 2], 2);
        assert_eq!(membership[0], 1);
    }

    #[test]
    fn test_unlinked_small_community_stays() {
        let graph = indexed_graph(4, &[(1, 2, "REL"), (2, 3, "REL")]);
        let (membership, frozen) = merge_small(&graph, vec![0, 1, 1, 1], 2);
        assert_eq!(membership, vec![0, 1, 1, 1]);
        assert_eq!(frozen, vec![0]);
    }

    #[test]
    fn test_method_fallback_pairs() {
        assert_eq!(DetectionMethod::Leiden.fallback(), DetectionMethod::Louvain);
        assert_eq!(DetectionMethod::Louvain.to_string(), "louvain");
        assert_eq!("Leiden".parse::<DetectionMethod>(), Ok(DetectionMethod::Leiden));
        assert!("kmeans".parse::<DetectionMethod>().is_err());
    }
}
