//! Undirected weighted graph used by the clustering passes.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::graph::model::GraphSnapshot;

const EPSILON: f64 = 1e-12;

/// Objective optimized by the local moving phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Quality {
    /// Constant Potts Model: internal weight minus `resolution * n_c^2 / 2`.
    Cpm,
    /// Newman-Girvan modularity with a resolution factor.
    Modularity,
}

/// Adjacency-list graph over dense node indices.
///
/// Nodes may stand for aggregated groups of original nodes, in which case
/// `node_size` counts the originals and `self_weight` holds internal weight.
#[derive(Debug, Clone, Default)]
pub(crate) struct WeightedGraph {
    pub adj: Vec<Vec<(usize, f64)>>,
    pub node_size: Vec<f64>,
    pub degree: Vec<f64>,
    pub self_weight: Vec<f64>,
    /// Sum of all degrees, i.e. twice the total edge weight.
    pub total_degree: f64,
}

impl WeightedGraph {
    /// Build from a stored graph: one unit of weight per relation, parallel
    /// relations summed, self-loops and dangling edges dropped. Returns the
    /// graph plus the number of edges skipped for a missing endpoint.
    pub fn from_snapshot(snapshot: &GraphSnapshot) -> (Self, usize) {
        let index: HashMap<&str, usize> = snapshot
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut weights: HashMap<(usize, usize), f64> = HashMap::new();
        let mut dangling = 0;
        for edge in &snapshot.edges {
            let (Some(&h), Some(&t)) = (index.get(edge.head_id.as_str()), index.get(edge.tail_id.as_str())) else {
                dangling += 1;
                continue;
            };
            if h == t {
                continue;
            }
            *weights.entry((h.min(t), h.max(t))).or_insert(0.0) += 1.0;
        }

        (Self::from_weights(index.len().max(snapshot.nodes.len()), weights), dangling)
    }

    fn from_weights(n: usize, weights: HashMap<(usize, usize), f64>) -> Self {
        let mut adj = vec![Vec::new(); n];
        let mut degree = vec![0.0; n];
        for ((a, b), w) in weights {
            adj[a].push((b, w));
            adj[b].push((a, w));
            degree[a] += w;
            degree[b] += w;
        }
        for list in &mut adj {
            list.sort_by_key(|&(u, _)| u);
        }
        let total_degree = degree.iter().sum();
        Self {
            adj,
            node_size: vec![1.0; n],
            degree,
            self_weight: vec![0.0; n],
            total_degree,
        }
    }

    pub fn len(&self) -> usize {
        self.adj.len()
    }

    /// Collapse every group of `membership` (dense ids `0..k`) into one node.
    pub fn aggregate(&self, membership: &[usize], k: usize) -> Self {
        let mut node_size = vec![0.0; k];
        let mut degree = vec![0.0; k];
        let mut self_weight = vec![0.0; k];
        let mut weights: HashMap<(usize, usize), f64> = HashMap::new();

        for v in 0..self.len() {
            let cv = membership[v];
            node_size[cv] += self.node_size[v];
            degree[cv] += self.degree[v];
            self_weight[cv] += self.self_weight[v];
            for &(u, w) in &self.adj[v] {
                if v >= u {
                    continue;
                }
                let cu = membership[u];
                if cu == cv {
                    self_weight[cv] += w;
                } else {
                    *weights.entry((cv.min(cu), cv.max(cu))).or_insert(0.0) += w;
                }
            }
        }

        let mut adj = vec![Vec::new(); k];
        for ((a, b), w) in weights {
            adj[a].push((b, w));
            adj[b].push((a, w));
        }
        for list in &mut adj {
            list.sort_by_key(|&(u, _)| u);
        }

        Self {
            adj,
            node_size,
            degree,
            self_weight,
            total_degree: self.total_degree,
        }
    }

    fn gain(&self, quality: Quality, resolution: f64, v: usize, weight_to: f64, comm_size: f64, comm_degree: f64) -> f64 {
        match quality {
            Quality::Cpm => weight_to - resolution * self.node_size[v] * comm_size,
            Quality::Modularity => {
                if self.total_degree <= 0.0 {
                    return weight_to;
                }
                weight_to - resolution * self.degree[v] * comm_degree / self.total_degree
            }
        }
    }

    /// Greedily move nodes to the neighboring community with the best gain
    /// until a full pass moves nothing or `max_passes` is reached.
    ///
    /// `membership` must hold ids below `self.len()`. Returns whether any
    /// node moved.
    pub fn local_moving<R: Rng>(
        &self,
        membership: &mut [usize],
        quality: Quality,
        resolution: f64,
        rng: &mut R,
        max_passes: usize,
    ) -> bool {
        let n = self.len();
        let mut comm_size = vec![0.0; n];
        let mut comm_degree = vec![0.0; n];
        let mut comm_count = vec![0usize; n];
        for v in 0..n {
            let c = membership[v];
            comm_size[c] += self.node_size[v];
            comm_degree[c] += self.degree[v];
            comm_count[c] += 1;
        }
        let mut empty: Vec<usize> = (0..n).filter(|&c| comm_count[c] == 0).collect();

        let mut neigh_weight = vec![0.0; n];
        let mut touched: Vec<usize> = Vec::new();
        let mut order: Vec<usize> = (0..n).collect();
        let mut moved_any = false;

        for _ in 0..max_passes.max(1) {
            order.shuffle(rng);
            let mut moved = false;

            for &v in &order {
                let current = membership[v];
                touched.clear();
                for &(u, w) in &self.adj[v] {
                    let c = membership[u];
                    if neigh_weight[c] == 0.0 {
                        touched.push(c);
                    }
                    neigh_weight[c] += w;
                }

                comm_size[current] -= self.node_size[v];
                comm_degree[current] -= self.degree[v];
                comm_count[current] -= 1;

                let mut best = current;
                let mut best_gain = self.gain(
                    quality,
                    resolution,
                    v,
                    neigh_weight[current],
                    comm_size[current],
                    comm_degree[current],
                );
                for &c in &touched {
                    if c == current {
                        continue;
                    }
                    let g = self.gain(quality, resolution, v, neigh_weight[c], comm_size[c], comm_degree[c]);
                    if g > best_gain + EPSILON {
                        best = c;
                        best_gain = g;
                    }
                }
                // Being alone scores zero; prefer it over a negative gain.
                if best_gain < -EPSILON && comm_count[current] > 0 {
                    if let Some(free) = empty.pop() {
                        best = free;
                    }
                }

                if comm_count[current] == 0 && best != current {
                    empty.push(current);
                }
                comm_size[best] += self.node_size[v];
                comm_degree[best] += self.degree[v];
                comm_count[best] += 1;
                membership[v] = best;
                if best != current {
                    moved = true;
                    moved_any = true;
                }

                for &c in &touched {
                    neigh_weight[c] = 0.0;
                }
            }

            if !moved {
                break;
            }
        }

        moved_any
    }
}

/// Renumber arbitrary community ids to `0..k` in first-seen order.
pub(crate) fn renumber(membership: &[usize]) -> (Vec<usize>, usize) {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    let dense = membership
        .iter()
        .map(|&c| {
            let next = mapping.len();
            *mapping.entry(c).or_insert(next)
        })
        .collect();
    (dense, mapping.len())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Two 4-cliques joined by a single bridge.
    pub(crate) fn two_cliques() -> WeightedGraph {
        let mut weights = HashMap::new();
        for group in [[0usize, 1, 2, 3], [4, 5, 6, 7]] {
            for (i, &a) in group.iter().enumerate() {
                for &b in &group[i + 1..] {
                    weights.insert((a, b), 1.0);
                }
            }
        }
        weights.insert((3, 4), 1.0);
        WeightedGraph::from_weights(8, weights)
    }

    #[test]
    fn test_local_moving_finds_cliques() {
        let g = two_cliques();
        let mut membership: Vec<usize> = (0..g.len()).collect();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(g.local_moving(&mut membership, Quality::Modularity, 1.0, &mut rng, 20));
        assert!(membership[..4].iter().all(|&c| c == membership[0]));
        assert!(membership[4..].iter().all(|&c| c == membership[4]));
        assert_ne!(membership[0], membership[4]);
    }

    #[test]
    fn test_aggregate_preserves_weight() {
        let g = two_cliques();
        let membership = vec![0, 0, 0, 0, 1, 1, 1, 1];
        let agg = g.aggregate(&membership, 2);
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.node_size, vec![4.0, 4.0]);
        assert_eq!(agg.self_weight, vec![6.0, 6.0]);
        assert_eq!(agg.adj[0], vec![(1, 1.0)]);
        assert_eq!(agg.total_degree, g.total_degree);
    }

    #[test]
    fn test_renumber_first_seen() {
        assert_eq!(renumber(&[7, 3, 7, 9]), (vec![0, 1, 0, 2], 3));
    }
}
