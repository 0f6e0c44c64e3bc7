//! Leiden clustering under the Constant Potts Model.
//!
//! Each level runs local moving, then refines every community by merging
//! singletons only along internal edges, so refined groups are always
//! connected. The graph is aggregated on the refined groups and the next
//! level starts from the unrefined partition.

use rand::Rng;

use super::weighted::{renumber, Quality, WeightedGraph};
use crate::error::{GraphRagError, GraphRagResult};

const EPSILON: f64 = 1e-12;

/// Run Leiden and return a community id per node (dense, first-seen order).
pub(crate) fn leiden<R: Rng>(
    graph: &WeightedGraph,
    resolution: f64,
    rng: &mut R,
    max_levels: usize,
) -> GraphRagResult<Vec<usize>> {
    let n = graph.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut current = graph.clone();
    let mut mapping: Vec<usize> = (0..n).collect();
    let mut partition: Vec<usize> = (0..n).collect();

    for _ in 0..max_levels {
        current.local_moving(&mut partition, Quality::Cpm, resolution, rng, max_levels);
        let (partition_dense, k) = renumber(&partition);
        if k == current.len() {
            return Ok(mapping.iter().map(|&a| partition_dense[a]).collect());
        }

        let refined = refine(&current, &partition_dense, resolution, rng);
        let (refined_dense, rk) = renumber(&refined);
        if rk == current.len() {
            // Refinement could not merge anything; aggregating again would
            // reproduce the same graph.
            return Ok(mapping.iter().map(|&a| partition_dense[a]).collect());
        }

        let mut next_partition = vec![0; rk];
        for v in 0..current.len() {
            next_partition[refined_dense[v]] = partition_dense[v];
        }
        current = current.aggregate(&refined_dense, rk);
        for a in mapping.iter_mut() {
            *a = refined_dense[*a];
        }
        partition = next_partition;
    }

    Err(GraphRagError::CommunityDetection(format!(
        "leiden did not converge within {max_levels} levels"
    )))
}

/// Split each community into connected sub-groups by merging singleton nodes
/// into the neighboring sub-group with the best positive CPM gain.
fn refine<R: Rng>(graph: &WeightedGraph, partition: &[usize], resolution: f64, rng: &mut R) -> Vec<usize> {
    use rand::seq::SliceRandom;

    let n = graph.len();
    let mut refined: Vec<usize> = (0..n).collect();
    let mut size = graph.node_size.clone();
    let mut count = vec![1usize; n];

    let mut neigh_weight = vec![0.0; n];
    let mut touched: Vec<usize> = Vec::new();
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);

    for &v in &order {
        let current = refined[v];
        if count[current] != 1 {
            continue;
        }

        touched.clear();
        for &(u, w) in &graph.adj[v] {
            if partition[u] != partition[v] {
                continue;
            }
            let c = refined[u];
            if c == current {
                continue;
            }
            if neigh_weight[c] == 0.0 {
                touched.push(c);
            }
            neigh_weight[c] += w;
        }

        let mut best = current;
        let mut best_gain = 0.0;
        for &c in &touched {
            let gain = neigh_weight[c] - resolution * graph.node_size[v] * size[c];
            if gain > best_gain + EPSILON {
                best = c;
                best_gain = gain;
            }
        }
        for &c in &touched {
            neigh_weight[c] = 0.0;
        }

        if best != current {
            size[best] += graph.node_size[v];
            count[best] += 1;
            size[current] = 0.0;
            count[current] = 0;
            refined[v] = best;
        }
    }

    refined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::weighted::tests::two_cliques;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_leiden_separates_cliques() {
        let g = two_cliques();
        let mut rng = StdRng::seed_from_u64(42);
        let membership = leiden(&g, 0.6, &mut rng, 50).unwrap();
        assert_eq!(membership.len(), 8);
        assert!(membership[..4].iter().all(|&c| c == membership[0]));
        assert!(membership[4..].iter().all(|&c| c == membership[4]));
        assert_ne!(membership[0], membership[4]);
    }

    #[test]
    fn test_leiden_is_reproducible_with_seed() {
        let g = two_cliques();
        let a = leiden(&g, 0.6, &mut StdRng::seed_from_u64(7), 50).unwrap();
        let b = leiden(&g, 0.6, &mut StdRng::seed_from_u64(7), 50).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_leiden_empty_graph() {
        let g = WeightedGraph::default();
        assert!(leiden(&g, 0.6, &mut StdRng::seed_from_u64(1), 10).unwrap().is_empty());
    }

    #[test]
    fn test_leiden_zero_levels_fails() {
        let g = two_cliques();
        assert!(leiden(&g, 0.6, &mut StdRng::seed_from_u64(1), 0).is_err());
    }
}
