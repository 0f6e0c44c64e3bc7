//! Louvain clustering under modularity with a resolution factor.

use rand::Rng;

use super::weighted::{renumber, Quality, WeightedGraph};
use crate::error::{GraphRagError, GraphRagResult};

/// Run Louvain and return a community id per node (dense, first-seen order).
pub(crate) fn louvain<R: Rng>(
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

    for _ in 0..max_levels {
        let mut partition: Vec<usize> = (0..current.len()).collect();
        current.local_moving(&mut partition, Quality::Modularity, resolution, rng, max_levels);
        let (dense, k) = renumber(&partition);

        for a in mapping.iter_mut() {
            *a = dense[*a];
        }
        if k == current.len() {
            return Ok(mapping);
        }
        current = current.aggregate(&dense, k);
    }

    Err(GraphRagError::CommunityDetection(format!(
        "louvain did not converge within {max_levels} levels"
    )))
}

/// Modularity of `membership` on `graph`, for reporting.
pub(crate) fn modularity(graph: &WeightedGraph, membership: &[usize], resolution: f64) -> f64 {
    if graph.total_degree <= 0.0 {
        return 0.0;
    }
    let k = membership.iter().copied().max().map_or(0, |m| m + 1);
    let mut internal = vec![0.0; k];
    let mut degree = vec![0.0; k];
    for v in 0..graph.len() {
        let c = membership[v];
        degree[c] += graph.degree[v];
        internal[c] += 2.0 * graph.self_weight[v];
        for &(u, w) in &graph.adj[v] {
            if membership[u] == c {
                internal[c] += w;
            }
        }
    }
    let m2 = graph.total_degree;
    internal
        .iter()
        .zip(&degree)
        .map(|(&e, &d)| e / m2 - resolution * (d / m2).powi(2))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::weighted::tests::two_cliques;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_louvain_separates_cliques() {
        let g = two_cliques();
        let membership = louvain(&g, 1.0, &mut StdRng::seed_from_u64(3), 50).unwrap();
        assert!(membership[..4].iter().all(|&c| c == membership[0]));
        assert!(membership[4..].iter().all(|&c| c == membership[4]));
        assert_ne!(membership[0], membership[4]);
        assert!(modularity(&g, &membership, 1.0) > 0.3);
    }

    #[test]
    fn test_modularity_of_single_community_is_zero() {
        let g = two_cliques();
        let q = modularity(&g, &[0; 8], 1.0);
        assert!(q.abs() < 1e-9);
    }
}
