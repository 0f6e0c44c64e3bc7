//! Vector backends behind the community index.
//!
//! A backend stores one vector per index position and answers nearest
//! neighbor queries with positions. Mapping a position back to a community
//! is the metadata file's job, never the backend's.

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

use graphrag_core::config::IndexMetric;
use graphrag_core::persist;
use graphrag_core::{GraphRagError, GraphRagResult};

use crate::index::IndexItem;

/// Nearest-neighbor storage keyed by index position.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend name for logs and errors.
    fn name(&self) -> &str;

    /// Drop everything previously stored and store `vectors`, vector `i`
    /// under position `i` with `items[i]` as its payload.
    async fn rebuild(&self, metric: IndexMetric, dim: usize, vectors: &[Vec<f32>], items: &[IndexItem]) -> GraphRagResult<()>;

    /// Up to `k` `(position, score)` pairs, closest first.
    async fn nearest(&self, query: &[f32], k: usize) -> GraphRagResult<Vec<(usize, f32)>>;
}

#[derive(Debug, Default)]
struct MemoryVectors {
    metric: IndexMetric,
    vectors: Vec<Vec<f32>>,
}

/// Exhaustive in-process backend, persisted as a JSON vector file.
///
/// Used by `--offline` runs and tests.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    state: RwLock<MemoryVectors>,
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

fn poisoned() -> GraphRagError {
    GraphRagError::storage("vector index lock poisoned")
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a vector file written by [`MemoryVectorIndex::save`].
    pub fn load(path: &Path, metric: IndexMetric) -> GraphRagResult<Self> {
        if !path.exists() {
            return Err(GraphRagError::InputFormat(format!(
                "index vectors not found at {} (run `graphrag --offline index`)",
                path.display()
            )));
        }
        let vectors: Vec<Vec<f32>> = persist::read_json(path)?;
        Ok(Self {
            state: RwLock::new(MemoryVectors { metric, vectors }),
        })
    }

    pub fn save(&self, path: &Path) -> GraphRagResult<()> {
        let state = self.state.read().map_err(|_| poisoned())?;
        persist::write_json_atomic(path, &state.vectors)?;
        info!(path = %path.display(), count = state.vectors.len(), "Saved index vectors");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().map_or(0, |s| s.vectors.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn rebuild(&self, metric: IndexMetric, _dim: usize, vectors: &[Vec<f32>], _items: &[IndexItem]) -> GraphRagResult<()> {
        let mut vectors = vectors.to_vec();
        if metric == IndexMetric::Cosine {
            vectors.iter_mut().for_each(|v| normalize(v));
        }
        let mut state = self.state.write().map_err(|_| poisoned())?;
        *state = MemoryVectors { metric, vectors };
        Ok(())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> GraphRagResult<Vec<(usize, f32)>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut scored: Vec<(usize, f32)> = match state.metric {
            IndexMetric::Cosine => {
                let mut query = query.to_vec();
                normalize(&mut query);
                state.vectors.iter().enumerate().map(|(i, v)| (i, dot(&query, v))).collect()
            }
            IndexMetric::L2 => state
                .vectors
                .iter()
                .enumerate()
                .map(|(i, v)| (i, euclidean(query, v)))
                .collect(),
        };
        let metric = state.metric;
        scored.sort_by(|a, b| {
            let by_score = match metric {
                IndexMetric::Cosine => b.1.total_cmp(&a.1),
                IndexMetric::L2 => a.1.total_cmp(&b.1),
            };
            by_score.then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rebuild_replaces_previous_vectors() {
        let index = MemoryVectorIndex::new();
        index
            .rebuild(IndexMetric::Cosine, 2, &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]], &[])
            .await
            .unwrap();
        assert_eq!(index.len(), 3);
        index.rebuild(IndexMetric::Cosine, 2, &[vec![0.0, 3.0]], &[]).await.unwrap();
        assert_eq!(index.len(), 1);

        let hits = index.nearest(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_cosine_ties_break_on_position() {
        let index = MemoryVectorIndex::new();
        index
            .rebuild(IndexMetric::Cosine, 2, &[vec![0.0, 1.0], vec![2.0, 0.0], vec![5.0, 0.0]], &[])
            .await
            .unwrap();
        let hits = index.nearest(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_l2_distance_and_file_round_trip() {
        let index = MemoryVectorIndex::new();
        index
            .rebuild(IndexMetric::L2, 2, &[vec![3.0, 4.0], vec![1.0, 1.0]], &[])
            .await
            .unwrap();
        let hits = index.nearest(&[0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1], (0, 5.0));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        index.save(&path).unwrap();
        let loaded = MemoryVectorIndex::load(&path, IndexMetric::L2).unwrap();
        assert_eq!(loaded.nearest(&[3.0, 4.0], 1).await.unwrap(), vec![(0, 0.0)]);
        assert!(matches!(
            MemoryVectorIndex::load(&dir.path().join("absent.json"), IndexMetric::L2),
            Err(GraphRagError::InputFormat(_))
        ));
    }
}
