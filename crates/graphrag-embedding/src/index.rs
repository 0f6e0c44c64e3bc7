//! Similarity index over community profiles.
//!
//! Vectors live in a [`VectorIndex`] backend under their position; the
//! metadata file maps position `i` to the community it describes and is the
//! only authority on that mapping.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use graphrag_core::community::CommunityProfile;
use graphrag_core::config::{IndexMetric, IndexSettings};
use graphrag_core::persist;
use graphrag_core::{EmbeddingService, GraphRagError, GraphRagResult, RetryPolicy};

use crate::vector::VectorIndex;

/// Metadata for one indexed community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexItem {
    pub community_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub member_count: usize,
}

/// Contents of the metadata file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub meta_count: usize,
    pub dim: usize,
    pub metric: IndexMetric,
    pub embed_model: String,
    #[serde(default)]
    pub built_at: Option<DateTime<Utc>>,
    pub items: Vec<IndexItem>,
}

/// One search result; `rank` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexHit {
    pub community: IndexItem,
    pub score: f32,
    pub rank: usize,
}

impl IndexMeta {
    pub fn load(path: &Path) -> GraphRagResult<Self> {
        if !path.exists() {
            return Err(GraphRagError::InputFormat(format!(
                "community index not found at {} (run `graphrag index`)",
                path.display()
            )));
        }
        persist::read_json(path)
    }

    pub fn save(&self, path: &Path) -> GraphRagResult<()> {
        persist::write_json_atomic(path, self)?;
        info!(path = %path.display(), count = self.items.len(), dim = self.dim, "Saved community index metadata");
        Ok(())
    }
}

#[derive(Clone)]
pub struct CommunityIndex {
    meta: IndexMeta,
    backend: Arc<dyn VectorIndex>,
}

/// Text embedded for a profile.
pub fn composite_text(profile: &CommunityProfile, keyword_limit: usize) -> String {
    let id = profile.community_id.trim();
    let mut parts = vec![format!("COMMUNITY {id}")];
    let title = profile.title.trim();
    if !title.is_empty() {
        parts.push(format!("TITLE: {title}"));
    }
    let summary = profile.summary.trim();
    if !summary.is_empty() {
        parts.push(format!("SUMMARY: {summary}"));
    }
    let keywords: Vec<&str> = profile
        .keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .take(keyword_limit)
        .collect();
    if !keywords.is_empty() {
        parts.push(format!("KEYWORDS: {}", keywords.join(", ")));
    }
    parts.join("\n")
}

impl CommunityIndex {
    /// Metadata read back from disk over an already populated backend.
    pub fn new(meta: IndexMeta, backend: Arc<dyn VectorIndex>) -> Self {
        Self { meta, backend }
    }

    /// Embed every profile that carries a community id and rebuild `backend`
    /// from scratch.
    pub async fn build(
        profiles: &[CommunityProfile],
        embedder: &dyn EmbeddingService,
        backend: Arc<dyn VectorIndex>,
        settings: &IndexSettings,
        retry: &RetryPolicy,
    ) -> GraphRagResult<Self> {
        let mut items = Vec::new();
        let mut texts = Vec::new();
        let mut dropped = 0;
        for profile in profiles {
            if profile.community_id.trim().is_empty() {
                dropped += 1;
                continue;
            }
            texts.push(composite_text(profile, settings.keyword_limit));
            items.push(IndexItem {
                community_id: profile.community_id.trim().to_string(),
                title: profile.title.trim().to_string(),
                summary: profile.summary.trim().to_string(),
                keywords: profile.keywords.iter().take(settings.metadata_keyword_limit).cloned().collect(),
                member_count: profile.member_count,
            });
        }
        if texts.is_empty() {
            return Err(GraphRagError::InputFormat(
                "no indexable community profile (every profile lacks a community id)".to_string(),
            ));
        }
        info!(indexed = texts.len(), dropped, "Embedding community profiles");

        let batch_size = embedder.max_batch_size().max(1);
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for (n, batch) in texts.chunks(batch_size).enumerate() {
            let label = format!("embed batch {}", n + 1);
            let batch_vectors = retry.run(&label, || embedder.embed_batch(batch)).await?;
            if batch_vectors.len() != batch.len() {
                return Err(GraphRagError::permanent(
                    embedder.model(),
                    format!("batch of {} texts returned {} vectors", batch.len(), batch_vectors.len()),
                ));
            }
            vectors.extend(batch_vectors);
        }

        let dim = vectors.first().map_or(0, Vec::len);
        if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
            return Err(GraphRagError::permanent(
                embedder.model(),
                "embeddings are empty or have inconsistent dimensions",
            ));
        }
        backend.rebuild(settings.metric, dim, &vectors, &items).await?;
        info!(backend = backend.name(), count = items.len(), dim, "Community index rebuilt");

        Ok(Self {
            meta: IndexMeta {
                meta_count: items.len(),
                dim,
                metric: settings.metric,
                embed_model: embedder.model().to_string(),
                built_at: Some(Utc::now()),
                items,
            },
            backend,
        })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn len(&self) -> usize {
        self.meta.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.items.is_empty()
    }

    /// Nearest communities to an already-embedded query.
    ///
    /// Positions the metadata does not describe are dropped.
    pub async fn search_vector(&self, query: &[f32], k: usize) -> GraphRagResult<Vec<IndexHit>> {
        if query.len() != self.meta.dim {
            return Err(GraphRagError::GraphInconsistency(format!(
                "query has dimension {}, index has {}",
                query.len(),
                self.meta.dim
            )));
        }
        let scored = self.backend.nearest(query, k).await?;
        let found = scored.len();
        let hits: Vec<IndexHit> = scored
            .into_iter()
            .filter_map(|(i, score)| self.meta.items.get(i).map(|item| (item, score)))
            .take(k)
            .enumerate()
            .map(|(rank, (item, score))| IndexHit {
                community: item.clone(),
                score,
                rank: rank + 1,
            })
            .collect();
        if hits.len() < found {
            warn!(
                skipped = found - hits.len(),
                items = self.meta.items.len(),
                "Index positions outside the metadata were ignored"
            );
        }
        Ok(hits)
    }

    /// Embed `text` and search.
    pub async fn search(&self, text: &str, embedder: &dyn EmbeddingService, k: usize) -> GraphRagResult<Vec<IndexHit>> {
        let query = embedder.embed(text).await?;
        self.search_vector(&query, k).await
    }
}
