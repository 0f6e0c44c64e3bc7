//! Semantic community routing through the profile index.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use graphrag_core::graph::CommunityBrief;
use graphrag_core::{CommunityRouter, EmbeddingService, GraphRagResult};

use crate::index::{CommunityIndex, IndexHit};

pub struct IndexRouter {
    index: CommunityIndex,
    embedder: Arc<dyn EmbeddingService>,
}

impl IndexRouter {
    pub fn new(index: CommunityIndex, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self { index, embedder }
    }

    pub async fn hits(&self, question: &str, k: usize) -> GraphRagResult<Vec<IndexHit>> {
        self.index.search(question, self.embedder.as_ref(), k).await
    }
}

#[async_trait]
impl CommunityRouter for IndexRouter {
    async fn route(&self, question: &str, k: usize) -> GraphRagResult<Vec<CommunityBrief>> {
        let hits = self.hits(question, k).await?;
        debug!(
            hits = ?hits.iter().map(|h| (h.community.community_id.as_str(), h.score)).collect::<Vec<_>>(),
            "Semantic routing"
        );
        Ok(hits
            .into_iter()
            .map(|hit| CommunityBrief {
                id: hit.community.community_id,
                size: hit.community.member_count,
                title: hit.community.title,
                summary: hit.community.summary,
                keywords: hit.community.keywords,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::composite_text;
    use crate::index::tests::{profiles, LetterEmbedder};
    use crate::vector::MemoryVectorIndex;
    use graphrag_core::config::IndexSettings;
    use graphrag_core::RetryPolicy;

    #[tokio::test]
    async fn test_routes_to_closest_profile() {
        let embedder = Arc::new(LetterEmbedder::new(16));
        let profiles = profiles();
        let index = CommunityIndex::build(
            &profiles,
            embedder.as_ref(),
            Arc::new(MemoryVectorIndex::new()),
            &IndexSettings::default(),
            &RetryPolicy::immediate(1),
        )
        .await
        .unwrap();
        let router = IndexRouter::new(index, embedder);

        let briefs = router.route(&composite_text(&profiles[1], 25), 2).await.unwrap();
        assert_eq!(briefs.len(), 2);
        assert_eq!(briefs[0].id, "1");
        assert_eq!(briefs[0].title, "Impot sur le revenu");
        assert_eq!(briefs[0].size, 10);
    }
}
