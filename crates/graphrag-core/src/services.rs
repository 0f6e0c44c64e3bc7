//! Interfaces to the generative model, embedding model and semantic router.
//!
//! Implementations live outside this crate (HTTP clients) or in tests
//! (in-process fakes). Every pipeline stage takes them as explicit handles.

use async_trait::async_trait;

use crate::error::GraphRagResult;
use crate::graph::model::CommunityBrief;

/// One chat-style completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Ask the provider for a JSON-only response when it supports that.
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>, temperature: f32) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature,
            json_mode: true,
        }
    }
}

/// Generative text service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> GraphRagResult<String>;
}

/// Text embedding service.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    fn model(&self) -> &str;

    /// Largest batch one `embed_batch` call accepts.
    fn max_batch_size(&self) -> usize;

    /// Embed up to [`Self::max_batch_size`] texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> GraphRagResult<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> GraphRagResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            crate::error::GraphRagError::permanent(self.model(), "embedding response contained no vector")
        })
    }
}

/// Maps a question onto semantically close communities.
#[async_trait]
pub trait CommunityRouter: Send + Sync {
    async fn route(&self, question: &str, k: usize) -> GraphRagResult<Vec<CommunityBrief>>;
}
