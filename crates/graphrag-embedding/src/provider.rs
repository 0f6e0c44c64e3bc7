//! Provider selection from settings.

use std::sync::Arc;

use tracing::info;

use graphrag_core::config::{LlmProvider, LlmSettings};
use graphrag_core::{CompletionService, EmbeddingService, GraphRagResult};

use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;

/// Shared model handles, built once per process.
#[derive(Clone)]
pub struct Providers {
    pub completion: Arc<dyn CompletionService>,
    pub embedding: Arc<dyn EmbeddingService>,
}

impl Providers {
    pub fn from_settings(settings: &LlmSettings) -> GraphRagResult<Self> {
        let providers = match settings.provider {
            LlmProvider::Ollama => {
                let client = Arc::new(OllamaClient::new(settings)?);
                Self {
                    completion: client.clone(),
                    embedding: client,
                }
            }
            LlmProvider::OpenAi => {
                let client = Arc::new(OpenAiClient::new(settings)?);
                Self {
                    completion: client.clone(),
                    embedding: client,
                }
            }
        };
        info!(
            provider = ?settings.provider,
            endpoint = %settings.endpoint(),
            chat_model = providers.completion.model(),
            embed_model = providers.embedding.model(),
            "Model providers ready"
        );
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrag_core::GraphRagError;

    #[test]
    fn test_selects_provider() {
        let ollama = Providers::from_settings(&LlmSettings::default()).unwrap();
        assert_eq!(ollama.completion.model(), "qwen2.5:7b");
        assert_eq!(ollama.embedding.max_batch_size(), 64);

        let openai = LlmSettings {
            provider: LlmProvider::OpenAi,
            ..LlmSettings::default()
        };
        assert!(matches!(Providers::from_settings(&openai), Err(GraphRagError::Config(_))));
    }
}
