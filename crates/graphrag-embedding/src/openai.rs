//! OpenAI-compatible HTTP client (`/v1/embeddings`, `/v1/chat/completions`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use graphrag_core::config::LlmSettings;
use graphrag_core::{CompletionRequest, CompletionService, EmbeddingService, GraphRagError, GraphRagResult};

use crate::http;

const SERVICE: &str = "openai";

#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    chat_model: String,
    embed_model: String,
    batch_size: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Requires an API key; a missing key is a configuration error.
    pub fn new(settings: &LlmSettings) -> GraphRagResult<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GraphRagError::config("OPENAI_API_KEY is not set"))?;
        Ok(Self {
            base_url: settings.endpoint(),
            api_key,
            chat_model: settings.chat_model.clone(),
            embed_model: settings.embed_model.clone(),
            batch_size: settings.embed_batch_size.max(1),
            client: http::client(settings.timeout_secs)?,
        })
    }

    fn url(&self, path: &str) -> String {
        // Accept base URLs given with or without the version segment.
        if self.base_url.ends_with("/v1") {
            format!("{}/{}", self.base_url, path)
        } else {
            format!("{}/v1/{}", self.base_url, path)
        }
    }
}

fn chat_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    let mut body = json!({
        "model": model,
        "temperature": request.temperature,
        "messages": [
            {"role": "system", "content": request.system},
            {"role": "user", "content": request.user},
        ],
    });
    if request.json_mode {
        body["response_format"] = json!({"type": "json_object"});
    }
    body
}

/// Order vectors by their reported index.
fn ordered_vectors(mut data: Vec<EmbeddingItem>) -> Vec<Vec<f32>> {
    data.sort_by_key(|item| item.index);
    data.into_iter().map(|item| item.embedding).collect()
}

#[async_trait]
impl EmbeddingService for OpenAiClient {
    fn model(&self) -> &str {
        &self.embed_model
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> GraphRagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = self
            .client
            .post(self.url("embeddings"))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsRequest {
                model: &self.embed_model,
                input: texts,
            });
        let response: EmbeddingsResponse = http::send_json(SERVICE, request).await?;
        let vectors = ordered_vectors(response.data);
        if vectors.len() != texts.len() {
            return Err(GraphRagError::permanent(
                SERVICE,
                format!("asked for {} embeddings, got {}", texts.len(), vectors.len()),
            ));
        }
        debug!(count = vectors.len(), "Generated embeddings");
        Ok(vectors)
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    fn model(&self) -> &str {
        &self.chat_model
    }

    async fn complete(&self, request: &CompletionRequest) -> GraphRagResult<String> {
        let http_request = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&chat_body(&self.chat_model, request));
        let response: ChatCompletion = http::send_json(SERVICE, http_request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GraphRagError::permanent(SERVICE, "completion returned no choices"))
    }
}

#[cfg(test)]
mod tests {
    use graphrag_core::config::LlmProvider;

    use super::*;

    fn settings(base_url: Option<&str>, key: Option<&str>) -> LlmSettings {
        LlmSettings {
            provider: LlmProvider::OpenAi,
            base_url: base_url.map(str::to_string),
            api_key: key.map(str::to_string),
            ..LlmSettings::default()
        }
    }

    #[test]
    fn test_missing_key_is_config_error() {
        assert!(matches!(
            OpenAiClient::new(&settings(None, None)),
            Err(GraphRagError::Config(_))
        ));
        assert!(matches!(
            OpenAiClient::new(&settings(None, Some("  "))),
            Err(GraphRagError::Config(_))
        ));
    }

    #[test]
    fn test_url_with_and_without_version() {
        let a = OpenAiClient::new(&settings(None, Some("sk-test"))).unwrap();
        assert_eq!(a.url("embeddings"), "https://api.openai.com/v1/embeddings");
        let b = OpenAiClient::new(&settings(Some("http://proxy:8080/v1"), Some("sk-test"))).unwrap();
        assert_eq!(b.url("chat/completions"), "http://proxy:8080/v1/chat/completions");
    }

    #[test]
    fn test_embeddings_are_reordered_by_index() {
        let raw = r#"{"data": [{"index": 1, "embedding": [2.0]}, {"index": 0, "embedding": [1.0]}]}"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(ordered_vectors(parsed.data), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_chat_body_requests_json_object() {
        let body = chat_body("gpt-4o-mini", &CompletionRequest::new("s", "u", 0.1));
        assert_eq!(body["response_format"]["type"], json!("json_object"));
        assert_eq!(body["messages"][0]["role"], json!("system"));
    }
}
