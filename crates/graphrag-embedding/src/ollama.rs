//! Ollama HTTP client for embeddings and chat completions.
//!
//! Uses `/api/embed` for batched embeddings and `/api/chat` for
//! non-streaming completions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use graphrag_core::config::LlmSettings;
use graphrag_core::{CompletionRequest, CompletionService, EmbeddingService, GraphRagError, GraphRagResult};

use crate::http;

const SERVICE: &str = "ollama";

/// Ollama client serving both the chat and the embedding model.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    chat_model: String,
    embed_model: String,
    batch_size: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(settings: &LlmSettings) -> GraphRagResult<Self> {
        Ok(Self {
            base_url: settings.endpoint(),
            chat_model: settings.chat_model.clone(),
            embed_model: settings.embed_model.clone(),
            batch_size: settings.embed_batch_size.max(1),
            client: http::client(settings.timeout_secs)?,
        })
    }

    /// Check if the Ollama service is up and the chat model is pulled.
    pub async fn health_check(&self) -> bool {
        let response = self.client.get(format!("{}/api/tags", self.base_url)).send().await;
        match response {
            Ok(resp) if resp.status().is_success() => {
                let text = resp.text().await.unwrap_or_default();
                text.contains(&self.chat_model)
            }
            _ => false,
        }
    }
}

fn chat_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    let mut body = json!({
        "model": model,
        "stream": false,
        "messages": [
            {"role": "system", "content": request.system},
            {"role": "user", "content": request.user},
        ],
        "options": {"temperature": request.temperature},
    });
    if request.json_mode {
        body["format"] = json!("json");
    }
    body
}

#[async_trait]
impl EmbeddingService for OllamaClient {
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
        let request = self.client.post(format!("{}/api/embed", self.base_url)).json(&EmbedRequest {
            model: &self.embed_model,
            input: texts,
        });
        let response: EmbedResponse = http::send_json(SERVICE, request).await?;

        if response.embeddings.len() != texts.len() {
            return Err(GraphRagError::permanent(
                SERVICE,
                format!("asked for {} embeddings, got {}", texts.len(), response.embeddings.len()),
            ));
        }
        debug!(
            count = response.embeddings.len(),
            dim = response.embeddings.first().map_or(0, Vec::len),
            "Generated embeddings"
        );
        Ok(response.embeddings)
    }
}

#[async_trait]
impl CompletionService for OllamaClient {
    fn model(&self) -> &str {
        &self.chat_model
    }

    async fn complete(&self, request: &CompletionRequest) -> GraphRagResult<String> {
        let http_request = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&chat_body(&self.chat_model, request));
        let response: ChatResponse = http::send_json(SERVICE, http_request).await?;
        debug!(chars = response.message.content.len(), "Ollama completion");
        Ok(response.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_body_shape() {
        let request = CompletionRequest::new("sys", "user", 0.0);
        let body = chat_body("qwen2.5:7b", &request);
        assert_eq!(body["stream"], json!(false));
        assert_eq!(body["format"], json!("json"));
        assert_eq!(body["messages"][1]["content"], json!("user"));

        let plain = CompletionRequest {
            json_mode: false,
            ..request
        };
        assert!(chat_body("m", &plain).get("format").is_none());
    }

    #[test]
    fn test_parses_embed_response() {
        let raw = r#"{"model": "nomic-embed-text", "embeddings": [[0.1, 0.2], [0.3, 0.4]]}"#;
        let parsed: EmbedResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
    }

    #[test]
    fn test_client_uses_configured_endpoint() {
        let settings = LlmSettings {
            base_url: Some("http://ollama:11434/".to_string()),
            ..LlmSettings::default()
        };
        let client = OllamaClient::new(&settings).unwrap();
        assert_eq!(client.base_url, "http://ollama:11434");
        assert_eq!(EmbeddingService::model(&client), "nomic-embed-text");
        assert_eq!(CompletionService::model(&client), "qwen2.5:7b");
    }
}
