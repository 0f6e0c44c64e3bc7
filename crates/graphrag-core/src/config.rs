//! Runtime configuration.
//!
//! Settings come from an optional TOML file (`graphrag.toml` by default) in
//! which every section may be omitted, followed by environment overrides:
//! - `NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD`, `NEO4J_DATABASE`
//! - `GRAPHRAG_LLM_PROVIDER` (`ollama` or `openai`)
//! - `OLLAMA_URL`, `OPENAI_BASE_URL`, `OPENAI_API_KEY`
//! - `GRAPHRAG_CHAT_MODEL`, `GRAPHRAG_EMBED_MODEL`
//! - `GRAPHRAG_DATA_DIR`
//! - `QDRANT_URL`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::community::detect::DetectionMethod;
use crate::error::{GraphRagError, GraphRagResult};
use crate::retry::RetryPolicy;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "graphrag.toml";

/// Default Qdrant gRPC URL.
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";

/// Default collection holding community vectors.
pub const DEFAULT_COLLECTION: &str = "graphrag_communities";

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding every pipeline artifact.
    pub data_dir: PathBuf,
    /// Label of the regulatory document answers are attributed to.
    pub source_document_label: String,
    pub neo4j: Neo4jSettings,
    pub llm: LlmSettings,
    pub extraction: ExtractionSettings,
    pub detection: DetectionSettings,
    pub selection: SelectionSettings,
    pub profiling: ProfilingSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub answer: AnswerSettings,
    #[serde(skip_serializing)]
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            source_document_label: "Code Général des Impôts".to_string(),
            neo4j: Neo4jSettings::default(),
            llm: LlmSettings::default(),
            extraction: ExtractionSettings::default(),
            detection: DetectionSettings::default(),
            selection: SelectionSettings::default(),
            profiling: ProfilingSettings::default(),
            index: IndexSettings::default(),
            retrieval: RetrievalSettings::default(),
            answer: AnswerSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
        }
    }
}

/// Which hosted model API serves chat and embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Ollama,
    OpenAi,
}

impl std::str::FromStr for LlmProvider {
    type Err = GraphRagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(GraphRagError::config(format!("unknown LLM provider '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embed_model: String,
    pub timeout_secs: u64,
    pub embed_batch_size: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Ollama,
            base_url: None,
            api_key: None,
            chat_model: "qwen2.5:7b".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            timeout_secs: 120,
            embed_batch_size: 64,
        }
    }
}

impl LlmSettings {
    /// Endpoint to talk to, falling back to the provider default.
    pub fn endpoint(&self) -> String {
        match (&self.base_url, self.provider) {
            (Some(url), _) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
            (_, LlmProvider::Ollama) => "http://localhost:11434".to_string(),
            (_, LlmProvider::OpenAi) => "https://api.openai.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Entities below this confidence are not offered to relation extraction.
    pub min_entity_confidence: f64,
    pub max_evidence_words: usize,
    pub concurrency: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            min_entity_confidence: 0.55,
            max_evidence_words: 25,
            concurrency: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub method: DetectionMethod,
    pub resolution: f64,
    pub min_size: usize,
    pub seed: Option<u64>,
    pub max_iterations: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            method: DetectionMethod::Leiden,
            resolution: 0.6,
            min_size: 8,
            seed: Some(42),
            max_iterations: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSettings {
    pub coverage_target: f64,
    pub cap: usize,
    pub min_size: usize,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            coverage_target: 0.85,
            cap: 500,
            min_size: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingSettings {
    pub sample_size: usize,
    pub concurrency: usize,
    pub temperature: f32,
}

impl Default for ProfilingSettings {
    fn default() -> Self {
        Self {
            sample_size: 120,
            concurrency: 4,
            temperature: 0.2,
        }
    }
}

/// Similarity used by the community index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMetric {
    /// Unit-normalized vectors scored by inner product; higher is closer.
    #[default]
    Cosine,
    /// Euclidean distance; lower is closer.
    L2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub metric: IndexMetric,
    /// Keywords folded into the embedded text.
    pub keyword_limit: usize,
    /// Keywords kept in the metadata file.
    pub metadata_keyword_limit: usize,
    /// Qdrant gRPC endpoint.
    pub qdrant_url: String,
    /// Collection rebuilt by every `index` run.
    pub collection: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            metric: IndexMetric::Cosine,
            keyword_limit: 25,
            metadata_keyword_limit: 50,
            qdrant_url: DEFAULT_QDRANT_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub max_candidates: usize,
    pub min_word_len: usize,
    pub top_entities: usize,
    pub top_communities: usize,
    pub top_triples: usize,
    /// Domain terms always picked up as candidates, matched case-insensitively.
    pub domain_keywords: Vec<String>,
    /// Related community briefs pulled from the semantic router; 0 disables it.
    pub semantic_communities: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            max_candidates: 30,
            min_word_len: 4,
            top_entities: 8,
            top_communities: 3,
            top_triples: 40,
            domain_keywords: ["impôt", "impot", "taxe", "TVA", "IR", "IS", "CGI", "dahir", "loi", "article"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            semantic_communities: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerSettings {
    pub temperature: f32,
    /// Ids listed inside one citation before collapsing to `+more`.
    pub max_cited_ids: usize,
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_cited_ids: 5,
        }
    }
}

impl Settings {
    /// Load from `path` when given, else from `graphrag.toml` if it exists,
    /// else defaults; then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> GraphRagResult<Self> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> GraphRagResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GraphRagError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> GraphRagResult<Self> {
        toml::from_str(raw).map_err(|e| GraphRagError::config(format!("invalid TOML: {e}")))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> GraphRagResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> GraphRagResult<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("NEO4J_URI") {
            self.neo4j.uri = v;
        }
        if let Some(v) = get("NEO4J_USER") {
            self.neo4j.user = v;
        }
        if let Some(v) = get("NEO4J_PASSWORD") {
            self.neo4j.password = v;
        }
        if let Some(v) = get("NEO4J_DATABASE") {
            self.neo4j.database = v;
        }
        if let Some(v) = get("GRAPHRAG_LLM_PROVIDER") {
            self.llm.provider = v.parse()?;
        }
        match self.llm.provider {
            LlmProvider::Ollama => {
                if let Some(v) = get("OLLAMA_URL") {
                    self.llm.base_url = Some(v);
                }
            }
            LlmProvider::OpenAi => {
                if let Some(v) = get("OPENAI_BASE_URL") {
                    self.llm.base_url = Some(v);
                }
            }
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("GRAPHRAG_CHAT_MODEL") {
            self.llm.chat_model = v;
        }
        if let Some(v) = get("GRAPHRAG_EMBED_MODEL") {
            self.llm.embed_model = v;
        }
        if let Some(v) = get("GRAPHRAG_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("QDRANT_URL") {
            self.index.qdrant_url = v;
        }
        Ok(())
    }

    /// Reject values no pipeline stage can work with.
    pub fn validate(&self) -> GraphRagResult<()> {
        let d = &self.detection;
        if !d.resolution.is_finite() || d.resolution <= 0.0 {
            return Err(GraphRagError::config("detection.resolution must be a positive number"));
        }
        let s = &self.selection;
        if !(s.coverage_target > 0.0 && s.coverage_target <= 1.0) {
            return Err(GraphRagError::config("selection.coverage_target must be in (0, 1]"));
        }
        if s.cap == 0 {
            return Err(GraphRagError::config("selection.cap must be at least 1"));
        }
        if self.profiling.sample_size == 0 {
            return Err(GraphRagError::config("profiling.sample_size must be at least 1"));
        }
        if self.llm.embed_batch_size == 0 {
            return Err(GraphRagError::config("llm.embed_batch_size must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(GraphRagError::config("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Fail before any side effect when the chosen provider lacks credentials.
    pub fn require_llm_credentials(&self) -> GraphRagResult<()> {
        if self.llm.provider == LlmProvider::OpenAi && self.llm.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(GraphRagError::config("OPENAI_API_KEY is required for the openai provider"));
        }
        Ok(())
    }

    /// Fail before connecting when no graph database password is configured.
    pub fn require_neo4j_credentials(&self) -> GraphRagResult<()> {
        if self.neo4j.password.is_empty() {
            return Err(GraphRagError::config("NEO4J_PASSWORD is not set"));
        }
        Ok(())
    }

    /// Path of a named artifact under the data directory.
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    pub fn chunks_path(&self) -> PathBuf {
        self.artifact("chunks.json")
    }

    pub fn extraction_path(&self) -> PathBuf {
        self.artifact("extraction.jsonl")
    }

    pub fn nodes_path(&self) -> PathBuf {
        self.artifact("nodes.json")
    }

    pub fn edges_path(&self) -> PathBuf {
        self.artifact("edges.json")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.artifact("communities.json")
    }

    pub fn selection_path(&self) -> PathBuf {
        self.artifact("community_selection.json")
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.artifact("community_profiles.json")
    }

    pub fn index_vectors_path(&self) -> PathBuf {
        self.artifact("community_index.vectors.json")
    }

    pub fn index_meta_path(&self) -> PathBuf {
        self.artifact("community_index.meta.json")
    }
}
