//! # GraphRAG Embedding
//!
//! Model providers (Ollama, OpenAI) and the community profile index used for
//! semantic routing, backed by Qdrant or an in-process vector file.

mod http;
pub mod index;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod qdrant;
pub mod router;
pub mod vector;

pub use index::{CommunityIndex, IndexHit, IndexItem, IndexMeta};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use provider::Providers;
pub use qdrant::QdrantVectorIndex;
pub use router::IndexRouter;
pub use vector::{MemoryVectorIndex, VectorIndex};
