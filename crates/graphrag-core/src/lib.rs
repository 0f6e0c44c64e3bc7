//! GraphRAG Core Library
//!
//! Entity graph construction, community detection and profiling, and
//! graph-grounded question answering over the Code Général des Impôts.

pub mod answer;
pub mod community;
pub mod config;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod graph;
pub mod json;
pub mod persist;
pub mod retrieval;
pub mod retry;
pub mod services;
pub mod text;

pub use answer::{Answer, AnswerSynthesizer, OutputFormat};
pub use config::Settings;
pub use engine::{AskOutcome, GraphRagEngine};
pub use error::{GraphRagError, GraphRagResult};
pub use retry::RetryPolicy;
pub use services::{CommunityRouter, CompletionRequest, CompletionService, EmbeddingService};
