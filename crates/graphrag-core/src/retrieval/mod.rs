//! Question-time retrieval over the knowledge graph.

pub mod candidates;
pub mod retriever;

pub use candidates::CandidateExtractor;
pub use retriever::{GraphRetriever, InsufficientReason, QueryContext, RetrievalState};
