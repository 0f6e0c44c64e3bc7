//! Centralized error types for GraphRAG.

use thiserror::Error;

/// Main error type for GraphRAG operations.
#[derive(Error, Debug)]
pub enum GraphRagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unexpected input format: {0}")]
    InputFormat(String),

    #[error("{service} call failed: {message}")]
    ExternalService {
        service: String,
        message: String,
        transient: bool,
    },

    #[error("Graph inconsistency: {0}")]
    GraphInconsistency(String),

    #[error("Model response violated the JSON contract: {0}")]
    ResponseContract(String),

    #[error("Community detection failed: {0}")]
    CommunityDetection(String),

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for GraphRAG operations.
pub type GraphRagResult<T> = Result<T, GraphRagError>;

impl GraphRagError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// A failure worth retrying (rate limit, timeout, 5xx).
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// A failure that will not go away on retry (bad request, auth).
    pub fn permanent(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Whether a retry policy should try again after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExternalService { transient: true, .. })
    }
}
