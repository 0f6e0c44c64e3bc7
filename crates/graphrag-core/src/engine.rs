//! Question answering entry point.

use tracing::{info, warn};

use crate::answer::{Answer, AnswerSynthesizer, OutputFormat};
use crate::error::{GraphRagError, GraphRagResult};
use crate::retrieval::{GraphRetriever, QueryContext};

/// Retrieval plus synthesis behind one call.
pub struct GraphRagEngine {
    retriever: GraphRetriever,
    synthesizer: AnswerSynthesizer,
    source_document_label: String,
}

/// An answer with the context it was built from, when retrieval succeeded.
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub answer: Answer,
    pub context: Option<QueryContext>,
}

impl GraphRagEngine {
    pub fn new(retriever: GraphRetriever, synthesizer: AnswerSynthesizer, source_document_label: impl Into<String>) -> Self {
        Self {
            retriever,
            synthesizer,
            source_document_label: source_document_label.into(),
        }
    }

    /// Answer `question`. Only an empty question is an error; store or model
    /// failures degrade to the insufficient-information answer.
    pub async fn ask(&self, question: &str) -> GraphRagResult<Answer> {
        Ok(self.ask_with_context(question).await?.answer)
    }

    pub async fn ask_with_context(&self, question: &str) -> GraphRagResult<AskOutcome> {
        if question.trim().is_empty() {
            return Err(GraphRagError::InvalidQuestion("question is empty".to_string()));
        }

        let context = match self.retriever.retrieve(question).await {
            Ok(ctx) => ctx,
            Err(e @ GraphRagError::InvalidQuestion(_)) => return Err(e),
            Err(e) => {
                warn!(error = %e, "Retrieval failed");
                return Ok(AskOutcome {
                    answer: Answer::insufficient(&self.source_document_label),
                    context: None,
                });
            }
        };

        let answer = self.synthesizer.synthesize(&context).await;
        info!(
            state = ?context.state,
            citations = answer.cited_source_ids.len(),
            "Question answered"
        );
        Ok(AskOutcome {
            answer,
            context: Some(context),
        })
    }

    /// Answer and render in the requested format.
    pub async fn ask_formatted(&self, question: &str, format: OutputFormat) -> GraphRagResult<String> {
        let answer = self.ask(question).await?;
        Ok(match format {
            OutputFormat::Json => serde_json::to_string_pretty(&answer)?,
            OutputFormat::Text => answer.render_text(),
        })
    }
}
