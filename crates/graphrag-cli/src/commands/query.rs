//! Question answering and index search.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::debug;

use graphrag_core::retrieval::GraphRetriever;
use graphrag_core::{AnswerSynthesizer, GraphRagEngine, GraphRagError, OutputFormat};
use graphrag_embedding::{
    CommunityIndex, IndexMeta, IndexRouter, MemoryVectorIndex, Providers, QdrantVectorIndex, VectorIndex,
};

use super::common::graph_store;
use super::RunContext;
use crate::output;

#[derive(Args)]
pub struct SearchArgs {
    /// Free-text query
    pub query: String,

    /// Number of communities to return
    #[arg(short, long, default_value = "5")]
    pub k: usize,
}

#[derive(Args)]
pub struct AskArgs {
    /// Question in French
    pub question: String,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    pub format: OutputFormat,

    /// Skip semantic routing through the community index
    #[arg(long)]
    pub no_router: bool,
}

/// Metadata file plus the vectors it describes: the Qdrant collection, or
/// the vector file when offline.
fn load_index(ctx: &RunContext) -> Result<CommunityIndex> {
    let settings = &ctx.settings;
    let meta_path = settings.index_meta_path();
    if !meta_path.exists() {
        anyhow::bail!("Community index not found. Run 'graphrag index' first.");
    }
    let meta = IndexMeta::load(&meta_path).with_context(|| format!("Failed to read {}", meta_path.display()))?;
    let backend: Arc<dyn VectorIndex> = if ctx.offline {
        let vectors = settings.index_vectors_path();
        let memory = MemoryVectorIndex::load(&vectors, meta.metric)
            .with_context(|| format!("Failed to read {}", vectors.display()))?;
        Arc::new(memory)
    } else {
        Arc::new(QdrantVectorIndex::connect(&settings.index)?)
    };
    Ok(CommunityIndex::new(meta, backend))
}

/// Reject a blank question before any credential check or connection.
fn checked_question(question: &str) -> Result<&str> {
    let question = question.trim();
    if question.is_empty() {
        return Err(GraphRagError::InvalidQuestion("question is empty".to_string()).into());
    }
    Ok(question)
}

pub async fn search(args: SearchArgs, ctx: &RunContext) -> Result<()> {
    ctx.settings.require_llm_credentials()?;
    let index = load_index(ctx)?;
    let providers = Providers::from_settings(&ctx.settings.llm)?;
    let hits = index.search(&args.query, providers.embedding.as_ref(), args.k).await?;
    output::print_hits(&args.query, &hits);
    Ok(())
}

pub async fn ask(args: AskArgs, ctx: &RunContext) -> Result<()> {
    let question = checked_question(&args.question)?;
    let settings = &ctx.settings;
    settings.require_llm_credentials()?;

    let store = graph_store(ctx).await?;
    let providers = Providers::from_settings(&settings.llm)?;

    let mut retriever = GraphRetriever::new(store, settings.retrieval.clone())?;
    if !args.no_router {
        match load_index(ctx) {
            Ok(index) => {
                let router = IndexRouter::new(index, Arc::clone(&providers.embedding));
                retriever = retriever.with_router(Arc::new(router));
            }
            Err(e) => debug!(error = %e, "Semantic routing disabled"),
        }
    }
    let synthesizer = AnswerSynthesizer::new(
        providers.completion,
        settings.answer.clone(),
        settings.retry,
        settings.source_document_label.clone(),
    );
    let engine = GraphRagEngine::new(retriever, synthesizer, settings.source_document_label.clone());

    let outcome = engine.ask_with_context(question).await?;
    if ctx.verbose {
        if let Some(context) = &outcome.context {
            output::print_context(context);
        }
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome.answer)?),
        OutputFormat::Text => output::print_answer(&outcome.answer),
    }
    if outcome.answer.cited_source_ids.is_empty() && ctx.verbose {
        eprintln!("{}", "No evidence cited".dimmed());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_question_rejected_up_front() {
        let err = checked_question(" \n\t ").unwrap_err();
        assert!(matches!(err.downcast_ref::<GraphRagError>(), Some(GraphRagError::InvalidQuestion(_))));
        assert_eq!(checked_question("  Taux de la TVA ? ").unwrap(), "Taux de la TVA ?");
    }
}
