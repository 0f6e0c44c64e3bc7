//! Entity and relation extraction.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use graphrag_core::extraction::{completed_chunk_ids, load_chunks, ExtractionPipeline};
use graphrag_embedding::Providers;

use super::common::progress;
use super::RunContext;
use crate::output;

#[derive(Args)]
pub struct ExtractArgs {
    /// Chunk file (JSON array or JSON lines); defaults to <data_dir>/chunks.json
    #[arg(long)]
    pub chunks: Option<PathBuf>,

    /// Output file; defaults to <data_dir>/extraction.jsonl
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Only process the first N chunks
    #[arg(long)]
    pub limit: Option<usize>,
}

pub async fn execute(args: ExtractArgs, ctx: &RunContext) -> Result<()> {
    let settings = &ctx.settings;
    settings.require_llm_credentials()?;

    let chunks_path = args.chunks.unwrap_or_else(|| settings.chunks_path());
    let out_path = args.out.unwrap_or_else(|| settings.extraction_path());
    let mut chunks =
        load_chunks(&chunks_path).with_context(|| format!("Failed to load chunks from {}", chunks_path.display()))?;
    if let Some(limit) = args.limit {
        chunks.truncate(limit);
    }

    println!(
        "{} {} chunks from {}",
        "Extracting".bold(),
        chunks.len().to_string().cyan(),
        chunks_path.display()
    );

    let providers = Providers::from_settings(&settings.llm)?;
    let pipeline = ExtractionPipeline::new(providers.completion, settings.extraction.clone(), settings.retry);

    let done = completed_chunk_ids(&out_path)?;
    let pending = chunks.iter().filter(|c| !done.contains(&c.id)).count();
    let bar = progress(pending as u64, "chunks");
    let report = pipeline
        .run(&chunks, &out_path, |chunk_id, ok| {
            bar.inc(1);
            if !ok {
                bar.println(format!("  {} chunk {}", "failed".red(), chunk_id));
            }
        })
        .await?;
    bar.finish_and_clear();

    output::print_extraction_report(&report, &out_path);
    Ok(())
}
