//! Community profiling and index building.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use graphrag_core::community::{
    Community, CommunityProfiler, CommunitySelector, CommunitySnapshot, ProfileStore, Selection,
};
use graphrag_core::persist;
use graphrag_embedding::{CommunityIndex, MemoryVectorIndex, Providers, QdrantVectorIndex};

use super::common::{graph_artifacts, graph_store, label_map, progress};
use super::RunContext;
use crate::output;

#[derive(Args)]
pub struct ProfileArgs {
    /// Profile every community instead of the selected subset
    #[arg(long)]
    pub all: bool,

    /// Only profile the first N targets
    #[arg(long)]
    pub limit: Option<usize>,
}

fn load_snapshot(ctx: &RunContext) -> Result<CommunitySnapshot> {
    let path = ctx.settings.snapshot_path();
    if !path.exists() {
        anyhow::bail!("{} not found. Run 'graphrag communities' first.", path.display());
    }
    CommunitySnapshot::load(&path).with_context(|| format!("Failed to read {}", path.display()))
}

/// The selected communities, in selection order.
fn targets(ctx: &RunContext, snapshot: &CommunitySnapshot, all: bool) -> Result<Vec<Community>> {
    let communities = snapshot.communities();
    if all {
        return Ok(communities);
    }
    let selection_path = ctx.settings.selection_path();
    let selection: Selection = if selection_path.exists() {
        persist::read_json(&selection_path)?
    } else {
        CommunitySelector::new(ctx.settings.selection.clone()).select(&snapshot.sizes())
    };
    Ok(selection
        .selected
        .iter()
        .filter_map(|id| communities.iter().find(|c| &c.id == id).cloned())
        .collect())
}

pub async fn execute(args: ProfileArgs, ctx: &RunContext) -> Result<()> {
    let settings = &ctx.settings;
    settings.require_llm_credentials()?;

    let snapshot = load_snapshot(ctx)?;
    let mut targets = targets(ctx, &snapshot, args.all)?;
    if let Some(limit) = args.limit {
        targets.truncate(limit);
    }

    let graph = graph_artifacts(settings)?;
    let labels = label_map(&graph);
    let mut store = ProfileStore::open(settings.profiles_path())?;

    let pending = targets
        .iter()
        .filter(|c| !store.get(&c.id).is_some_and(|p| p.is_complete()))
        .count();
    println!(
        "{} {} communities ({} already complete)",
        "Profiling".bold(),
        targets.len().to_string().cyan(),
        targets.len() - pending
    );

    let providers = Providers::from_settings(&settings.llm)?;
    let profiler = CommunityProfiler::new(providers.completion, settings.profiling.clone(), settings.retry);
    let bar = progress(pending as u64, "communities");
    let report = profiler
        .profile_all(&targets, &labels, &mut store, |profile| {
            bar.inc(1);
            if profile.error.is_some() {
                bar.println(format!("  {} community {}", "failed".red(), profile.community_id));
            }
        })
        .await?;
    bar.finish_and_clear();

    if !ctx.offline {
        let wanted: HashSet<&str> = targets.iter().map(|c| c.id.as_str()).collect();
        let profiles: Vec<_> = store
            .profiles()
            .filter(|p| wanted.contains(p.community_id.as_str()))
            .cloned()
            .collect();
        let updated = graph_store(ctx).await?.upsert_profiles(&profiles).await?;
        println!("  Updated {} community profiles in Neo4j", updated);
    }

    output::print_profile_report(&report, store.path());
    Ok(())
}

/// Rebuild the profile index from the current profile file: the Qdrant
/// collection is recreated, or the vector file rewritten when offline.
pub async fn index(ctx: &RunContext) -> Result<()> {
    let settings = &ctx.settings;
    settings.require_llm_credentials()?;

    let store = ProfileStore::open(settings.profiles_path())?;
    if store.is_empty() {
        anyhow::bail!(
            "{} holds no profiles. Run 'graphrag profile' first.",
            settings.profiles_path().display()
        );
    }
    let profiles: Vec<_> = store.profiles().cloned().collect();
    println!("{} {} profiles", "Indexing".bold(), profiles.len().to_string().cyan());

    let providers = Providers::from_settings(&settings.llm)?;
    let embedder = providers.embedding.as_ref();
    let (index, location) = if ctx.offline {
        let backend = Arc::new(MemoryVectorIndex::new());
        let index = CommunityIndex::build(&profiles, embedder, backend.clone(), &settings.index, &settings.retry).await?;
        let path = settings.index_vectors_path();
        backend.save(&path)?;
        (index, path.display().to_string())
    } else {
        let backend = Arc::new(QdrantVectorIndex::connect(&settings.index)?);
        let location = format!("{} ({})", backend.collection(), settings.index.qdrant_url);
        let index = CommunityIndex::build(&profiles, embedder, backend, &settings.index, &settings.retry)
            .await
            .context("Failed to rebuild the Qdrant collection")?;
        (index, location)
    };
    index.meta().save(&settings.index_meta_path())?;

    output::print_index_meta(index.meta(), &location);
    Ok(())
}
