//! Graph building and community detection commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::info;

use graphrag_core::community::{CommunityDetector, CommunitySelector, DetectionMethod};
use graphrag_core::extraction::load_records;
use graphrag_core::graph::{graph_input_from_records, EntityGraphBuilder};
use graphrag_core::persist;

use super::common::{graph_artifacts, graph_store};
use super::RunContext;
use crate::output;

#[derive(Args)]
pub struct BuildGraphArgs {
    /// Extraction records (JSON lines); defaults to <data_dir>/extraction.jsonl
    #[arg(long)]
    pub input: Option<PathBuf>,
}

#[derive(Args)]
pub struct CommunitiesArgs {
    /// Detection method (leiden or louvain)
    #[arg(long)]
    pub method: Option<DetectionMethod>,

    /// Resolution parameter
    #[arg(long)]
    pub resolution: Option<f64>,

    /// Minimum community size after merging
    #[arg(long)]
    pub min_size: Option<usize>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Build canonical nodes and edges, write them as artifacts and upsert them
/// into the store.
pub async fn build(args: BuildGraphArgs, ctx: &RunContext) -> Result<()> {
    let settings = &ctx.settings;
    let input = args.input.unwrap_or_else(|| settings.extraction_path());
    let records = load_records(&input).with_context(|| format!("Failed to read {}", input.display()))?;
    println!(
        "{} from {} extraction records",
        "Building graph".bold(),
        records.len().to_string().cyan()
    );

    let (node_records, edge_records) = graph_input_from_records(&records);
    let mut builder = EntityGraphBuilder::new();
    builder.add_nodes(&node_records).add_edges(&edge_records);
    let graph = builder.build();

    persist::write_json_atomic(&settings.nodes_path(), &graph.nodes)?;
    persist::write_json_atomic(&settings.edges_path(), &graph.edges)?;
    info!(nodes = %settings.nodes_path().display(), edges = %settings.edges_path().display(), "Graph artifacts written");

    if ctx.offline {
        println!("  {}", "Offline: skipping Neo4j load".dimmed());
    } else {
        let store = graph_store(ctx).await?;
        let nodes = store.upsert_nodes(&graph.nodes).await?;
        let edges = store.upsert_edges(&graph.edges).await?;
        println!("  Upserted {} nodes and {} relations into Neo4j", nodes, edges);
    }

    output::print_build_report(&graph.report);
    Ok(())
}

/// Detect communities, merge small ones, select the covering subset and
/// publish them to the store.
pub async fn communities(args: CommunitiesArgs, ctx: &RunContext) -> Result<()> {
    let settings = &ctx.settings;
    let mut detection_settings = settings.detection.clone();
    if let Some(method) = args.method {
        detection_settings.method = method;
    }
    if let Some(resolution) = args.resolution {
        detection_settings.resolution = resolution;
    }
    if let Some(min_size) = args.min_size {
        detection_settings.min_size = min_size;
    }
    if args.seed.is_some() {
        detection_settings.seed = args.seed;
    }

    let graph = if ctx.offline {
        graph_artifacts(settings)?
    } else {
        graph_store(ctx).await?.load_graph().await?
    };
    println!(
        "{} on {} nodes / {} edges ({}, resolution {})",
        "Detecting communities".bold(),
        graph.nodes.len().to_string().cyan(),
        graph.edges.len().to_string().cyan(),
        detection_settings.method,
        detection_settings.resolution
    );

    let mut detection = CommunityDetector::new(detection_settings).detect(&graph)?;
    let snapshot_path = settings.snapshot_path();
    detection.snapshot.save(&snapshot_path)?;

    let selection = CommunitySelector::new(settings.selection.clone()).select(&detection.snapshot.sizes());
    persist::write_json_atomic(&settings.selection_path(), &selection)?;

    if !ctx.offline {
        let store = graph_store(ctx).await?;
        let written = store.replace_communities(&detection.snapshot.communities()).await?;
        println!("  Published {} communities to Neo4j", written);
    }

    output::print_detection(&detection.report, detection.snapshot.version, &snapshot_path);
    output::print_selection(&selection.stats);
    if ctx.verbose {
        output::print_community_info(&detection.snapshot.info);
    }
    Ok(())
}
