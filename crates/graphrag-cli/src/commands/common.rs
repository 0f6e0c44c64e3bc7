//! Helpers shared by several commands.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use graphrag_core::community::{apply_profiles, CommunitySnapshot, ProfileStore};
use graphrag_core::graph::{Edge, GraphSnapshot, GraphStore, MemoryGraphStore, Node};
use graphrag_core::persist;
use graphrag_core::Settings;
use graphrag_graph::Neo4jGraphStore;

use super::RunContext;

/// Open the graph store: Neo4j, or an in-memory copy of the JSON artifacts
/// when running offline.
pub async fn graph_store(ctx: &RunContext) -> Result<Arc<dyn GraphStore>> {
    if ctx.offline {
        return Ok(Arc::new(memory_store(&ctx.settings).await?));
    }
    ctx.settings.require_neo4j_credentials()?;
    let store = Neo4jGraphStore::connect(&ctx.settings.neo4j)
        .await
        .context("Failed to connect to Neo4j")?;
    Ok(Arc::new(store))
}

/// Rebuild a store from the nodes, edges, snapshot and profile artifacts.
pub async fn memory_store(settings: &Settings) -> Result<MemoryGraphStore> {
    let graph = graph_artifacts(settings)?;
    let store = MemoryGraphStore::new();
    store.upsert_nodes(&graph.nodes).await?;
    store.upsert_edges(&graph.edges).await?;

    let snapshot_path = settings.snapshot_path();
    if snapshot_path.exists() {
        let snapshot = CommunitySnapshot::load(&snapshot_path)
            .with_context(|| format!("Failed to read {}", snapshot_path.display()))?;
        let mut communities = snapshot.communities();
        let profiles = ProfileStore::open(settings.profiles_path())?;
        apply_profiles(&mut communities, profiles.profiles());
        store.replace_communities(&communities).await?;
    }
    info!(nodes = graph.nodes.len(), edges = graph.edges.len(), "Loaded offline graph");
    Ok(store)
}

/// Nodes and edges written by `build-graph`.
pub fn graph_artifacts(settings: &Settings) -> Result<GraphSnapshot> {
    let nodes_path = settings.nodes_path();
    let edges_path = settings.edges_path();
    let nodes: Vec<Node> = read_artifact(&nodes_path)?;
    let edges: Vec<Edge> = read_artifact(&edges_path)?;
    Ok(GraphSnapshot { nodes, edges })
}

fn read_artifact<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        anyhow::bail!("{} not found. Run 'graphrag build-graph' first.", path.display());
    }
    persist::read_json(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Node id → display label.
pub fn label_map(graph: &GraphSnapshot) -> HashMap<String, String> {
    graph
        .nodes
        .iter()
        .map(|n| (n.id.clone(), n.label.clone()))
        .collect()
}

/// Progress bar for a batch stage of `len` units.
pub fn progress(len: u64, message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}
