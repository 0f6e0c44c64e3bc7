//! Pipeline status.

use anyhow::Result;
use colored::Colorize;

use super::common::graph_store;
use super::RunContext;
use crate::output;

pub async fn execute(ctx: &RunContext) -> Result<()> {
    let settings = &ctx.settings;
    println!("{}", "GraphRAG Status".bold());
    println!("{}", "─".repeat(40));
    println!("  Data directory: {}", settings.data_dir.display());
    if !ctx.offline {
        println!("  Vector index:   {} ({})", settings.index.collection, settings.index.qdrant_url);
    }
    println!();

    let artifacts = [
        ("chunks", settings.chunks_path()),
        ("extraction", settings.extraction_path()),
        ("nodes", settings.nodes_path()),
        ("edges", settings.edges_path()),
        ("communities", settings.snapshot_path()),
        ("selection", settings.selection_path()),
        ("profiles", settings.profiles_path()),
        ("offline vectors", settings.index_vectors_path()),
        ("index metadata", settings.index_meta_path()),
    ];
    for (name, path) in &artifacts {
        match std::fs::metadata(path) {
            Ok(meta) => println!("  {:<16} {} {}", name, "✓".green(), format_size(meta.len()).dimmed()),
            Err(_) => println!("  {:<16} {}", name, "missing".yellow()),
        }
    }

    println!();
    let source = if ctx.offline { "Offline graph" } else { "Neo4j" };
    println!("{}", source.bold());
    match graph_store(ctx).await {
        Ok(store) => match store.counts().await {
            Ok(counts) => output::print_counts(&counts),
            Err(e) => println!("  {} {}", "unavailable:".red(), e),
        },
        Err(e) => println!("  {} {:#}", "unavailable:".red(), e),
    }
    println!("{}", "─".repeat(40));
    Ok(())
}

fn format_size(bytes: u64) -> String {
    match bytes {
        b if b >= 1 << 20 => format!("{:.1} MiB", b as f64 / (1u64 << 20) as f64),
        b if b >= 1 << 10 => format!("{:.1} KiB", b as f64 / 1024.0),
        b => format!("{b} B"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(3 << 20), "3.0 MiB");
    }
}
