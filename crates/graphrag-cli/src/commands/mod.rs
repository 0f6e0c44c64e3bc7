//! CLI command definitions and handlers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use graphrag_core::Settings;

pub mod common;
pub mod extract;
pub mod graph;
pub mod profile;
pub mod query;
pub mod status;

/// GraphRAG over the Code Général des Impôts
#[derive(Parser)]
#[command(name = "graphrag")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file (defaults to ./graphrag.toml when present)
    #[arg(short, long, global = true, env = "GRAPHRAG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Use the JSON artifacts in the data directory instead of Neo4j
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract entities and relations from chunks
    Extract(extract::ExtractArgs),

    /// Build the deduplicated entity graph and load it into the store
    BuildGraph(graph::BuildGraphArgs),

    /// Detect, merge and select communities
    Communities(graph::CommunitiesArgs),

    /// Generate community profiles
    Profile(profile::ProfileArgs),

    /// Build the community profile index
    Index,

    /// Search the community index
    Search(query::SearchArgs),

    /// Answer a question from the graph
    Ask(query::AskArgs),

    /// Show artifact and graph status
    Status,
}

/// Options shared by every handler.
pub struct RunContext {
    pub settings: Settings,
    pub offline: bool,
    pub verbose: bool,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let settings = Settings::load(self.config.as_deref()).context("Failed to load settings")?;
        let ctx = RunContext {
            settings,
            offline: self.offline,
            verbose: self.verbose,
        };

        match self.command {
            Commands::Extract(args) => extract::execute(args, &ctx).await,
            Commands::BuildGraph(args) => graph::build(args, &ctx).await,
            Commands::Communities(args) => graph::communities(args, &ctx).await,
            Commands::Profile(args) => profile::execute(args, &ctx).await,
            Commands::Index => profile::index(&ctx).await,
            Commands::Search(args) => query::search(args, &ctx).await,
            Commands::Ask(args) => query::ask(args, &ctx).await,
            Commands::Status => status::execute(&ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrag_core::community::DetectionMethod;
    use graphrag_core::OutputFormat;

    #[test]
    fn test_parse_ask_and_communities() {
        let cli = Cli::try_parse_from(["graphrag", "--offline", "ask", "Quel est le taux de TVA ?", "--format", "text"])
            .unwrap();
        assert!(cli.offline);
        match cli.command {
            Commands::Ask(args) => {
                assert_eq!(args.format, OutputFormat::Text);
                assert!(!args.no_router);
            }
            _ => panic!("expected ask"),
        }

        let cli = Cli::try_parse_from(["graphrag", "communities", "--method", "louvain", "--seed", "42"]).unwrap();
        match cli.command {
            Commands::Communities(args) => {
                assert_eq!(args.method, Some(DetectionMethod::Louvain));
                assert_eq!(args.seed, Some(42));
            }
            _ => panic!("expected communities"),
        }
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["graphrag", "ask", "question", "--format", "xml"]).is_err());
    }
}
