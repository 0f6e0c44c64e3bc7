//! Terminal output formatting.

use std::path::Path;

use colored::Colorize;

use graphrag_core::community::{CommunityInfo, DetectionReport, ProfileReport, SelectionStats};
use graphrag_core::extraction::ExtractionReport;
use graphrag_core::graph::{BuildReport, GraphCounts};
use graphrag_core::retrieval::QueryContext;
use graphrag_core::text::truncate_chars;
use graphrag_core::Answer;
use graphrag_embedding::{IndexHit, IndexMeta};

fn row(label: &str, value: impl std::fmt::Display) {
    println!("  {:<28} {}", format!("{label}:"), value);
}

pub fn print_extraction_report(report: &ExtractionReport, out: &Path) {
    println!("{} Extraction finished", "✓".green().bold());
    row("Chunks", report.total);
    row("Already done", report.skipped_done);
    row("Extracted", report.extracted.to_string().green());
    if report.failed > 0 {
        row("Failed", report.failed.to_string().red());
    }
    row("Entities", report.entities);
    row("Relations", report.relations);
    row("Output", out.display());
}

pub fn print_build_report(report: &BuildReport) {
    println!("{} Graph built", "✓".green().bold());
    row("Nodes in / out", format!("{} / {}", report.nodes_in, report.nodes_out.to_string().cyan()));
    row("Nodes merged", report.nodes_merged);
    row("Nodes skipped", report.nodes_skipped);
    row("Edges in / out", format!("{} / {}", report.edges_in, report.edges_out.to_string().cyan()));
    row("Edges merged", report.edges_merged);
    let skipped = report.edges_skipped_missing_endpoint + report.edges_skipped_malformed;
    if skipped > 0 {
        row(
            "Edges skipped",
            format!(
                "{} ({} missing endpoint, {} malformed)",
                skipped.to_string().yellow(),
                report.edges_skipped_missing_endpoint,
                report.edges_skipped_malformed
            ),
        );
    }
}

pub fn print_detection(report: &DetectionReport, version: u32, snapshot: &Path) {
    println!("{} Communities detected", "✓".green().bold());
    let method = if report.fell_back {
        format!("{} {}", report.method, "(fallback)".yellow())
    } else {
        report.method.clone()
    };
    row("Method", method);
    row("Nodes", report.nodes);
    row("Edges used", report.edges_used);
    if report.edges_dangling > 0 {
        row("Dangling edges", report.edges_dangling.to_string().yellow());
    }
    row("Raw communities", report.raw_communities);
    row("Merged", report.merged_communities);
    row("Final communities", report.final_communities.to_string().cyan());
    if !report.isolated_small.is_empty() {
        row("Isolated undersized", report.isolated_small.len().to_string().yellow());
    }
    row("Modularity", format!("{:.4}", report.modularity));
    row("Snapshot", format!("{} (v{})", snapshot.display(), version));
}

pub fn print_selection(stats: &SelectionStats) {
    println!("{} Selection", "✓".green().bold());
    row(
        "Kept (>= min size)",
        format!("{} of {} (min {})", stats.total_communities_kept, stats.total_communities_raw, stats.min_size),
    );
    row(
        "Selected",
        format!("{} (cap {})", stats.selected_count.to_string().cyan(), stats.cap),
    );
    let coverage = format!(
        "{:.1}% (target {:.0}%)",
        stats.achieved_coverage * 100.0,
        stats.coverage_target * 100.0
    );
    let coverage = if stats.achieved_coverage + 1e-9 >= stats.coverage_target {
        coverage.green()
    } else {
        coverage.yellow()
    };
    row("Coverage", coverage);
    row("Members", format!("{} of {}", stats.selected_members_sum, stats.kept_members_sum));
}

pub fn print_community_info(info: &[CommunityInfo]) {
    if info.is_empty() {
        return;
    }
    println!();
    println!("{:<6} {:<6} {:<28} {}", "ID", "Size", "Theme", "Top labels");
    println!("{}", "─".repeat(80));
    for community in info {
        println!(
            "{:<6} {:<6} {:<28} {}",
            community.community_id,
            community.size,
            truncate_chars(&community.theme, 26),
            community.top_labels.iter().take(4).cloned().collect::<Vec<_>>().join(", ").dimmed()
        );
    }
}

pub fn print_profile_report(report: &ProfileReport, path: &Path) {
    println!("{} Profiling finished", "✓".green().bold());
    row("Requested", report.requested);
    row("Already complete", report.skipped_complete);
    row("Generated", report.generated.to_string().green());
    if report.failed > 0 {
        row("Failed", report.failed.to_string().red());
    }
    row("Profiles", path.display());
}

pub fn print_index_meta(meta: &IndexMeta, location: &str) {
    println!("{} Index built", "✓".green().bold());
    row("Communities", meta.meta_count.to_string().cyan());
    row("Dimension", meta.dim);
    row("Metric", format!("{:?}", meta.metric).to_lowercase());
    row("Embedding model", &meta.embed_model);
    row("Vectors", location);
}

pub fn print_hits(query: &str, hits: &[IndexHit]) {
    if hits.is_empty() {
        println!("{}", "No communities found.".dimmed());
        return;
    }
    println!("{} {}", "Query:".bold(), query);
    println!();
    for hit in hits {
        let community = &hit.community;
        println!(
            "{} {} {} {}",
            format!("#{}", hit.rank).bold(),
            format!("[{}]", community.community_id).dimmed(),
            community.title.cyan(),
            format!("score {:.4}", hit.score).dimmed()
        );
        if !community.summary.is_empty() {
            println!("   {}", truncate_chars(&community.summary, 160));
        }
        if !community.keywords.is_empty() {
            let keywords: Vec<&str> = community.keywords.iter().take(8).map(String::as_str).collect();
            println!("   {}", keywords.join(", ").dimmed());
        }
    }
}

pub fn print_context(context: &QueryContext) {
    eprintln!("{} {:?}", "Retrieval:".bold(), context.state);
    eprintln!("  Candidates: {}", context.candidate_terms.join(", "));
    let matched: Vec<&str> = context.matched_entities.iter().map(|n| n.label.as_str()).collect();
    eprintln!("  Entities: {}", matched.join(", "));
    if !context.routed_community_ids.is_empty() {
        eprintln!("  Routed communities: {}", context.routed_community_ids.join(", "));
    }
    eprintln!("  Evidence triples: {}", context.evidence_triples.len());
    if !context.evidence_block.is_empty() {
        eprintln!();
        eprintln!("{}", context.evidence_block.dimmed());
    }
    eprintln!();
}

pub fn print_answer(answer: &Answer) {
    println!("{}", answer.render_text());
}

pub fn print_counts(counts: &GraphCounts) {
    row("Entities", counts.nodes.to_string().cyan());
    row("Relations", counts.relationships.to_string().cyan());
    row("Communities", counts.communities.to_string().cyan());
}
