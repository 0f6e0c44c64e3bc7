//! Query-time graph retrieval.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::candidates::CandidateExtractor;
use crate::config::RetrievalSettings;
use crate::error::{GraphRagError, GraphRagResult};
use crate::graph::model::{CommunityBrief, EvidenceTriple, Node};
use crate::graph::store::GraphStore;
use crate::services::CommunityRouter;

/// Why retrieval stopped before producing evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsufficientReason {
    NoCandidates,
    NoEntityMatch,
    NoEvidence,
}

/// Terminal state of one retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum RetrievalState {
    ContextReady,
    InsufficientContext(InsufficientReason),
}

/// Everything retrieved for one question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryContext {
    pub question: String,
    pub candidate_terms: Vec<String>,
    pub matched_entities: Vec<Node>,
    pub routed_community_ids: Vec<String>,
    pub routed_communities: Vec<CommunityBrief>,
    /// Semantically close communities, shown to the model but never used to
    /// filter evidence.
    pub related_communities: Vec<CommunityBrief>,
    pub evidence_triples: Vec<EvidenceTriple>,
    pub evidence_block: String,
    pub state: RetrievalState,
}

impl QueryContext {
    pub(crate) fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            candidate_terms: Vec::new(),
            matched_entities: Vec::new(),
            routed_community_ids: Vec::new(),
            routed_communities: Vec::new(),
            related_communities: Vec::new(),
            evidence_triples: Vec::new(),
            evidence_block: String::new(),
            state: RetrievalState::InsufficientContext(InsufficientReason::NoCandidates),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == RetrievalState::ContextReady
    }

    /// Distinct citation ids of the evidence, in evidence order.
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for triple in &self.evidence_triples {
            let id = triple.source_id();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

/// Extracts candidate terms, matches entities, routes to communities and
/// assembles an evidence subgraph.
pub struct GraphRetriever {
    store: Arc<dyn GraphStore>,
    router: Option<Arc<dyn CommunityRouter>>,
    candidates: CandidateExtractor,
    settings: RetrievalSettings,
}

impl GraphRetriever {
    pub fn new(store: Arc<dyn GraphStore>, settings: RetrievalSettings) -> GraphRagResult<Self> {
        Ok(Self {
            store,
            router: None,
            candidates: CandidateExtractor::new(&settings)?,
            settings,
        })
    }

    /// Attach a semantic router whose hits are listed as related communities.
    pub fn with_router(mut self, router: Arc<dyn CommunityRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub async fn retrieve(&self, question: &str) -> GraphRagResult<QueryContext> {
        let question = question.trim();
        if question.is_empty() {
            return Err(GraphRagError::InvalidQuestion("question is empty".to_string()));
        }
        let mut ctx = QueryContext::new(question);

        ctx.candidate_terms = self.candidates.extract(question);
        debug!(candidates = ?ctx.candidate_terms, "Candidate terms");
        if ctx.candidate_terms.is_empty() {
            return Ok(ctx);
        }

        ctx.matched_entities = self
            .store
            .match_entities(&ctx.candidate_terms, self.settings.top_entities)
            .await?;
        if ctx.matched_entities.is_empty() {
            ctx.state = RetrievalState::InsufficientContext(InsufficientReason::NoEntityMatch);
            info!(candidates = ctx.candidate_terms.len(), "No entity matched the question");
            return Ok(ctx);
        }

        let entity_ids: Vec<String> = ctx.matched_entities.iter().map(|n| n.id.clone()).collect();
        ctx.routed_communities = self.route(&entity_ids).await?;
        ctx.routed_community_ids = ctx.routed_communities.iter().map(|c| c.id.clone()).collect();

        if self.settings.semantic_communities > 0 {
            if let Some(router) = &self.router {
                match router.route(question, self.settings.semantic_communities).await {
                    Ok(briefs) => {
                        ctx.related_communities = briefs
                            .into_iter()
                            .filter(|b| !ctx.routed_community_ids.contains(&b.id))
                            .collect();
                    }
                    Err(e) => warn!(error = %e, "Semantic routing failed; continuing without it"),
                }
            }
        }

        ctx.evidence_triples = self
            .store
            .incident_triples(&entity_ids, &ctx.routed_community_ids, self.settings.top_triples)
            .await?;
        if ctx.evidence_triples.is_empty() {
            ctx.state = RetrievalState::InsufficientContext(InsufficientReason::NoEvidence);
            info!(entities = entity_ids.len(), "Matched entities carry no evidence");
            return Ok(ctx);
        }

        ctx.evidence_block = evidence_block(&ctx);
        ctx.state = RetrievalState::ContextReady;
        info!(
            entities = ctx.matched_entities.len(),
            communities = ctx.routed_community_ids.len(),
            triples = ctx.evidence_triples.len(),
            "Context ready"
        );
        Ok(ctx)
    }

    /// Rank communities by how many matched entities they hold, then size,
    /// then id, and keep the top few.
    async fn route(&self, entity_ids: &[String]) -> GraphRagResult<Vec<CommunityBrief>> {
        let memberships = self.store.community_memberships(entity_ids).await?;
        let mut hits: HashMap<String, (usize, CommunityBrief)> = HashMap::new();
        for m in memberships {
            hits.entry(m.community.id.clone())
                .or_insert_with(|| (0, m.community.clone()))
                .0 += 1;
        }

        let mut ranked: Vec<(usize, CommunityBrief)> = hits.into_values().collect();
        ranked.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.size.cmp(&a.1.size))
                .then_with(|| compare_ids(&a.1.id, &b.1.id))
        });
        Ok(ranked
            .into_iter()
            .take(self.settings.top_communities)
            .map(|(_, brief)| brief)
            .collect())
    }
}

fn compare_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Render the context as the sectioned text handed to the answer prompt.
fn evidence_block(ctx: &QueryContext) -> String {
    let mut out = String::new();

    out.push_str("Entités détectées :\n");
    for node in &ctx.matched_entities {
        let _ = writeln!(out, "- {} ({}) [{}]", node.label, node.node_type, node.id);
    }

    if !ctx.routed_communities.is_empty() {
        out.push_str("\nCommunautés sélectionnées :\n");
        for c in &ctx.routed_communities {
            write_brief(&mut out, c);
        }
    }

    if !ctx.related_communities.is_empty() {
        out.push_str("\nCommunautés proches :\n");
        for c in &ctx.related_communities {
            write_brief(&mut out, c);
        }
    }

    out.push_str("\nTriples (preuves) :\n");
    for t in &ctx.evidence_triples {
        let _ = write!(
            out,
            "- source_id: {} | {} ({}) -[{}]-> {} ({})",
            t.source_id(),
            t.head_label,
            t.head_type,
            t.relation,
            t.tail_label,
            t.tail_type
        );
        if !t.evidence.is_empty() {
            let _ = write!(out, " | preuve: \"{}\"", t.evidence);
        }
        out.push('\n');
    }

    out
}

fn write_brief(out: &mut String, c: &CommunityBrief) {
    let title = if c.title.is_empty() { "(sans titre)" } else { c.title.as_str() };
    let _ = writeln!(out, "- communauté {} ({} entités) : {}", c.id, c.size, title);
    if !c.summary.is_empty() {
        let _ = writeln!(out, "  résumé : {}", c.summary);
    }
    if !c.keywords.is_empty() {
        let _ = writeln!(out, "  mots-clés : {}", c.keywords.join(", "));
    }
}
