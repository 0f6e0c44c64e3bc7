//! Answer synthesis from retrieved evidence.

use std::sync::Arc;

use tracing::{info, warn};

use super::model::{Answer, ANSWER_KIND};
use super::parse::parse_answer;
use crate::config::AnswerSettings;
use crate::retrieval::QueryContext;
use crate::retry::RetryPolicy;
use crate::services::{CompletionRequest, CompletionService};

const SYSTEM_PROMPT: &str = "---Rôle---\n\
Vous êtes un assistant spécialisé dans le droit fiscal marocain (Code Général des Impôts).\n\
Vous répondez uniquement à partir des données fournies, sans rien inventer.\n\n\
---Format---\n\
Répondez par un seul objet JSON valide, sans texte autour.";

/// Builds the constrained prompt, calls the model and maps its output onto
/// the [`Answer`] contract.
pub struct AnswerSynthesizer {
    completion: Arc<dyn CompletionService>,
    settings: AnswerSettings,
    retry: RetryPolicy,
    source_document_label: String,
}

impl AnswerSynthesizer {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        settings: AnswerSettings,
        retry: RetryPolicy,
        source_document_label: impl Into<String>,
    ) -> Self {
        Self {
            completion,
            settings,
            retry,
            source_document_label: source_document_label.into(),
        }
    }

    /// Answer from `ctx`. Never fails: missing evidence or a failed model
    /// call yields the insufficient-information answer.
    pub async fn synthesize(&self, ctx: &QueryContext) -> Answer {
        if !ctx.is_ready() {
            info!(state = ?ctx.state, "No usable context; skipping completion");
            return Answer::insufficient(&self.source_document_label);
        }

        let request = CompletionRequest::new(SYSTEM_PROMPT, self.user_prompt(ctx), self.settings.temperature);
        let raw = match self.retry.run("answer", || self.completion.complete(&request)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Answer generation failed");
                return Answer::insufficient(&self.source_document_label);
            }
        };

        parse_answer(&raw, &self.source_document_label, &ctx.source_ids())
    }

    fn user_prompt(&self, ctx: &QueryContext) -> String {
        format!(
            "---Objectif---\n\
             Répondez à la question de l'utilisateur en résumant toutes les informations pertinentes des données ci-dessous.\n\
             Si les données ne suffisent pas, dites-le. N'inventez rien.\n\n\
             Chaque affirmation appuyée par les données cite ses références sous la forme \
             \"[Data: Sources (id1, id2)]\", où les identifiants sont les source_id des triples. \
             Ne listez pas plus de {max_ids} identifiants ; au-delà, ajoutez \"+more\".\n\n\
             ---Format de réponse---\n\
             Réponse structurée en markdown avec sections, style clair et professionnel.\n\n\
             ---Données---\n\
             {evidence}\n\
             ---Question---\n\
             {question}\n\n\
             ---Sortie JSON (stricte)---\n\
             Retournez exactement un objet JSON :\n\
             {{\n\
             \x20 \"answer_kind\": \"{kind}\",\n\
             \x20 \"answer_text\": \"Réponse en markdown avec citations [Data: Sources (...)]\",\n\
             \x20 \"cited_source_ids\": [\"...\"],\n\
             \x20 \"source_document_label\": \"{label}\"\n\
             }}",
            max_ids = self.settings.max_cited_ids,
            evidence = ctx.evidence_block,
            question = ctx.question,
            kind = ANSWER_KIND,
            label = self.source_document_label,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GraphRagError, GraphRagResult};
    use crate::graph::model::EvidenceTriple;
    use crate::retrieval::{InsufficientReason, RetrievalState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Canned {
        reply: GraphRagResult<String>,
        calls: AtomicUsize,
        last_user: Mutex<String>,
    }

    impl Canned {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
                last_user: Mutex::new(String::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(GraphRagError::permanent("canned", "401 unauthorized")),
                calls: AtomicUsize::new(0),
                last_user: Mutex::new(String::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionService for Canned {
        fn model(&self) -> &str {
            "canned"
        }

        async fn complete(&self, request: &CompletionRequest) -> GraphRagResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_user.lock().unwrap() = request.user.clone();
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(GraphRagError::permanent("canned", e.to_string())),
            }
        }
    }

    fn ready_context() -> QueryContext {
        let mut ctx = QueryContext::new("Qui paie l'IR ?");
        ctx.candidate_terms = vec!["IR".to_string()];
        ctx.evidence_block = "Triples (preuves) :\n- source_id: c12 | IR -[APPLIQUE_A]-> Salarié\n".to_string();
        ctx.state = RetrievalState::ContextReady;
        ctx.evidence_triples.push(EvidenceTriple {
            head_id: "h".into(),
            head_label: "IR".into(),
            head_type: "IMPOT".into(),
            relation: "APPLIQUE_A".into(),
            tail_id: "t".into(),
            tail_label: "Salarié".into(),
            tail_type: "PERSONNE".into(),
            evidence: String::new(),
            source_chunk_id: Some("c12".into()),
            confidence: 0.9,
            dedup_key: "k".into(),
        });
        ctx
    }

    fn synthesizer(service: Arc<Canned>) -> AnswerSynthesizer {
        AnswerSynthesizer::new(service, AnswerSettings::default(), RetryPolicy::immediate(2), "CGI 2025")
    }

    #[tokio::test]
    async fn test_prompt_carries_evidence_and_citation_rule() {
        let service = Canned::ok(r#"{"answer_text": "Les salariés [Data: Sources (c12)]."}"#);
        let answer = synthesizer(service.clone()).synthesize(&ready_context()).await;
        assert_eq!(answer.cited_source_ids, vec!["c12"]);
        assert_eq!(answer.source_document_label, "CGI 2025");

        let prompt = service.last_user.lock().unwrap().clone();
        assert!(prompt.contains("source_id: c12"));
        assert!(prompt.contains("[Data: Sources (id1, id2)]"));
        assert!(prompt.contains("+more"));
        assert!(prompt.contains("Qui paie l'IR ?"));
    }

    #[tokio::test]
    async fn test_insufficient_context_skips_completion() {
        let service = Canned::ok("{}");
        let mut ctx = ready_context();
        ctx.state = RetrievalState::InsufficientContext(InsufficientReason::NoEntityMatch);
        let answer = synthesizer(service.clone()).synthesize(&ctx).await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
        assert!(answer.cited_source_ids.is_empty());
        assert_eq!(answer.answer_kind, "graphrag");
    }

    #[tokio::test]
    async fn test_service_failure_degrades() {
        let service = Canned::failing();
        let answer = synthesizer(service.clone()).synthesize(&ready_context()).await;
        assert_eq!(answer, Answer::insufficient("CGI 2025"));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }
}
