//! Community profiles: generation, caching and persistence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::model::Community;
use crate::config::ProfilingSettings;
use crate::error::GraphRagResult;
use crate::json;
use crate::persist;
use crate::retry::RetryPolicy;
use crate::services::{CompletionRequest, CompletionService};

const KEYWORDS_MIN: usize = 6;
const KEYWORDS_MAX: usize = 12;

/// Title, summary and keywords describing one community.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommunityProfile {
    pub community_id: String,
    #[serde(default)]
    pub member_count: usize,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Set when generation failed after every retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

impl CommunityProfile {
    /// A complete profile is never regenerated.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
            && !self.title.trim().is_empty()
            && !self.summary.trim().is_empty()
            && !self.keywords.is_empty()
    }

    fn failed(community_id: &str, member_count: usize, error: String) -> Self {
        Self {
            community_id: community_id.to_string(),
            member_count,
            summary: format!("ERROR: {error}"),
            error: Some(error),
            generated_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

/// Profiles keyed by community id, mirrored to a JSON file.
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    profiles: BTreeMap<String, CommunityProfile>,
}

impl ProfileStore {
    /// Open the store at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> GraphRagResult<Self> {
        let path = path.into();
        let profiles = if path.exists() {
            persist::read_json(&path)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, profiles })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, community_id: &str) -> Option<&CommunityProfile> {
        self.profiles.get(community_id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &CommunityProfile> {
        self.profiles.values()
    }

    /// Insert and rewrite the file atomically.
    pub fn put(&mut self, profile: CommunityProfile) -> GraphRagResult<()> {
        self.profiles.insert(profile.community_id.clone(), profile);
        persist::write_json_atomic(&self.path, &self.profiles)
    }
}

/// Counters for one profiling run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileReport {
    pub requested: usize,
    pub skipped_complete: usize,
    pub generated: usize,
    pub failed: usize,
}

/// Generates community profiles through a completion service.
pub struct CommunityProfiler {
    completion: Arc<dyn CompletionService>,
    settings: ProfilingSettings,
    retry: RetryPolicy,
}

impl CommunityProfiler {
    pub fn new(completion: Arc<dyn CompletionService>, settings: ProfilingSettings, retry: RetryPolicy) -> Self {
        Self {
            completion,
            settings,
            retry,
        }
    }

    /// Profile every community in `targets` that lacks a complete profile.
    ///
    /// `labels` maps node ids to display labels. Each finished profile is
    /// written to `store` before the next one is taken, so an interrupted run
    /// resumes where it stopped. `on_done` is called after every unit.
    pub async fn profile_all(
        &self,
        targets: &[Community],
        labels: &HashMap<String, String>,
        store: &mut ProfileStore,
        mut on_done: impl FnMut(&CommunityProfile),
    ) -> GraphRagResult<ProfileReport> {
        let mut report = ProfileReport {
            requested: targets.len(),
            ..ProfileReport::default()
        };

        let pending: Vec<&Community> = targets
            .iter()
            .filter(|c| {
                let done = store.get(&c.id).is_some_and(CommunityProfile::is_complete);
                if done {
                    debug!(community = %c.id, "Profile already complete");
                }
                !done
            })
            .collect();
        report.skipped_complete = targets.len() - pending.len();

        info!(
            pending = pending.len(),
            skipped = report.skipped_complete,
            concurrency = self.settings.concurrency,
            "Profiling communities"
        );

        let mut results = stream::iter(pending)
            .map(|community| {
                let sample = sample_labels(community, labels, self.settings.sample_size);
                async move { self.profile_one(community, &sample).await }
            })
            .buffer_unordered(self.settings.concurrency.max(1));

        while let Some(profile) = results.next().await {
            if profile.error.is_some() {
                report.failed += 1;
            } else {
                report.generated += 1;
            }
            on_done(&profile);
            store.put(profile)?;
        }

        info!(
            generated = report.generated,
            failed = report.failed,
            skipped = report.skipped_complete,
            "Profiling finished"
        );
        Ok(report)
    }

    async fn profile_one(&self, community: &Community, sample: &[String]) -> CommunityProfile {
        let request = CompletionRequest::new(SYSTEM_PROMPT, user_prompt(&community.id, sample), self.settings.temperature);
        let label = format!("profile community {}", community.id);

        match self.retry.run(&label, || self.completion.complete(&request)).await {
            Ok(raw) => {
                let mut profile = parse_profile(&raw);
                profile.community_id = community.id.clone();
                profile.member_count = community.size;
                profile.generated_at = Some(Utc::now());
                profile
            }
            Err(e) => {
                warn!(community = %community.id, error = %e, "Profile generation failed");
                CommunityProfile::failed(&community.id, community.size, e.to_string())
            }
        }
    }
}

const SYSTEM_PROMPT: &str = "Tu es un expert du droit fiscal marocain (Code Général des Impôts). \
Tu décris des groupes de notions fiscales pour faciliter la recherche d'information. \
Tu réponds uniquement par un objet JSON valide.";

fn user_prompt(community_id: &str, sample: &[String]) -> String {
    format!(
        "Communauté {community_id}\n\n\
         Entités et termes de cette communauté (échantillon) :\n{terms}\n\n\
         Produis :\n\
         - \"title\" : un titre court, 12 mots au plus ;\n\
         - \"summary\" : 3 à 6 phrases décrivant précisément le thème fiscal ou juridique ;\n\
         - \"keywords\" : {KEYWORDS_MIN} à {KEYWORDS_MAX} mots-clés courts, sans phrases.\n\n\
         Format attendu, en JSON strict :\n\
         {{\"title\": \"...\", \"summary\": \"...\", \"keywords\": [\"...\", \"...\"]}}",
        terms = sample.join(", "),
    )
}

/// Up to `limit` distinct member labels in member order, falling back to the
/// raw node id for members without a label.
pub fn sample_labels(community: &Community, labels: &HashMap<String, String>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    community
        .member_node_ids
        .iter()
        .map(|id| labels.get(id).cloned().unwrap_or_else(|| id.clone()))
        .filter(|label| seen.insert(label.clone()))
        .take(limit)
        .collect()
}

/// Parse model output into a profile; unparsable output becomes the summary.
fn parse_profile(raw: &str) -> CommunityProfile {
    match json::parse_object(raw) {
        Ok(map) => {
            let mut keywords = json::str_list_of(&map, "keywords");
            keywords.truncate(KEYWORDS_MAX);
            CommunityProfile {
                title: json::str_of(&map, "title"),
                summary: json::str_of(&map, "summary"),
                keywords,
                ..CommunityProfile::default()
            }
        }
        Err(e) => {
            debug!(error = %e, "Profile response was not JSON; keeping raw text");
            CommunityProfile {
                summary: raw.trim().to_string(),
                ..CommunityProfile::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphRagError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedCompletion {
        calls: AtomicUsize,
        fail_for: Option<&'static str>,
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletion {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> GraphRagResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.fail_for {
                if request.user.contains(marker) {
                    return Err(GraphRagError::transient("scripted", "503 busy"));
                }
            }
            Ok(r#"```json
{"title": "TVA intérieure", "summary": "Règles de la TVA.", "keywords": ["tva", "taux", "tva"]}
```"#
                .to_string())
        }
    }

    fn communities() -> Vec<Community> {
        vec![
            Community::new("0", vec!["n1".into(), "n2".into()]),
            Community::new("1", vec!["n3".into()]),
        ]
    }

    fn labels() -> HashMap<String, String> {
        HashMap::from([("n1".to_string(), "TVA".to_string()), ("n2".to_string(), "TVA".to_string())])
    }

    #[test]
    fn test_sample_labels_dedup_and_fallback() {
        let c = Community::new("0", vec!["n1".into(), "n2".into(), "n9".into()]);
        assert_eq!(sample_labels(&c, &labels(), 120), vec!["TVA", "n9"]);
        assert_eq!(sample_labels(&c, &labels(), 1), vec!["TVA"]);
    }

    #[test]
    fn test_parse_profile_fallback_keeps_raw_text() {
        let p = parse_profile("Désolé, je ne peux pas.");
        assert_eq!(p.title, "");
        assert_eq!(p.summary, "Désolé, je ne peux pas.");
        assert!(p.keywords.is_empty());
        assert!(!p.is_complete());
    }

    #[tokio::test]
    async fn test_resume_skips_complete_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        let service = Arc::new(ScriptedCompletion {
            calls: AtomicUsize::new(0),
            fail_for: None,
        });
        let profiler = CommunityProfiler::new(service.clone(), ProfilingSettings::default(), RetryPolicy::immediate(3));

        let mut store = ProfileStore::open(&path).unwrap();
        let first = profiler.profile_all(&communities(), &labels(), &mut store, |_| {}).await.unwrap();
        assert_eq!(first.generated, 2);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.get("0").unwrap().keywords, vec!["tva", "taux"]);

        let mut reopened = ProfileStore::open(&path).unwrap();
        let second = profiler.profile_all(&communities(), &labels(), &mut reopened, |_| {}).await.unwrap();
        assert_eq!(second.skipped_complete, 2);
        assert_eq!(second.generated, 0);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_persist_error_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        let service = Arc::new(ScriptedCompletion {
            calls: AtomicUsize::new(0),
            fail_for: Some("Communauté 1\n"),
        });
        let profiler = CommunityProfiler::new(service.clone(), ProfilingSettings::default(), RetryPolicy::immediate(3));

        let mut store = ProfileStore::open(&path).unwrap();
        let report = profiler.profile_all(&communities(), &labels(), &mut store, |_| {}).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1 + 3);

        let failed = ProfileStore::open(&path).unwrap().get("1").cloned().unwrap();
        assert!(failed.summary.starts_with("ERROR: "));
        assert!(failed.error.is_some());
        assert!(!failed.is_complete());

        // The failed community is retried on the next run.
        let again = profiler.profile_all(&communities(), &labels(), &mut store, |_| {}).await.unwrap();
        assert_eq!(again.skipped_complete, 1);
    }
}
