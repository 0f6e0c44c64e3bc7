//! Community detection, selection and profiling.

pub mod detect;
mod leiden;
mod louvain;
pub mod model;
pub mod profile;
pub mod select;
mod weighted;

pub use detect::{CommunityDetector, Detection, DetectionMethod, DetectionReport};
pub use model::{ingest_communities, Community, CommunityInfo, CommunitySnapshot, TopNode};
pub use profile::{CommunityProfile, CommunityProfiler, ProfileReport, ProfileStore};
pub use select::{CommunitySelector, Selection, SelectionStats};

/// Copy title, summary and keywords from complete profiles onto communities.
pub fn apply_profiles<'a>(communities: &mut [Community], profiles: impl IntoIterator<Item = &'a CommunityProfile>) {
    let by_id: std::collections::HashMap<&str, &CommunityProfile> = profiles
        .into_iter()
        .filter(|p| p.is_complete())
        .map(|p| (p.community_id.as_str(), p))
        .collect();
    for community in communities {
        if let Some(profile) = by_id.get(community.id.as_str()) {
            community.title = profile.title.clone();
            community.summary = profile.summary.clone();
            community.keywords = profile.keywords.clone();
        }
    }
}
