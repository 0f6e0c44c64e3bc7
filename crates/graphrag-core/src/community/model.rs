//! Community domain models and snapshot persistence.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{GraphRagError, GraphRagResult};
use crate::graph::builder::string_list;
use crate::persist;

/// A partition cell of the knowledge graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub member_node_ids: Vec<String>,
    pub size: usize,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Community {
    pub fn new(id: impl Into<String>, mut members: Vec<String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        members.retain(|m| seen.insert(m.clone()));
        Self {
            id: id.into(),
            size: members.len(),
            member_node_ids: members,
            ..Self::default()
        }
    }
}

/// A high-degree member listed in [`CommunityInfo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopNode {
    pub id: String,
    pub label: String,
    pub degree: usize,
}

/// Descriptive record computed alongside each detected community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityInfo {
    pub community_id: u32,
    pub size: usize,
    pub theme: String,
    pub top_labels: Vec<String>,
    pub top_types: Vec<String>,
    pub top_nodes: Vec<TopNode>,
}

/// Versioned node → community assignment produced by one detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunitySnapshot {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub method: String,
    pub resolution: f64,
    pub min_size: usize,
    pub seed: Option<u64>,
    pub assignments: BTreeMap<String, u32>,
    #[serde(default)]
    pub info: Vec<CommunityInfo>,
}

impl CommunitySnapshot {
    /// Communities in ascending id order, members in node-id order.
    pub fn communities(&self) -> Vec<Community> {
        let mut grouped: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for (node_id, cid) in &self.assignments {
            grouped.entry(*cid).or_default().push(node_id.clone());
        }
        grouped
            .into_iter()
            .map(|(cid, members)| Community::new(cid.to_string(), members))
            .collect()
    }

    /// Community id → member count.
    pub fn sizes(&self) -> BTreeMap<String, usize> {
        let mut sizes = BTreeMap::new();
        for cid in self.assignments.values() {
            *sizes.entry(cid.to_string()).or_insert(0) += 1;
        }
        sizes
    }

    /// Write the snapshot, numbering it one past whatever is already at `path`.
    pub fn save(&mut self, path: &Path) -> GraphRagResult<()> {
        let previous = match Self::load(path) {
            Ok(prev) => prev.version,
            Err(_) => 0,
        };
        self.version = previous + 1;
        persist::write_json_atomic(path, self)?;
        info!(path = %path.display(), version = self.version, communities = self.sizes().len(), "Community snapshot saved");
        Ok(())
    }

    pub fn load(path: &Path) -> GraphRagResult<Self> {
        persist::read_json(path)
    }
}

/// Resolve a communities document into canonical records.
///
/// Accepts a map `{ "8": {...}, "13": [...] }` or a list `[{...}, {...}]`;
/// each entry may carry members under `members`, `nodes`, `node_ids`,
/// `entities` or `items`, or be a bare member list. Entries without an id or
/// with an unusable shape are skipped with a warning.
pub fn ingest_communities(data: &Value) -> GraphRagResult<Vec<Community>> {
    let entries: Vec<(Option<String>, &Value)> = match data {
        Value::Object(map) => map.iter().map(|(k, v)| (Some(k.clone()), v)).collect(),
        Value::Array(items) => items.iter().map(|v| (None, v)).collect(),
        other => {
            return Err(GraphRagError::InputFormat(format!(
                "communities document must be an object or array, got {}",
                json_kind(other)
            )))
        }
    };

    let mut out = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;

    for (key, value) in entries {
        let id = community_id_of(value).or(key);
        let Some(id) = id else {
            skipped += 1;
            continue;
        };

        let (members, title, summary, keywords) = match value {
            Value::Array(_) | Value::String(_) => (string_list(Some(value)), String::new(), String::new(), Vec::new()),
            Value::Object(obj) => {
                let members = ["members", "nodes", "node_ids", "entities", "items"]
                    .iter()
                    .find_map(|k| obj.get(*k))
                    .map(|v| string_list(Some(v)))
                    .unwrap_or_default();
                let title = text_of(obj.get("title").or_else(|| obj.get("name")));
                let summary = text_of(obj.get("summary"));
                let keywords = string_list(obj.get("keywords").or_else(|| obj.get("key_terms")));
                (members, title, summary, keywords)
            }
            _ => {
                skipped += 1;
                continue;
            }
        };

        let mut community = Community::new(id, members);
        community.title = title;
        community.summary = summary;
        community.keywords = keywords;
        out.push(community);
    }

    if skipped > 0 {
        warn!(skipped, "Skipped community entries with unusable shape");
    }

    Ok(out)
}

fn community_id_of(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    ["community_id", "id", "cid"]
        .iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn text_of(value: Option<&Value>) -> String {
    value.and_then(Value::as_str).map(str::trim).unwrap_or_default().to_string()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ingest_dict_shape() {
        let data = json!({
            "8": {"members": ["a", "b", "a"], "title": " TVA ", "keywords": "taux, tva"},
            "13": ["c"],
            "14": {"community_id": 99, "nodes": ["d"]}
        });
        let communities = ingest_communities(&data).unwrap();
        assert_eq!(communities.len(), 3);
        let c13 = communities.iter().find(|c| c.id == "13").unwrap();
        assert_eq!(c13.member_node_ids, vec!["c"]);
        let c8 = communities.iter().find(|c| c.id == "8").unwrap();
        assert_eq!(c8.size, 2);
        assert_eq!(c8.title, "TVA");
        assert_eq!(c8.keywords, vec!["taux", "tva"]);
        assert!(communities.iter().any(|c| c.id == "99"));
    }

    #[test]
    fn test_ingest_list_shape_skips_missing_ids() {
        let data = json!([{"id": "1", "members": ["a"]}, {"members": ["b"]}, 5]);
        let communities = ingest_communities(&data).unwrap();
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].id, "1");
    }

    #[test]
    fn test_ingest_rejects_scalar_document() {
        assert!(ingest_communities(&json!("nope")).is_err());
    }

    #[test]
    fn test_snapshot_version_increments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("communities.json");
        let mut snapshot = CommunitySnapshot {
            version: 0,
            generated_at: Utc::now(),
            method: "leiden".to_string(),
            resolution: 0.6,
            min_size: 8,
            seed: Some(7),
            assignments: BTreeMap::from([("a".to_string(), 0), ("b".to_string(), 0), ("c".to_string(), 1)]),
            info: Vec::new(),
        };
        snapshot.save(&path).unwrap();
        snapshot.save(&path).unwrap();
        let loaded = CommunitySnapshot::load(&path).unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.sizes().get("0"), Some(&2));
        assert_eq!(loaded.communities().len(), 2);
    }
}
