//! Qdrant vector backend.
//!
//! Each build drops and recreates the collection, then upserts one point per
//! index position: point id `i` carries vector `i` and the community
//! metadata of item `i` as payload.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    value::Kind, CreateCollectionBuilder, DeleteCollectionBuilder, Distance, ListValue, PointId, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info, warn};

use graphrag_core::config::{IndexMetric, IndexSettings};
use graphrag_core::{GraphRagError, GraphRagResult};

use crate::index::IndexItem;
use crate::vector::VectorIndex;

/// Points sent per upsert request.
const UPSERT_BATCH: usize = 256;

const SERVICE: &str = "qdrant";

pub struct QdrantVectorIndex {
    client: Qdrant,
    collection: String,
}

fn service_error(action: &str, e: impl std::fmt::Display) -> GraphRagError {
    GraphRagError::transient(SERVICE, format!("{action}: {e}"))
}

impl QdrantVectorIndex {
    /// Client for the configured endpoint and collection.
    pub fn connect(settings: &IndexSettings) -> GraphRagResult<Self> {
        let client = Qdrant::from_url(&settings.qdrant_url)
            .build()
            .map_err(|e| GraphRagError::config(format!("invalid Qdrant endpoint {}: {e}", settings.qdrant_url)))?;
        Ok(Self {
            client,
            collection: settings.collection.clone(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn recreate_collection(&self, metric: IndexMetric, dim: usize) -> GraphRagResult<()> {
        let exists = self
            .client
            .collection_exists(self.collection.as_str())
            .await
            .map_err(|e| service_error("check collection", e))?;
        if exists {
            self.client
                .delete_collection(DeleteCollectionBuilder::new(self.collection.as_str()))
                .await
                .map_err(|e| service_error("drop collection", e))?;
            debug!(collection = %self.collection, "Dropped previous collection");
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(self.collection.as_str())
                    .vectors_config(VectorParamsBuilder::new(dim as u64, distance(metric))),
            )
            .await
            .map_err(|e| service_error("create collection", e))?;
        info!(collection = %self.collection, dim, ?metric, "Created Qdrant collection");
        Ok(())
    }
}

fn distance(metric: IndexMetric) -> Distance {
    match metric {
        IndexMetric::Cosine => Distance::Cosine,
        IndexMetric::L2 => Distance::Euclid,
    }
}

/// Index position stored in a point id; uuid ids belong to no position.
fn position(id: Option<PointId>) -> Option<usize> {
    match id?.point_id_options? {
        PointIdOptions::Num(n) => usize::try_from(n).ok(),
        PointIdOptions::Uuid(_) => None,
    }
}

fn string_value(s: &str) -> Value {
    Value {
        kind: Some(Kind::StringValue(s.to_string())),
    }
}

/// Community metadata attached to a point.
fn item_payload(item: &IndexItem) -> HashMap<String, Value> {
    let keywords = item.keywords.iter().map(|k| string_value(k)).collect();
    HashMap::from([
        ("community_id".to_string(), string_value(&item.community_id)),
        ("title".to_string(), string_value(&item.title)),
        ("summary".to_string(), string_value(&item.summary)),
        (
            "keywords".to_string(),
            Value {
                kind: Some(Kind::ListValue(ListValue { values: keywords })),
            },
        ),
        (
            "member_count".to_string(),
            Value {
                kind: Some(Kind::IntegerValue(item.member_count as i64)),
            },
        ),
    ])
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn rebuild(&self, metric: IndexMetric, dim: usize, vectors: &[Vec<f32>], items: &[IndexItem]) -> GraphRagResult<()> {
        if vectors.len() != items.len() {
            return Err(GraphRagError::GraphInconsistency(format!(
                "{} vectors for {} index items",
                vectors.len(),
                items.len()
            )));
        }
        self.recreate_collection(metric, dim).await?;

        let points: Vec<PointStruct> = vectors
            .iter()
            .zip(items)
            .enumerate()
            .map(|(i, (vector, item))| PointStruct::new(i as u64, vector.clone(), item_payload(item)))
            .collect();
        let total = points.len();
        let mut batches = points.into_iter().peekable();
        while batches.peek().is_some() {
            let batch: Vec<PointStruct> = batches.by_ref().take(UPSERT_BATCH).collect();
            self.client
                .upsert_points(UpsertPointsBuilder::new(self.collection.as_str(), batch).wait(true))
                .await
                .map_err(|e| service_error("upsert points", e))?;
        }
        info!(collection = %self.collection, points = total, "Upserted community vectors");
        Ok(())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> GraphRagResult<Vec<(usize, f32)>> {
        let response = self
            .client
            .search_points(SearchPointsBuilder::new(self.collection.as_str(), query.to_vec(), k as u64))
            .await
            .map_err(|e| service_error("search points", e))?;
        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            match position(point.id) {
                Some(i) => hits.push((i, point.score)),
                None => warn!(collection = %self.collection, "Skipping point without a numeric id"),
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_ids_map_to_positions() {
        assert_eq!(position(Some(PointId::from(7u64))), Some(7));
        assert_eq!(position(Some(PointId::from("0b7c3f0e-5d0c-4c1e-9a53-2f1f3b0f6a11".to_string()))), None);
        assert_eq!(position(None), None);
    }

    #[test]
    fn test_payload_carries_community_metadata() {
        let item = IndexItem {
            community_id: "12".to_string(),
            title: "TVA".to_string(),
            summary: "Taux et exonérations.".to_string(),
            keywords: vec!["tva".to_string(), "taux".to_string()],
            member_count: 31,
        };
        let payload = item_payload(&item);
        assert_eq!(payload.len(), 5);
        assert_eq!(payload["community_id"].kind, Some(Kind::StringValue("12".to_string())));
        assert_eq!(payload["member_count"].kind, Some(Kind::IntegerValue(31)));
        match &payload["keywords"].kind {
            Some(Kind::ListValue(list)) => {
                assert_eq!(list.values, vec![string_value("tva"), string_value("taux")]);
            }
            other => panic!("unexpected keywords payload {other:?}"),
        }
    }

    #[test]
    fn test_metric_maps_to_distance() {
        assert_eq!(distance(IndexMetric::Cosine), Distance::Cosine);
        assert_eq!(distance(IndexMetric::L2), Distance::Euclid);
    }
}
