//! [`GraphStore`] backed by Neo4j.
//!
//! Layout:
//! - `(:Entity {id, label, type, type_key, aliases, alias_keys, search, community_id})`
//! - `(:Entity)-[:REL {rid, relation, confidence, evidence, chunk_id}]->(:Entity)`
//! - `(:Community {id, size, title, summary, keywords})`
//! - `(:Entity)-[:IN_COMMUNITY]->(:Community)`

use async_trait::async_trait;
use neo4rs::{Query, Row};
use tracing::{debug, info};

use graphrag_core::community::{Community, CommunityProfile};
use graphrag_core::config::Neo4jSettings;
use graphrag_core::graph::store::type_key;
use graphrag_core::graph::{
    CommunityBrief, CommunityMembership, Edge, EvidenceTriple, GraphCounts, GraphSnapshot, GraphStore, Node,
};
use graphrag_core::text;
use graphrag_core::{GraphRagError, GraphRagResult};

use crate::schema::initialize_schema;
use crate::GraphClient;

/// Queries sent per write transaction.
const WRITE_BATCH: usize = 500;

pub struct Neo4jGraphStore {
    client: GraphClient,
}

fn storage(e: anyhow::Error) -> GraphRagError {
    GraphRagError::storage(format!("{e:#}"))
}

impl Neo4jGraphStore {
    /// Connect, ping and make sure constraints and indexes exist.
    pub async fn connect(settings: &Neo4jSettings) -> GraphRagResult<Self> {
        if settings.password.is_empty() {
            return Err(GraphRagError::config("NEO4J_PASSWORD is not set"));
        }
        let client = GraphClient::connect(settings).await.map_err(storage)?;
        initialize_schema(&client).await.map_err(storage)?;
        info!(uri = %settings.uri, database = %settings.database, "Connected to Neo4j");
        Ok(Self { client })
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    async fn write_batched(&self, queries: Vec<Query>) -> GraphRagResult<usize> {
        let total = queries.len();
        let mut queries = queries.into_iter().peekable();
        while queries.peek().is_some() {
            let batch: Vec<Query> = queries.by_ref().take(WRITE_BATCH).collect();
            self.client.execute_all(batch).await.map_err(storage)?;
        }
        Ok(total)
    }

    async fn rows(&self, query: Query) -> GraphRagResult<Vec<Row>> {
        self.client.query(query).await.map_err(storage)
    }
}

/// Aliases are unioned with the stored ones, so a later extraction pass
/// never drops what an earlier one found. `search` is rebuilt from the
/// merged folded aliases.
fn node_query(node: &Node) -> Query {
    Query::new(
        "MERGE (e:Entity {id: $id})
         SET e.label = $label,
             e.type = $type,
             e.type_key = $type_key,
             e.aliases = reduce(acc = coalesce(e.aliases, []), a IN $aliases |
                                CASE WHEN a IN acc THEN acc ELSE acc + a END),
             e.alias_keys = reduce(acc = coalesce(e.alias_keys, []), a IN $alias_keys |
                                   CASE WHEN a IN acc THEN acc ELSE acc + a END)
         SET e.search = reduce(s = $label_key, a IN e.alias_keys | s + '\\n' + a)"
            .to_string(),
    )
    .param("id", node.id.as_str())
    .param("label", node.label.as_str())
    .param("type", node.node_type.as_str())
    .param("type_key", type_key(&node.node_type))
    .param("aliases", node.aliases.clone())
    .param("alias_keys", alias_keys(node))
    .param("label_key", text::fold(&node.label))
}

fn alias_keys(node: &Node) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(node.aliases.len());
    for key in node.aliases.iter().map(|a| text::fold(a)) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn edge_query(edge: &Edge) -> Query {
    Query::new(
        "MATCH (h:Entity {id: $head}), (t:Entity {id: $tail})
         MERGE (h)-[r:REL {rid: $rid}]->(t)
         SET r.relation = $relation,
             r.confidence = $confidence,
             r.evidence = $evidence,
             r.chunk_id = $chunk_id"
            .to_string(),
    )
    .param("head", edge.head_id.as_str())
    .param("tail", edge.tail_id.as_str())
    .param("rid", edge.dedup_key.as_str())
    .param("relation", edge.relation.as_str())
    .param("confidence", edge.confidence)
    .param("evidence", edge.evidence.as_str())
    .param("chunk_id", edge.source_chunk_id.clone().unwrap_or_default())
}

/// Empty chunk ids are stored for edges without a source chunk.
fn chunk_from_db(raw: String) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

fn get<T: serde::de::DeserializeOwned>(row: &Row, field: &str) -> GraphRagResult<T> {
    row.get::<T>(field)
        .map_err(|e| GraphRagError::storage(format!("missing field '{field}': {e:?}")))
}

fn opt<T: serde::de::DeserializeOwned + Default>(row: &Row, field: &str) -> T {
    row.get::<T>(field).unwrap_or_default()
}

fn brief_from_row(row: &Row) -> GraphRagResult<CommunityBrief> {
    Ok(CommunityBrief {
        id: get(row, "cid")?,
        size: opt::<i64>(row, "size").max(0) as usize,
        title: opt(row, "title"),
        summary: opt(row, "summary"),
        keywords: opt(row, "keywords"),
    })
}

const TRIPLE_RETURN: &str = "RETURN h.id AS head_id, h.label AS head_label, h.type AS head_type,
                r.relation AS relation,
                t.id AS tail_id, t.label AS tail_label, t.type AS tail_type,
                coalesce(r.evidence, '') AS evidence, coalesce(r.chunk_id, '') AS chunk_id,
                coalesce(r.confidence, 0.0) AS confidence, r.rid AS rid";

fn triple_from_row(row: &Row) -> GraphRagResult<EvidenceTriple> {
    Ok(EvidenceTriple {
        head_id: get(row, "head_id")?,
        head_label: opt(row, "head_label"),
        head_type: opt(row, "head_type"),
        relation: get(row, "relation")?,
        tail_id: get(row, "tail_id")?,
        tail_label: opt(row, "tail_label"),
        tail_type: opt(row, "tail_type"),
        evidence: opt(row, "evidence"),
        source_chunk_id: chunk_from_db(opt(row, "chunk_id")),
        confidence: opt(row, "confidence"),
        dedup_key: get(row, "rid")?,
    })
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn upsert_nodes(&self, nodes: &[Node]) -> GraphRagResult<usize> {
        let written = self.write_batched(nodes.iter().map(node_query).collect()).await?;
        debug!(nodes = written, "Upserted entities");
        Ok(written)
    }

    async fn upsert_edges(&self, edges: &[Edge]) -> GraphRagResult<usize> {
        // Edges whose endpoints are missing match nothing and are skipped.
        let written = self.write_batched(edges.iter().map(edge_query).collect()).await?;
        debug!(edges = written, "Upserted relations");
        Ok(written)
    }

    async fn load_graph(&self) -> GraphRagResult<GraphSnapshot> {
        let node_rows = self
            .rows(Query::new(
                "MATCH (e:Entity)
                 RETURN e.id AS id, coalesce(e.label, '') AS label, coalesce(e.type, '') AS type,
                        coalesce(e.aliases, []) AS aliases
                 ORDER BY e.id"
                    .to_string(),
            ))
            .await?;
        let nodes = node_rows
            .iter()
            .map(|row| {
                Ok(Node {
                    id: get(row, "id")?,
                    label: opt(row, "label"),
                    node_type: opt(row, "type"),
                    aliases: opt(row, "aliases"),
                })
            })
            .collect::<GraphRagResult<Vec<_>>>()?;

        let edge_rows = self
            .rows(Query::new(
                "MATCH (h:Entity)-[r:REL]->(t:Entity)
                 RETURN h.id AS head_id, t.id AS tail_id, r.relation AS relation,
                        coalesce(r.confidence, 0.0) AS confidence, coalesce(r.evidence, '') AS evidence,
                        coalesce(r.chunk_id, '') AS chunk_id, r.rid AS rid
                 ORDER BY r.rid"
                    .to_string(),
            ))
            .await?;
        let edges = edge_rows
            .iter()
            .map(|row| {
                Ok(Edge {
                    head_id: get(row, "head_id")?,
                    tail_id: get(row, "tail_id")?,
                    relation: get(row, "relation")?,
                    confidence: opt(row, "confidence"),
                    evidence: opt(row, "evidence"),
                    source_chunk_id: chunk_from_db(opt(row, "chunk_id")),
                    dedup_key: get(row, "rid")?,
                })
            })
            .collect::<GraphRagResult<Vec<_>>>()?;

        info!(nodes = nodes.len(), edges = edges.len(), "Loaded graph from Neo4j");
        Ok(GraphSnapshot { nodes, edges })
    }

    async fn replace_communities(&self, communities: &[Community]) -> GraphRagResult<usize> {
        let mut queries = vec![
            Query::new("MATCH (c:Community) DETACH DELETE c".to_string()),
            Query::new("MATCH (e:Entity) WHERE e.community_id IS NOT NULL REMOVE e.community_id".to_string()),
        ];
        for community in communities {
            queries.push(
                Query::new(
                    "CREATE (c:Community {id: $id, size: $size, title: $title, summary: $summary, keywords: $keywords})"
                        .to_string(),
                )
                .param("id", community.id.as_str())
                .param("size", community.size as i64)
                .param("title", community.title.as_str())
                .param("summary", community.summary.as_str())
                .param("keywords", community.keywords.clone()),
            );
            queries.push(
                Query::new(
                    "MATCH (c:Community {id: $id})
                     UNWIND $members AS member
                     MATCH (e:Entity {id: member})
                     SET e.community_id = $id
                     MERGE (e)-[:IN_COMMUNITY]->(c)"
                        .to_string(),
                )
                .param("id", community.id.as_str())
                .param("members", community.member_node_ids.clone()),
            );
        }
        self.write_batched(queries).await?;
        info!(communities = communities.len(), "Replaced communities in Neo4j");
        Ok(communities.len())
    }

    async fn upsert_profiles(&self, profiles: &[CommunityProfile]) -> GraphRagResult<usize> {
        let mut updated = 0;
        for profile in profiles.iter().filter(|p| p.error.is_none()) {
            let query = Query::new(
                "MATCH (c:Community {id: $id})
                 SET c.title = $title, c.summary = $summary, c.keywords = $keywords
                 RETURN count(c) AS count"
                    .to_string(),
            )
            .param("id", profile.community_id.as_str())
            .param("title", profile.title.as_str())
            .param("summary", profile.summary.as_str())
            .param("keywords", profile.keywords.clone());
            let matched: i64 = self
                .client
                .query_scalar(query, "count")
                .await
                .map_err(storage)?
                .unwrap_or(0);
            if matched > 0 {
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn match_entities(&self, candidates: &[String], limit: usize) -> GraphRagResult<Vec<Node>> {
        let needles: Vec<String> = candidates
            .iter()
            .map(|c| text::fold(c.trim()))
            .filter(|c| !c.is_empty())
            .collect();
        if needles.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // A needle with no label or alias hit falls back to the entities whose
        // type it names, ranked after every label hit.
        let query = Query::new(
            "UNWIND range(0, size($needles) - 1) AS i
             OPTIONAL MATCH (e:Entity) WHERE e.search CONTAINS $needles[i]
             WITH i, collect(e) AS by_label
             OPTIONAL MATCH (t:Entity) WHERE size(by_label) = 0 AND t.type_key = $needles[i]
             WITH i, by_label, collect(t) AS by_type
             WITH [x IN by_label | {node: x, rank: i}] +
                  [x IN by_type | {node: x, rank: size($needles) + i}] AS hits
             UNWIND hits AS hit
             WITH hit.node AS e, min(hit.rank) AS rank
             RETURN e.id AS id, coalesce(e.label, '') AS label, coalesce(e.type, '') AS type,
                    coalesce(e.aliases, []) AS aliases
             ORDER BY rank, e.id
             LIMIT $limit"
                .to_string(),
        )
        .param("needles", needles)
        .param("limit", limit as i64);

        self.rows(query)
            .await?
            .iter()
            .map(|row| {
                Ok(Node {
                    id: get(row, "id")?,
                    label: opt(row, "label"),
                    node_type: opt(row, "type"),
                    aliases: opt(row, "aliases"),
                })
            })
            .collect()
    }

    async fn community_memberships(&self, node_ids: &[String]) -> GraphRagResult<Vec<CommunityMembership>> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = Query::new(
            "MATCH (e:Entity)-[:IN_COMMUNITY]->(c:Community)
             WHERE e.id IN $ids
             RETURN e.id AS node_id, c.id AS cid, coalesce(c.size, 0) AS size,
                    coalesce(c.title, '') AS title, coalesce(c.summary, '') AS summary,
                    coalesce(c.keywords, []) AS keywords"
                .to_string(),
        )
        .param("ids", node_ids.to_vec());

        self.rows(query)
            .await?
            .iter()
            .map(|row| {
                Ok(CommunityMembership {
                    node_id: get(row, "node_id")?,
                    community: brief_from_row(row)?,
                })
            })
            .collect()
    }

    async fn incident_triples(
        &self,
        node_ids: &[String],
        community_ids: &[String],
        limit: usize,
    ) -> GraphRagResult<Vec<EvidenceTriple>> {
        if node_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let cypher = format!(
            "MATCH (h:Entity)-[r:REL]->(t:Entity)
             WHERE (h.id IN $ids OR t.id IN $ids)
               AND (size($cids) = 0 OR h.community_id IN $cids OR t.community_id IN $cids)
             {TRIPLE_RETURN}
             ORDER BY confidence DESC, rid
             LIMIT $limit"
        );
        let query = Query::new(cypher)
            .param("ids", node_ids.to_vec())
            .param("cids", community_ids.to_vec())
            .param("limit", limit as i64);

        self.rows(query).await?.iter().map(triple_from_row).collect()
    }

    async fn counts(&self) -> GraphRagResult<GraphCounts> {
        Ok(GraphCounts {
            nodes: self
                .client
                .count("MATCH (e:Entity) RETURN count(e) AS count")
                .await
                .map_err(storage)?,
            relationships: self
                .client
                .count("MATCH ()-[r:REL]->() RETURN count(r) AS count")
                .await
                .map_err(storage)?,
            communities: self
                .client
                .count("MATCH (c:Community) RETURN count(c) AS count")
                .await
                .map_err(storage)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_round_trip_through_empty_string() {
        assert_eq!(chunk_from_db(String::new()), None);
        assert_eq!(chunk_from_db("c12".to_string()), Some("c12".to_string()));
    }

    #[test]
    fn test_alias_keys_fold_and_dedup() {
        let node = Node {
            id: "n1".to_string(),
            label: "IR".to_string(),
            node_type: "IMPOT".to_string(),
            aliases: vec!["Impôt sur le revenu".to_string(), "impot sur le revenu".to_string(), "IRPP".to_string()],
        };
        assert_eq!(alias_keys(&node), vec!["impot sur le revenu", "irpp"]);
    }

    #[tokio::test]
    async fn test_connect_requires_password() {
        let settings = Neo4jSettings::default();
        match Neo4jGraphStore::connect(&settings).await {
            Err(GraphRagError::Config(msg)) => assert!(msg.contains("NEO4J_PASSWORD")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connected without a password"),
        }
    }
}
