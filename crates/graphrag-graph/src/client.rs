//! Neo4j connection client.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use neo4rs::{ConfigBuilder, Graph, Query};
use serde::de::DeserializeOwned;

use graphrag_core::config::Neo4jSettings;

/// How long the initial ping may take before the server counts as unreachable.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for Neo4j Knowledge Graph operations.
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect and ping.
    ///
    /// neo4rs builds its pool lazily, so `Graph::connect` alone never touches
    /// the server. The `RETURN 1` ping forces a bolt handshake so an
    /// unreachable server fails here instead of on the first real query.
    pub async fn connect(settings: &Neo4jSettings) -> Result<Self> {
        if settings.password.is_empty() {
            bail!("NEO4J_PASSWORD is not set");
        }

        let config = ConfigBuilder::default()
            .uri(&settings.uri)
            .user(&settings.user)
            .password(&settings.password)
            .db(settings.database.as_str())
            .max_connections(4)
            .fetch_size(200)
            .build()
            .context("Failed to build Neo4j config")?;

        let graph = Graph::connect(config)
            .await
            .context("Failed to create Neo4j connection pool")?;

        tokio::time::timeout(CONNECT_TIMEOUT, graph.run(Query::new("RETURN 1".to_string())))
            .await
            .context("Timed out waiting for Neo4j")?
            .context("Neo4j is not responding to queries")?;

        Ok(Self { graph })
    }

    /// Execute a Cypher query that returns no results.
    pub async fn execute(&self, query: Query) -> Result<()> {
        self.graph.run(query).await.context("Neo4j query execution failed")?;
        Ok(())
    }

    /// Run several write queries in one transaction.
    pub async fn execute_all(&self, queries: Vec<Query>) -> Result<()> {
        if queries.is_empty() {
            return Ok(());
        }
        let mut txn = self.graph.start_txn().await.context("Failed to open Neo4j transaction")?;
        txn.run_queries(queries).await.context("Neo4j batch write failed")?;
        txn.commit().await.context("Failed to commit Neo4j transaction")?;
        Ok(())
    }

    /// Execute a Cypher query and return results as rows.
    pub async fn query(&self, query: Query) -> Result<Vec<neo4rs::Row>> {
        let mut result = self.graph.execute(query).await.context("Neo4j query failed")?;

        let mut rows = Vec::new();
        while let Some(row) = result.next().await.context("Failed to read Neo4j row")? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a Cypher query and return a single scalar value.
    pub async fn query_scalar<T: DeserializeOwned>(&self, query: Query, field: &str) -> Result<Option<T>> {
        let rows = self.query(query).await?;
        match rows.into_iter().next() {
            Some(row) => {
                let val: T = row
                    .get(field)
                    .map_err(|e| anyhow::anyhow!("Failed to get field '{}': {:?}", field, e))?;
                Ok(Some(val))
            }
            None => Ok(None),
        }
    }

    /// Count of rows matched by a `RETURN count(..) AS count` query.
    pub async fn count(&self, cypher: &str) -> Result<usize> {
        let n: i64 = self
            .query_scalar(Query::new(cypher.to_string()), "count")
            .await?
            .unwrap_or(0);
        Ok(n.max(0) as usize)
    }
}
