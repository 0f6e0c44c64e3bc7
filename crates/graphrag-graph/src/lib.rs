//! # GraphRAG Graph
//!
//! Neo4j persistence for the entity graph and its communities.

pub mod client;
pub mod schema;
pub mod store;

pub use client::GraphClient;
pub use schema::initialize_schema;
pub use store::Neo4jGraphStore;
