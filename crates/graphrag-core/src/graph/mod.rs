//! Knowledge graph construction and storage.

pub mod builder;
pub mod ids;
pub mod model;
pub mod store;

pub use builder::{graph_input_from_records, BuildReport, BuiltGraph, EntityGraphBuilder};
pub use model::{CommunityBrief, CommunityMembership, Edge, EvidenceTriple, GraphCounts, GraphSnapshot, Node};
pub use store::{GraphStore, MemoryGraphStore};
