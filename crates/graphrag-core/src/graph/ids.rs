//! Content-derived identifiers for nodes and edges.
//!
//! Node ids are a short blake3 digest of `normalized_label|TYPE`, so the same
//! mention extracted from two chunks always lands on the same node.

/// Default node type when the extractor gave none.
pub const DEFAULT_NODE_TYPE: &str = "ENTITY";

/// Default relation when the extractor gave an empty one.
pub const DEFAULT_RELATION: &str = "REL";

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Trim and uppercase a node type, defaulting to [`DEFAULT_NODE_TYPE`].
pub fn normalize_type(node_type: &str) -> String {
    let t = node_type.trim().to_uppercase();
    if t.is_empty() {
        DEFAULT_NODE_TYPE.to_string()
    } else {
        t
    }
}

/// Canonical node id for a (label, type) pair.
pub fn node_id(label: &str, node_type: &str) -> String {
    let base = format!("{}|{}", normalize_label(label), normalize_type(node_type));
    let hash = blake3::hash(base.as_bytes()).to_hex();
    format!("ent_{}", &hash.as_str()[..12])
}

/// Uppercase a relation name and join its words with underscores.
pub fn normalize_relation(relation: &str) -> String {
    let rel = relation
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase();
    if rel.is_empty() {
        DEFAULT_RELATION.to_string()
    } else {
        rel
    }
}

/// Stable key used to MERGE an edge: the same relation seen twice in the same
/// chunk collapses to one stored edge.
pub fn edge_dedup_key(head_id: &str, tail_id: &str, relation: &str, chunk_id: Option<&str>) -> String {
    let base = format!("{}|{}|{}|{}", head_id, tail_id, relation, chunk_id.unwrap_or(""));
    blake3::hash(base.as_bytes()).to_hex().as_str()[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Impôt   sur le\tRevenu "), "impôt sur le revenu");
        assert_eq!(normalize_label(""), "");
    }

    #[test]
    fn test_node_id_is_pure() {
        let a = node_id("Impôt sur le Revenu", "impot");
        let b = node_id("  impôt SUR le revenu", "IMPOT ");
        assert_eq!(a, b);
        assert!(a.starts_with("ent_"));
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_node_id_distinguishes_type_and_label() {
        let ir = node_id("IR", "IMPOT");
        assert_ne!(ir, node_id("IR", "PERSONNE"));
        assert_ne!(ir, node_id("IS", "IMPOT"));
    }

    #[test]
    fn test_missing_type_defaults_to_entity() {
        assert_eq!(node_id("TVA", ""), node_id("TVA", "ENTITY"));
    }

    #[test]
    fn test_normalize_relation() {
        assert_eq!(normalize_relation("applique a"), "APPLIQUE_A");
        assert_eq!(normalize_relation("  "), "REL");
    }

    #[test]
    fn test_edge_dedup_key_depends_on_chunk() {
        let k1 = edge_dedup_key("a", "b", "REL", Some("1"));
        let k2 = edge_dedup_key("a", "b", "REL", Some("2"));
        assert_ne!(k1, k2);
        assert_eq!(k1, edge_dedup_key("a", "b", "REL", Some("1")));
    }
}
