//! # Identity Resolver
//!
//! Deterministic ids for elements that arrive without one.
//!
//! - Node ids are a BLAKE3 digest of `(type, label)`, so re-discovering the
//!   same entity always lands on the same node.
//! - Edge ids encode `(type, source, target)` verbatim, so re-declaring the
//!   same relationship merges instead of duplicating.

/// Number of hex characters kept from the node digest (128 bits).
const NODE_ID_HEX_LEN: usize = 32;

/// Derive the id of a node from its type and label.
///
/// Both fields are length-prefixed before hashing, so `("a:b", "c")` and
/// `("a", "b:c")` never collide by concatenation.
#[must_use]
pub fn derive_node_id(node_type: &str, label: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(node_type.len() as u64).to_le_bytes());
    hasher.update(node_type.as_bytes());
    hasher.update(&(label.len() as u64).to_le_bytes());
    hasher.update(label.as_bytes());
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..NODE_ID_HEX_LEN].to_string()
}

/// Derive the id of an edge from its type and endpoints.
#[must_use]
pub fn derive_edge_id(edge_type: &str, source: &str, target: &str) -> String {
    format!("edge:{edge_type}:{source}:{target}")
}

/// Derive the id of the group node for a label.
#[must_use]
pub fn derive_group_id(label: &str) -> String {
    derive_node_id(crate::types::kind::GROUP, label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_deterministic() {
        let first = derive_node_id("domain", "example.com");
        let second = derive_node_id("domain", "example.com");
        assert_eq!(first, second);
        assert_eq!(first.len(), NODE_ID_HEX_LEN);
    }

    #[test]
    fn node_id_depends_on_type_and_label() {
        let domain = derive_node_id("domain", "example.com");
        assert_ne!(domain, derive_node_id("brand", "example.com"));
        assert_ne!(domain, derive_node_id("domain", "example.org"));
    }

    #[test]
    fn node_id_resists_concatenation_collisions() {
        assert_ne!(derive_node_id("a:b", "c"), derive_node_id("a", "b:c"));
        assert_ne!(derive_node_id("ab", ""), derive_node_id("a", "b"));
    }

    #[test]
    fn edge_id_encodes_endpoints() {
        assert_eq!(derive_edge_id("", "s", "t"), "edge::s:t");
        assert_eq!(derive_edge_id("resolves", "s", "t"), "edge:resolves:s:t");
    }

    #[test]
    fn group_id_matches_node_derivation() {
        assert_eq!(derive_group_id("Shodan"), derive_node_id("group", "Shodan"));
    }
}
