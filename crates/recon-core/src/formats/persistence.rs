//! # Persistence Format
//!
//! Binary and JSON serialization for recon graphs.
//!
//! Binary format: Header (5 bytes) + postcard-serialized records.
//! - 4 bytes: Magic ("RECN")
//! - 1 byte: Version
//!
//! postcard is not self-describing, so open attribute maps travel inside
//! the records as JSON text.
//!
//! ## Limits
//!
//! The payload size is checked and the header validated before any
//! decoding takes place.

use crate::graph::{Graph, SerializableGraph};
use crate::primitives;
use crate::types::{Attributes, Edge, Node, ReconError};
use serde::{Deserialize, Serialize};

/// Maximum accepted size of a serialized graph.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 500 * 1024 * 1024; // 500 MB

const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes all graph data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(ReconError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(ReconError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReconError> {
        let Some(header) = bytes.get(..HEADER_SIZE) else {
            return Err(ReconError::DeserializationError(
                "Header too short".to_string(),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        Ok(Self {
            magic,
            version: header[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// RECORDS
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    id: String,
    node_type: String,
    label: String,
    props: String,
    parent: Option<String>,
    weight: u64,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeRecord {
    id: String,
    source: String,
    target: String,
    edge_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphRecord {
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
}

fn encode(attributes: &Attributes) -> Result<String, ReconError> {
    serde_json::to_string(attributes).map_err(|e| ReconError::SerializationError(e.to_string()))
}

fn decode(text: &str) -> Result<Attributes, ReconError> {
    serde_json::from_str(text).map_err(|e| ReconError::DeserializationError(e.to_string()))
}

impl GraphRecord {
    fn from_form(form: &SerializableGraph) -> Result<Self, ReconError> {
        let nodes = form
            .nodes
            .iter()
            .map(|node| {
                Ok(NodeRecord {
                    id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    label: node.label.clone(),
                    props: encode(&node.props)?,
                    parent: node.parent.clone(),
                    weight: node.weight,
                    data: encode(&node.data)?,
                })
            })
            .collect::<Result<Vec<_>, ReconError>>()?;
        let edges = form
            .edges
            .iter()
            .map(|edge| {
                Ok(EdgeRecord {
                    id: edge.id.clone(),
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    edge_type: edge.edge_type.clone(),
                    data: encode(&edge.data)?,
                })
            })
            .collect::<Result<Vec<_>, ReconError>>()?;
        Ok(Self { nodes, edges })
    }

    fn into_form(self) -> Result<SerializableGraph, ReconError> {
        let nodes = self
            .nodes
            .into_iter()
            .map(|record| {
                Ok(Node {
                    id: record.id,
                    node_type: record.node_type,
                    label: record.label,
                    props: decode(&record.props)?,
                    parent: record.parent,
                    weight: record.weight,
                    data: decode(&record.data)?,
                })
            })
            .collect::<Result<Vec<_>, ReconError>>()?;
        let edges = self
            .edges
            .into_iter()
            .map(|record| {
                Ok(Edge {
                    id: record.id,
                    source: record.source,
                    target: record.target,
                    edge_type: record.edge_type,
                    data: decode(&record.data)?,
                })
            })
            .collect::<Result<Vec<_>, ReconError>>()?;
        Ok(SerializableGraph { nodes, edges })
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a graph to bytes (header + payload).
pub fn graph_to_bytes(graph: &Graph) -> Result<Vec<u8>, ReconError> {
    let record = GraphRecord::from_form(&SerializableGraph::from(graph))?;
    let payload =
        postcard::to_stdvec(&record).map_err(|e| ReconError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&PersistenceHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a graph from bytes.
///
/// Validates, in order: minimum size, maximum size, header. Only then is
/// the payload decoded.
pub fn graph_from_bytes(bytes: &[u8]) -> Result<Graph, ReconError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ReconError::DeserializationError(
            "Data too short: minimum 5 bytes required".to_string(),
        ));
    }
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(ReconError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }

    PersistenceHeader::from_bytes(bytes)?.validate()?;

    let record: GraphRecord = postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        ReconError::DeserializationError(format!("Failed to deserialize graph data: {}", e))
    })?;
    Ok(Graph::from(record.into_form()?))
}

/// Pretty JSON structural form (`{"nodes": [...], "edges": [...]}`).
pub fn graph_to_json(graph: &Graph) -> Result<String, ReconError> {
    serde_json::to_string_pretty(&SerializableGraph::from(graph))
        .map_err(|e| ReconError::SerializationError(e.to_string()))
}

pub fn graph_from_json(text: &str) -> Result<Graph, ReconError> {
    if text.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(ReconError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            text.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }
    let form: SerializableGraph =
        serde_json::from_str(text).map_err(|e| ReconError::DeserializationError(e.to_string()))?;
    Ok(Graph::from(form))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeSpec;
    use serde_json::json;

    fn sample() -> Graph {
        let mut graph = Graph::new();
        let group = graph.ensure_group("Shodan");
        graph
            .upsert_elements(vec![
                NodeSpec::new("domain", "example.com")
                    .with_id("d")
                    .with_prop("nested", json!({"a": [1, 2, {"b": null}]})),
                NodeSpec::new("ipv4", "93.184.216.34")
                    .with_id("i")
                    .with_parent(group)
                    .with_data("confidence", "high")
                    .with_edge("d"),
            ])
            .expect("upsert");
        graph.set_weight("d", 1).expect("weight");
        graph
    }

    #[test]
    fn header_roundtrip() {
        let header = PersistenceHeader::new();
        let restored = PersistenceHeader::from_bytes(&header.to_bytes()).expect("parse header");
        assert_eq!(restored, header);
    }

    #[test]
    fn bytes_roundtrip_bit_exact() {
        let graph = sample();
        let bytes1 = graph_to_bytes(&graph).expect("first serialize");
        let restored = graph_from_bytes(&bytes1).expect("deserialize");
        let bytes2 = graph_to_bytes(&restored).expect("second serialize");

        assert_eq!(bytes1, bytes2, "save -> load -> save must produce identical bytes");
        assert_eq!(
            SerializableGraph::from(&restored),
            SerializableGraph::from(&graph)
        );
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = vec![0u8; 10];
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(graph_from_bytes(&bytes).is_err());
    }

    #[test]
    fn truncated_data_rejected() {
        assert!(graph_from_bytes(b"REC").is_err());
        let mut bytes = graph_to_bytes(&sample()).expect("serialize");
        bytes.truncate(bytes.len() / 2);
        assert!(graph_from_bytes(&bytes).is_err());
    }

    #[test]
    fn json_roundtrip() {
        let graph = sample();
        let text = graph_to_json(&graph).expect("json");
        let restored = graph_from_json(&text).expect("parse");

        assert_eq!(
            SerializableGraph::from(&restored),
            SerializableGraph::from(&graph)
        );
        assert!(text.contains("\"confidence\": \"high\""));
    }
}
