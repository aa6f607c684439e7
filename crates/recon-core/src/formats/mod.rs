//! # Formats
//!
//! Serialization formats for recon graphs. File I/O lives in the app.

pub mod persistence;

pub use persistence::{
    MAX_PERSISTENCE_PAYLOAD_SIZE, PersistenceHeader, graph_from_bytes, graph_from_json,
    graph_to_bytes, graph_to_json,
};
