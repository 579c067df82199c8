//! The node set and its structural metadata
//!
//! Structure (ids, parents, sibling order, positions) and enrichment (photo,
//! biography, phone) travel on separate paths. Only a structural change rebuilds
//! the indices; enrichment merges never touch positions.

pub mod connection;
pub mod indices;
pub mod node;
pub mod shared;
pub mod store;
pub mod structural_hash;

pub use connection::Connection;
pub use indices::{TreeIndices, DEFAULT_HERO_COUNT};
pub use node::{EnrichmentRecord, Node, NodeIndex, RichData, StructureRecord};
pub use shared::{HierarchySnapshot, HierarchyVersion, MergeReport, SharedHierarchy};
pub use store::NodeStore;
pub use structural_hash::StructuralHash;

use crate::value_objects::NodeId;

/// Errors raised while building or mutating the node set
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HierarchyError {
    #[error("No root node: every node has a parent")]
    MissingRoot,

    #[error("Ambiguous root: {} nodes have no parent ({})", roots.len(), format_ids(roots))]
    AmbiguousRoot { roots: Vec<NodeId> },

    #[error("Circular parent reference through node {node}")]
    CycleDetected { node: NodeId },

    #[error("Structure contains no nodes")]
    EmptyStructure,

    #[error("Hierarchy has not been loaded yet")]
    NotReady,

    #[error("Layout failed: {0}")]
    Layout(String),
}

/// Result type for hierarchy operations
pub type HierarchyResult<T> = Result<T, HierarchyError>;

fn format_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .take(5)
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
