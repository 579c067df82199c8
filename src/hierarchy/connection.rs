//! Parent → children groups, the unit the connection geometry is built from

use super::indices::TreeIndices;
use super::node::NodeIndex;
use super::store::NodeStore;

/// One parent with its ordered children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub parent: NodeIndex,
    pub children: Vec<NodeIndex>,
}

impl Connection {
    /// Derive every connection reachable from the root, in breadth-first order.
    ///
    /// Recomputed on structural change only; enrichment leaves it untouched.
    pub fn derive_all(store: &NodeStore, indices: &TreeIndices) -> Vec<Connection> {
        indices
            .bfs_order()
            .iter()
            .filter_map(|&parent| {
                let children = store.children(parent);
                (!children.is_empty()).then(|| Connection {
                    parent,
                    children: children.to_vec(),
                })
            })
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.children.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{StructureRecord, DEFAULT_HERO_COUNT};

    #[test]
    fn test_derive_all_skips_leaves() {
        let records = vec![
            StructureRecord::root("r"),
            StructureRecord::child("a", "r", 1),
            StructureRecord::child("b", "r", 0),
            StructureRecord::child("a1", "a", 0),
        ];
        let mut store = NodeStore::from_records(&records).unwrap();
        let indices = TreeIndices::build(&mut store, DEFAULT_HERO_COUNT).unwrap();
        let connections = Connection::derive_all(&store, &indices);

        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0].parent, 0);
        assert_eq!(connections[0].children, vec![2, 1]);
        assert_eq!(connections[1].edge_count(), 1);
    }
}
