//! Layout placement
//!
//! Layout is computed once per structural version and treated as immutable.
//! [`LayoutMemo`] guards the recomputation with the structural hash, so merging
//! enrichment can never move a node.

pub mod layered_tree;

pub use layered_tree::LayeredTreeLayout;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hierarchy::{HierarchyResult, NodeStore, StructuralHash, TreeIndices};
use crate::value_objects::{NodeId, Position2D};

/// World positions by node id
pub type Positions = HashMap<NodeId, Position2D>;

/// Places nodes in world space
pub trait LayoutEngine: Send + Sync {
    /// Compute a position for every node reachable from the root
    fn compute(&self, store: &NodeStore, indices: &TreeIndices) -> HierarchyResult<Positions>;
}

/// Positions computed upstream and handed over as-is
#[derive(Debug, Clone, Default)]
pub struct FixedLayout {
    positions: Positions,
}

impl FixedLayout {
    pub fn new(positions: Positions) -> Self {
        Self { positions }
    }
}

impl FromIterator<(NodeId, Position2D)> for FixedLayout {
    fn from_iter<I: IntoIterator<Item = (NodeId, Position2D)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl LayoutEngine for FixedLayout {
    fn compute(&self, store: &NodeStore, _indices: &TreeIndices) -> HierarchyResult<Positions> {
        let missing = store
            .iter()
            .filter(|(_, node)| !self.positions.contains_key(&node.id))
            .count();
        if missing > 0 {
            tracing::warn!("{} nodes have no upstream position and will not be indexed", missing);
        }
        Ok(self.positions.clone())
    }
}

/// Spacing used by the built-in layered layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Horizontal slot reserved per leaf
    pub sibling_separation: f64,
    /// Vertical distance between depths
    pub level_separation: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            sibling_separation: 200.0,
            level_separation: 220.0,
        }
    }
}

/// Single-entry layout cache keyed by structural hash
#[derive(Debug, Default)]
pub struct LayoutMemo {
    hash: Option<StructuralHash>,
    positions: Arc<Positions>,
    computations: u64,
}

impl LayoutMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positions for `hash`, computing them only when the hash changed
    pub fn positions_for(
        &mut self,
        hash: StructuralHash,
        engine: &dyn LayoutEngine,
        store: &NodeStore,
        indices: &TreeIndices,
    ) -> HierarchyResult<Arc<Positions>> {
        if self.hash == Some(hash) {
            tracing::debug!("Layout reused for structure {}", hash);
            return Ok(self.positions.clone());
        }

        let positions = Arc::new(engine.compute(store, indices)?);
        self.hash = Some(hash);
        self.positions = positions.clone();
        self.computations += 1;
        tracing::info!(
            "Layout computed for structure {} ({} nodes placed)",
            hash,
            positions.len()
        );
        Ok(positions)
    }

    /// How many times a layout was actually computed
    pub fn computations(&self) -> u64 {
        self.computations
    }

    pub fn current_hash(&self) -> Option<StructuralHash> {
        self.hash
    }

    pub fn clear(&mut self) {
        self.hash = None;
        self.positions = Arc::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{StructureRecord, DEFAULT_HERO_COUNT};

    #[test]
    fn test_fixed_layout_passes_positions_through() {
        let records = vec![
            StructureRecord::root("r"),
            StructureRecord::child("a", "r", 0),
        ];
        let mut store = NodeStore::from_records(&records).unwrap();
        let indices = TreeIndices::build(&mut store, DEFAULT_HERO_COUNT).unwrap();
        let layout: FixedLayout = [(NodeId::from("r"), Position2D::new(5.0, 6.0))]
            .into_iter()
            .collect();

        let positions = layout.compute(&store, &indices).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[&NodeId::from("r")], Position2D::new(5.0, 6.0));
    }

    #[test]
    fn test_memo_computes_once_per_hash() {
        let records = vec![
            StructureRecord::root("r"),
            StructureRecord::child("a", "r", 0),
        ];
        let mut store = NodeStore::from_records(&records).unwrap();
        let indices = TreeIndices::build(&mut store, DEFAULT_HERO_COUNT).unwrap();
        let engine = LayeredTreeLayout::default();
        let hash = StructuralHash::of_records(&records);

        let mut memo = LayoutMemo::new();
        let first = memo.positions_for(hash, &engine, &store, &indices).unwrap();
        let second = memo.positions_for(hash, &engine, &store, &indices).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(memo.computations(), 1);

        let other = StructuralHash::of_records(&records[..1]);
        memo.positions_for(other, &engine, &store, &indices).unwrap();
        assert_eq!(memo.computations(), 2);
        assert_eq!(memo.current_hash(), Some(other));
    }
}
