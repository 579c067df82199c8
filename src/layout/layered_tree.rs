//! Top-down layered tree layout
//!
//! Every leaf reserves one horizontal slot; a parent is centered over the span of
//! its children. Two linear passes: widths bottom-up over the post-order, then
//! placement top-down over the breadth-first order.

use super::{LayoutConfig, LayoutEngine, Positions};
use crate::hierarchy::{HierarchyError, HierarchyResult, NodeStore, TreeIndices};
use crate::value_objects::Position2D;

/// Layered (Reingold-Tilford style, without contour compaction) layout
#[derive(Debug, Clone, Default)]
pub struct LayeredTreeLayout {
    config: LayoutConfig,
}

impl LayeredTreeLayout {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }
}

impl LayoutEngine for LayeredTreeLayout {
    fn compute(&self, store: &NodeStore, indices: &TreeIndices) -> HierarchyResult<Positions> {
        let slot = self.config.sibling_separation;
        let level = self.config.level_separation;
        if !(slot > 0.0 && level > 0.0) {
            return Err(HierarchyError::Layout(format!(
                "separations must be positive (sibling {slot}, level {level})"
            )));
        }

        let mut width = vec![0.0f64; store.len()];
        for &i in indices.post_order() {
            let children: f64 = store.children(i).iter().map(|&c| width[c]).sum();
            width[i] = children.max(slot);
        }

        let mut left = vec![0.0f64; store.len()];
        let mut positions = Positions::with_capacity(indices.reachable_count());
        let root = indices.root();
        left[root] = -width[root] * 0.5;

        for &i in indices.bfs_order() {
            let node = store.get(i).ok_or(HierarchyError::NotReady)?;
            let depth = indices.depth(i).unwrap_or_default();
            positions.insert(
                node.id.clone(),
                Position2D::new(left[i] + width[i] * 0.5, f64::from(depth) * level),
            );

            let span: f64 = store.children(i).iter().map(|&c| width[c]).sum();
            let mut cursor = left[i] + (width[i] - span) * 0.5;
            for &c in store.children(i) {
                left[c] = cursor;
                cursor += width[c];
            }
        }

        Ok(positions)
    }
}
