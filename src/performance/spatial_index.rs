//! Uniform grid spatial index for viewport queries
//!
//! Nodes are bucketed by `floor(x / cell_size), floor(y / cell_size)`. A query
//! touches only the cells under the (margin-expanded) viewport, so its cost
//! depends on the viewport, not on how many nodes the hierarchy holds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hierarchy::{NodeIndex, NodeStore};
use crate::value_objects::{Position2D, WorldRect};

/// Tuning for the grid and its queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialIndexConfig {
    /// Edge length of a grid cell in world units
    pub cell_size: f64,
    /// Screen-space margin added around the viewport before querying
    pub query_margin_px: f64,
    /// Upper bound on nodes returned by one query
    pub max_results: usize,
}

impl Default for SpatialIndexConfig {
    fn default() -> Self {
        Self {
            cell_size: 512.0,
            query_margin_px: 200.0,
            max_results: 4000,
        }
    }
}

type CellKey = (i64, i64);

/// Result of a range query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpatialQuery {
    /// Matching nodes, in cell order
    pub nodes: Vec<NodeIndex>,
    /// The cap was hit and `nodes` is a sampled subset
    pub truncated: bool,
    /// Candidates found before capping
    pub candidates: usize,
    /// Rectangle actually queried (viewport plus margin)
    pub query_rect: Option<WorldRect>,
}

/// Read-only grid over node positions
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    config: SpatialIndexConfig,
    cells: HashMap<CellKey, Vec<(NodeIndex, Position2D)>>,
    /// Smallest and largest occupied cell keys on each axis
    occupied: Option<(CellKey, CellKey)>,
    bounds: Option<WorldRect>,
    indexed: usize,
    skipped: usize,
}

impl SpatialIndex {
    /// Create an empty index
    pub fn new(config: SpatialIndexConfig) -> Self {
        Self {
            config,
            cells: HashMap::new(),
            occupied: None,
            bounds: None,
            indexed: 0,
            skipped: 0,
        }
    }

    /// Rebuild from every node in the store. O(n).
    pub fn build(&mut self, store: &NodeStore) {
        self.build_from(store.iter().map(|(i, node)| (i, node.position)));
    }

    /// Rebuild from arbitrary `(index, position)` pairs; non-finite positions are skipped
    pub fn build_from(&mut self, items: impl IntoIterator<Item = (NodeIndex, Position2D)>) {
        self.cells.clear();
        self.occupied = None;
        self.bounds = None;
        self.indexed = 0;
        self.skipped = 0;

        for (index, position) in items {
            let Some(cell) = self.cell_of(position) else {
                self.skipped += 1;
                continue;
            };
            self.cells.entry(cell).or_default().push((index, position));
            self.occupied = Some(match self.occupied {
                Some((lo, hi)) => ((lo.0.min(cell.0), lo.1.min(cell.1)), (hi.0.max(cell.0), hi.1.max(cell.1))),
                None => (cell, cell),
            });
            match self.bounds.as_mut() {
                Some(bounds) => bounds.include(position),
                None => self.bounds = Some(WorldRect::from_corners(position, position)),
            }
            self.indexed += 1;
        }

        if self.skipped > 0 {
            tracing::warn!(
                "Spatial index skipped {} nodes with non-finite positions",
                self.skipped
            );
        }
    }

    /// Cell coordinates for a position, `None` when it cannot be bucketed
    fn cell_of(&self, position: Position2D) -> Option<CellKey> {
        if !position.is_finite() {
            return None;
        }
        let cx = (position.x / self.config.cell_size).floor();
        let cy = (position.y / self.config.cell_size).floor();
        if !cx.is_finite() || !cy.is_finite() {
            return None;
        }
        Some((cx as i64, cy as i64))
    }

    /// Nodes inside `rect` expanded by the configured margin (in screen pixels,
    /// converted to world units with `scale`).
    pub fn query(&self, rect: WorldRect, scale: f64) -> SpatialQuery {
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };
        let expanded = rect.expand(self.config.query_margin_px / scale);
        let mut result = self.query_rect(expanded);
        result.query_rect = clamp_to_finite(expanded);
        result
    }

    /// Nodes inside `rect` exactly as given.
    ///
    /// Infinite edges are treated as the largest finite coordinate; a rect with
    /// a NaN edge matches nothing.
    pub fn query_rect(&self, rect: WorldRect) -> SpatialQuery {
        if self.cells.is_empty() {
            return SpatialQuery::default();
        }
        let Some(rect) = clamp_to_finite(rect) else {
            return SpatialQuery::default();
        };
        let (Some(min), Some(max)) = (
            self.cell_of(Position2D::new(rect.min_x, rect.min_y)),
            self.cell_of(Position2D::new(rect.max_x, rect.max_y)),
        ) else {
            return SpatialQuery::default();
        };

        let mut candidates = Vec::new();
        self.for_each_cell(min, max, |cell| collect_cell(cell, &rect, &mut candidates));

        let found = candidates.len();
        let (nodes, truncated) = cap(candidates, self.config.max_results);
        if truncated {
            tracing::debug!(
                "Spatial query capped: {} candidates, returning {}",
                found,
                nodes.len()
            );
        }
        SpatialQuery {
            nodes,
            truncated,
            candidates: found,
            query_rect: Some(rect),
        }
    }

    /// Nearest indexed node within `radius` of `point`
    pub fn hit_test(&self, point: Position2D, radius: f64) -> Option<NodeIndex> {
        if !(radius >= 0.0) || !point.is_finite() {
            return None;
        }
        let area = clamp_to_finite(WorldRect::from_corners(point, point).expand(radius))?;
        let min = self.cell_of(Position2D::new(area.min_x, area.min_y))?;
        let max = self.cell_of(Position2D::new(area.max_x, area.max_y))?;

        let mut best: Option<(f64, NodeIndex)> = None;
        self.for_each_cell(min, max, |cell| {
            for &(index, position) in cell {
                let distance = position.distance_to(&point);
                if distance <= radius && best.map_or(true, |(d, _)| distance < d) {
                    best = Some((distance, index));
                }
            }
        });
        best.map(|(_, index)| index)
    }

    /// Visit every occupied cell with a key in `min..=max`.
    ///
    /// The range is first clipped to the occupied keys. When it still spans
    /// more cells than are occupied, the occupied cells are walked instead, so
    /// the work never exceeds the number of cells.
    fn for_each_cell(&self, min: CellKey, max: CellKey, mut visit: impl FnMut(&[(NodeIndex, Position2D)])) {
        let Some((lo, hi)) = self.occupied else {
            return;
        };
        let min = (min.0.max(lo.0), min.1.max(lo.1));
        let max = (max.0.min(hi.0), max.1.min(hi.1));
        if min.0 > max.0 || min.1 > max.1 {
            return;
        }

        let span_x = i128::from(max.0) - i128::from(min.0) + 1;
        let span_y = i128::from(max.1) - i128::from(min.1) + 1;
        let dense = span_x
            .checked_mul(span_y)
            .is_some_and(|span| span <= self.cells.len() as i128);
        if dense {
            for cx in min.0..=max.0 {
                for cy in min.1..=max.1 {
                    if let Some(cell) = self.cells.get(&(cx, cy)) {
                        visit(cell);
                    }
                }
            }
        } else {
            // Zoomed far out: walking occupied cells is cheaper than the range
            for (&(cx, cy), cell) in &self.cells {
                if (min.0..=max.0).contains(&cx) && (min.1..=max.1).contains(&cy) {
                    visit(cell);
                }
            }
        }
    }

    /// Bounding box of all indexed positions
    pub fn bounds(&self) -> Option<WorldRect> {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.indexed
    }

    pub fn is_empty(&self) -> bool {
        self.indexed == 0
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn config(&self) -> &SpatialIndexConfig {
        &self.config
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(SpatialIndexConfig::default())
    }
}

/// Replace infinite edges with the largest finite coordinate; `None` on NaN
fn clamp_to_finite(rect: WorldRect) -> Option<WorldRect> {
    let edges = [rect.min_x, rect.min_y, rect.max_x, rect.max_y];
    if edges.iter().any(|edge| edge.is_nan()) {
        return None;
    }
    let clamp = |edge: f64| edge.clamp(f64::MIN, f64::MAX);
    Some(WorldRect {
        min_x: clamp(rect.min_x),
        min_y: clamp(rect.min_y),
        max_x: clamp(rect.max_x),
        max_y: clamp(rect.max_y),
    })
}

fn collect_cell(cell: &[(NodeIndex, Position2D)], rect: &WorldRect, out: &mut Vec<NodeIndex>) {
    out.extend(
        cell.iter()
            .filter(|(_, position)| rect.contains(*position))
            .map(|&(index, _)| index),
    );
}

/// Keep at most `limit` items, sampling with a uniform stride when over
fn cap(candidates: Vec<NodeIndex>, limit: usize) -> (Vec<NodeIndex>, bool) {
    if candidates.len() <= limit {
        return (candidates, false);
    }
    if limit == 0 {
        return (Vec::new(), true);
    }
    let stride = candidates.len() as f64 / limit as f64;
    let sampled = (0..limit)
        .map(|k| candidates[((k as f64 * stride) as usize).min(candidates.len() - 1)])
        .collect();
    (sampled, true)
}
