//! Per-frame rendering performance for large hierarchies
//!
//! This module provides the data structures the frame pipeline runs on:
//! a grid index for viewport queries, the tier and quality state machines,
//! connection geometry with path batching, and the bounded caches behind them.

pub mod batched_paths;
pub mod connection_geometry;
pub mod image_quality;
pub mod label_cache;
pub mod level_of_detail;
pub mod lru;
pub mod spatial_index;
pub mod viewport;

pub use batched_paths::{BatchKey, BatchingStats, PathBatch, PathBatcher};
pub use connection_geometry::{
    ConnectionConfig, ConnectionGeometryBuilder, ConnectionStyle, NodeBox, NodeSizing,
    PathCommand, PathSegment, SegmentRole,
};
pub use image_quality::{QualityConfig, QualityController, QualityStats};
pub use label_cache::{LabelConfig, LabelLayout, LabelLayoutCache};
pub use level_of_detail::{DetailTier, TierConfig, TierController, TierStats};
pub use lru::LruMap;
pub use spatial_index::{SpatialIndex, SpatialIndexConfig, SpatialQuery};
pub use viewport::{CullingStats, Viewport};

/// Statistics for one rendered frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Tier the frame was drawn at
    pub tier: Option<DetailTier>,
    pub culling: CullingStats,
    /// Nodes without a finite position, never indexed
    pub skipped_nodes: usize,
    pub connections_considered: usize,
    pub connections_culled: usize,
    pub batching: BatchingStats,
    /// Visible nodes per committed quality bucket
    pub quality_buckets: Vec<(u32, usize)>,
    /// Frames seen so far at each tier, including this one
    pub tiers: TierStats,
}

impl FrameStats {
    /// Fraction of the hierarchy that reached the renderer
    pub fn visible_ratio(&self) -> f32 {
        if self.culling.total_nodes == 0 {
            0.0
        } else {
            self.culling.visible_nodes as f32 / self.culling.total_nodes as f32
        }
    }
}
