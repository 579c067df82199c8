//! Per-frame pipeline
//!
//! viewport → spatial query → tier → per-node quality and labels →
//! per-connection geometry → batched paths. The engine owns the per-session
//! state machines and caches; the snapshot it renders is read-only.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::hierarchy::{HierarchyError, HierarchyResult, HierarchySnapshot, NodeIndex, SharedHierarchy};
use crate::performance::{
    BatchKey, ConnectionGeometryBuilder, CullingStats, DetailTier, FrameStats, LabelLayout,
    LabelLayoutCache, NodeBox, NodeSizing, PathBatch, PathBatcher, QualityController,
    TierController, TierStats, Viewport,
};
use crate::scheduling::Clock;
use crate::value_objects::{NodeId, NodeSize, Position2D, WorldRect};

/// A node handed to the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleNode {
    pub index: NodeIndex,
    pub id: NodeId,
    pub position: Position2D,
    pub rect: WorldRect,
    /// Photo asset size to request; only at Full-Detail
    pub quality_bucket: Option<u32>,
    /// Wrapped name; absent at the Aggregated tier
    pub label: Option<Arc<LabelLayout>>,
    pub has_rich_data: bool,
}

/// Aggregation anchor drawn at maximum zoom-out
#[derive(Debug, Clone, PartialEq)]
pub struct HeroSummary {
    pub id: NodeId,
    pub centroid: Position2D,
    pub subtree_size: u32,
    pub depth: u32,
}

/// Everything the host needs to draw one frame
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub frame: u64,
    pub tier: DetailTier,
    pub viewport: Viewport,
    pub culling_rect: WorldRect,
    pub nodes: Vec<VisibleNode>,
    pub heroes: Vec<HeroSummary>,
    pub paths: Vec<PathBatch>,
    pub stats: FrameStats,
}

impl FrameOutput {
    pub fn visible_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|node| node.id.clone())
    }
}

#[derive(Debug)]
pub struct ViewEngine {
    sizing: NodeSizing,
    query_margin_px: f64,
    tiers: TierController,
    quality: QualityController,
    labels: LabelLayoutCache,
    geometry: ConnectionGeometryBuilder,
    tier_stats: TierStats,
    frames: u64,
}

impl ViewEngine {
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>, initial_scale: f64) -> Self {
        Self {
            sizing: config.sizing.clone(),
            query_margin_px: config.spatial.query_margin_px,
            tiers: TierController::new(config.tiers.clone(), initial_scale),
            quality: QualityController::new(config.quality.clone(), clock),
            labels: LabelLayoutCache::new(config.labels.clone()),
            geometry: ConnectionGeometryBuilder::new(config.connections.clone()),
            tier_stats: TierStats::default(),
            frames: 0,
        }
    }

    pub fn tier(&self) -> DetailTier {
        self.tiers.tier()
    }

    pub fn quality(&self) -> &QualityController {
        &self.quality
    }

    pub fn labels(&self) -> &LabelLayoutCache {
        &self.labels
    }

    /// Render against the current shared snapshot
    pub fn render(&mut self, shared: &SharedHierarchy, viewport: &Viewport) -> HierarchyResult<FrameOutput> {
        shared
            .read(|snapshot| self.render_frame(snapshot, viewport))
            .ok_or(HierarchyError::NotReady)
    }

    pub fn render_frame(&mut self, snapshot: &HierarchySnapshot, viewport: &Viewport) -> FrameOutput {
        self.frames += 1;
        self.tiers.update(viewport.scale);
        let tier = self.tiers.tier();
        self.tier_stats.record(tier);

        let scale = viewport_scale(viewport);
        let size = self.sizing.size_for(tier);
        let query = snapshot.spatial().query(viewport.rect, scale);
        let culling_rect = query
            .query_rect
            .unwrap_or_else(|| viewport.culling_rect(self.query_margin_px));

        let store = snapshot.store();
        let mut nodes = Vec::with_capacity(query.nodes.len());
        for &index in &query.nodes {
            let Some(node) = store.get(index) else {
                continue;
            };
            let quality_bucket = tier
                .renders_photos()
                .then(|| self.quality.bucket_for(&node.id, size.height * scale));
            let label = tier.renders_labels().then(|| {
                let text = node.rich.name.as_deref().unwrap_or(node.id.as_str());
                self.labels.layout(text, size.width)
            });
            nodes.push(VisibleNode {
                index,
                id: node.id.clone(),
                position: node.position,
                rect: WorldRect::around(node.position, size),
                quality_bucket,
                label,
                has_rich_data: node.has_rich_data(),
            });
        }

        // Bucket state lives only as long as the node stays in the working set
        let working_set: HashSet<&NodeId> = nodes.iter().map(|n| &n.id).collect();
        self.quality.retain_working_set(|id| working_set.contains(id));

        let heroes = if tier == DetailTier::Aggregated {
            hero_summaries(snapshot)
        } else {
            Vec::new()
        };

        let mut stats = FrameStats {
            tier: Some(tier),
            culling: CullingStats::new(store.len(), nodes.len(), query.truncated),
            skipped_nodes: snapshot.spatial().skipped(),
            ..Default::default()
        };

        let paths = if tier.renders_connections() {
            self.build_paths(snapshot, &query.nodes, tier, size, scale, &culling_rect, &mut stats)
        } else {
            Vec::new()
        };

        let mut buckets: Vec<(u32, usize)> = Vec::new();
        for bucket in nodes.iter().filter_map(|n| n.quality_bucket) {
            match buckets.iter_mut().find(|(b, _)| *b == bucket) {
                Some((_, count)) => *count += 1,
                None => buckets.push((bucket, 1)),
            }
        }
        buckets.sort_unstable();
        stats.quality_buckets = buckets;
        stats.tiers = self.tier_stats.clone();

        if query.truncated {
            tracing::debug!(
                frame = self.frames,
                candidates = query.candidates,
                "Visible set truncated to {}",
                nodes.len()
            );
        }

        FrameOutput {
            frame: self.frames,
            tier,
            viewport: *viewport,
            culling_rect,
            nodes,
            heroes,
            paths,
            stats,
        }
    }

    /// Geometry for connections touching the visible nodes, culled and batched
    #[allow(clippy::too_many_arguments)]
    fn build_paths(
        &self,
        snapshot: &HierarchySnapshot,
        visible: &[NodeIndex],
        tier: DetailTier,
        size: NodeSize,
        scale: f64,
        culling_rect: &WorldRect,
        stats: &mut FrameStats,
    ) -> Vec<PathBatch> {
        let store = snapshot.store();
        let parents: BTreeSet<NodeIndex> = visible
            .iter()
            .flat_map(|&index| {
                let own = (!store.children(index).is_empty()).then_some(index);
                let parent = store.get(index).and_then(|node| node.parent());
                own.into_iter().chain(parent)
            })
            .collect();

        let node_box = |index: NodeIndex| {
            store
                .position(index)
                .filter(Position2D::is_finite)
                .map(|center| NodeBox::new(center, size))
        };

        let mut batcher = PathBatcher::new(
            BatchKey {
                tier,
                style: self.geometry.config().style,
            },
            self.geometry.config().segments_per_batch,
        );

        for parent in parents {
            let Some(connection) = snapshot.connection_of(parent) else {
                continue;
            };
            stats.connections_considered += 1;
            let Some(parent_box) = node_box(connection.parent) else {
                stats.connections_culled += 1;
                continue;
            };
            let child_boxes: Vec<NodeBox> = connection
                .children
                .iter()
                .filter_map(|&child| node_box(child))
                .collect();
            if !ConnectionGeometryBuilder::is_visible(&parent_box, &child_boxes, culling_rect) {
                stats.connections_culled += 1;
                continue;
            }
            batcher.push_connection(self.geometry.build(&parent_box, &child_boxes, tier, scale));
        }

        let (batches, batching) = batcher.finish();
        stats.batching = batching;
        batches
    }

    /// Teardown: drop bucket state and cached labels
    pub fn teardown(&mut self) {
        self.quality.clear();
        self.labels.clear();
        tracing::debug!("View engine torn down after {} frames", self.frames);
    }
}

fn viewport_scale(viewport: &Viewport) -> f64 {
    if viewport.scale.is_finite() && viewport.scale > 0.0 {
        viewport.scale
    } else {
        1.0
    }
}

fn hero_summaries(snapshot: &HierarchySnapshot) -> Vec<HeroSummary> {
    let store = snapshot.store();
    let indices = snapshot.indices();
    indices
        .heroes()
        .iter()
        .filter_map(|&hero| {
            let node = store.get(hero)?;
            let centroid = indices
                .centroid(hero)
                .filter(Position2D::is_finite)
                .unwrap_or(node.position);
            Some(HeroSummary {
                id: node.id.clone(),
                centroid,
                subtree_size: indices.subtree_size(hero),
                depth: indices.depth(hero).unwrap_or(0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{RichData, StructureRecord, DEFAULT_HERO_COUNT};
    use crate::layout::{FixedLayout, LayoutMemo};
    use crate::performance::SpatialIndexConfig;
    use crate::scheduling::ManualClock;
    use indexmap::IndexMap;

    fn snapshot() -> HierarchySnapshot {
        let records = vec![
            StructureRecord::root("r"),
            StructureRecord::child("a", "r", 0),
            StructureRecord::child("b", "r", 1),
            StructureRecord::child("far", "b", 0),
        ];
        let layout: FixedLayout = [
            ("r", 0.0, 0.0),
            ("a", -100.0, 220.0),
            ("b", 100.0, 220.0),
            ("far", 20_000.0, 20_000.0),
        ]
        .into_iter()
        .map(|(id, x, y)| (NodeId::from(id), Position2D::new(x, y)))
        .collect();
        HierarchySnapshot::build(
            &records,
            &layout,
            &mut LayoutMemo::new(),
            SpatialIndexConfig::default(),
            DEFAULT_HERO_COUNT,
            None,
        )
        .unwrap()
    }

    fn engine(scale: f64) -> ViewEngine {
        ViewEngine::new(&EngineConfig::default(), Arc::new(ManualClock::new(0)), scale)
    }

    fn viewport(scale: f64) -> Viewport {
        Viewport::new(WorldRect::from_origin_size(-200.0, -100.0, 400.0, 400.0), scale)
    }

    #[test]
    fn test_full_detail_frame() {
        let snapshot = snapshot();
        let mut engine = engine(1.0);
        let frame = engine.render_frame(&snapshot, &viewport(1.0));

        assert_eq!(frame.tier, DetailTier::FullDetail);
        assert_eq!(frame.nodes.len(), 3);
        assert!(frame.nodes.iter().all(|n| n.quality_bucket == Some(128)));
        assert!(frame.heroes.is_empty());
        assert_eq!(frame.stats.culling.culled_nodes, 1);

        // r -> {a, b} and b -> far, which is drawn because b is on screen
        assert_eq!(frame.stats.connections_considered, 2);
        assert_eq!(frame.stats.connections_culled, 0);
        assert_eq!(frame.stats.batching.segments, 4 + 3);
        assert_eq!(frame.paths.len(), 1);
    }

    #[test]
    fn test_labels_prefer_enriched_names() {
        let snapshot = snapshot();
        let shared = SharedHierarchy::new();
        shared.replace_structure(snapshot);
        shared
            .merge_enrichment(&IndexMap::from([(
                NodeId::from("a"),
                RichData {
                    name: Some("Ada".into()),
                    ..Default::default()
                },
            )]))
            .unwrap();

        let mut engine = engine(0.4);
        let frame = engine.render(&shared, &viewport(0.4)).unwrap();
        assert_eq!(frame.tier, DetailTier::CompactLabel);
        let a = frame.nodes.iter().find(|n| n.id.as_str() == "a").unwrap();
        assert_eq!(a.label.as_ref().unwrap().lines, vec!["Ada"]);
        assert!(a.has_rich_data);
        assert!(a.quality_bucket.is_none());
    }

    #[test]
    fn test_aggregated_frame_has_heroes_and_no_paths() {
        let snapshot = snapshot();
        let mut engine = engine(0.1);
        let frame = engine.render_frame(&snapshot, &viewport(0.1));

        assert_eq!(frame.tier, DetailTier::Aggregated);
        assert!(frame.paths.is_empty());
        assert!(frame.nodes.iter().all(|n| n.label.is_none()));
        let ids: Vec<_> = frame.heroes.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["r", "b"]);
        assert_eq!(frame.heroes[0].subtree_size, 4);
    }

    #[test]
    fn test_render_before_load_is_not_ready() {
        let mut engine = engine(1.0);
        let shared = SharedHierarchy::new();
        assert_eq!(
            engine.render(&shared, &viewport(1.0)).unwrap_err(),
            HierarchyError::NotReady
        );
    }

    #[test]
    fn test_teardown_clears_state() {
        let snapshot = snapshot();
        let mut engine = engine(1.0);
        engine.render_frame(&snapshot, &viewport(1.0));
        assert!(engine.quality().tracked() > 0);
        assert!(!engine.labels().is_empty());
        engine.teardown();
        assert_eq!(engine.quality().tracked(), 0);
        assert!(engine.labels().is_empty());
    }
}
