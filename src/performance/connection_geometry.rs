//! Connection geometry: parent stem, horizontal bus, child drops
//!
//! The bus sits halfway between the parent's lower edge and the nearest
//! child's upper edge. Styles only change how each drop into a child is
//! interpolated; the bus placement rule is shared by all of them.

use serde::{Deserialize, Serialize};

use super::level_of_detail::DetailTier;
use crate::value_objects::{NodeSize, Position2D, WorldRect};

/// A node's on-canvas box: `center` is the layout position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeBox {
    pub center: Position2D,
    pub size: NodeSize,
}

impl NodeBox {
    pub fn new(center: Position2D, size: NodeSize) -> Self {
        Self { center, size }
    }

    pub fn top(&self) -> f64 {
        self.center.y - self.size.height * 0.5
    }

    pub fn bottom(&self) -> f64 {
        self.center.y + self.size.height * 0.5
    }

    pub fn rect(&self) -> WorldRect {
        WorldRect::around(self.center, self.size)
    }

    pub fn is_finite(&self) -> bool {
        self.center.is_finite() && self.size.width.is_finite() && self.size.height.is_finite()
    }
}

/// Card sizes per tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSizing {
    pub full_detail: NodeSize,
    pub compact_label: NodeSize,
    /// Footprint of an aggregated anchor
    pub aggregated: NodeSize,
}

impl Default for NodeSizing {
    fn default() -> Self {
        Self {
            full_detail: NodeSize {
                width: 160.0,
                height: 90.0,
            },
            compact_label: NodeSize {
                width: 140.0,
                height: 35.0,
            },
            aggregated: NodeSize {
                width: 24.0,
                height: 24.0,
            },
        }
    }
}

impl NodeSizing {
    pub fn size_for(&self, tier: DetailTier) -> NodeSize {
        match tier {
            DetailTier::FullDetail => self.full_detail,
            DetailTier::CompactLabel => self.compact_label,
            DetailTier::Aggregated => self.aggregated,
        }
    }
}

/// How the drop from the bus into each child is drawn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStyle {
    /// Straight vertical drop from the bus
    #[default]
    Elbow,
    /// Cubic curve fanning out from the foot of the parent stem
    CubicFan,
    /// Drop with a rounded corner where it leaves the bus
    TidyBus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub style: ConnectionStyle,
    /// A single child offset by more than this many screen pixels still gets a bus
    pub single_child_threshold_px: f64,
    /// Edge segments per drawable path batch
    pub segments_per_batch: usize,
    /// Corner radius for [`ConnectionStyle::TidyBus`]
    pub corner_radius: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            style: ConnectionStyle::Elbow,
            single_child_threshold_px: 2.0,
            segments_per_batch: 50,
            corner_radius: 12.0,
        }
    }
}

/// Drawing command, in world coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathCommand {
    MoveTo(Position2D),
    LineTo(Position2D),
    CubicTo {
        control1: Position2D,
        control2: Position2D,
        to: Position2D,
    },
}

impl PathCommand {
    pub fn end_point(&self) -> Position2D {
        match *self {
            PathCommand::MoveTo(p) | PathCommand::LineTo(p) => p,
            PathCommand::CubicTo { to, .. } => to,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentRole {
    /// Parent down to the bus
    Stem,
    /// Horizontal bus
    Bus,
    /// Bus into one child
    Drop,
    /// Straight parent-to-child line when no bus is needed
    Direct,
}

/// One edge segment
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub role: SegmentRole,
    pub commands: Vec<PathCommand>,
}

impl PathSegment {
    fn line(role: SegmentRole, from: Position2D, to: Position2D) -> Self {
        Self {
            role,
            commands: vec![PathCommand::MoveTo(from), PathCommand::LineTo(to)],
        }
    }
}

/// Turns one parent and its children into path segments
#[derive(Debug, Clone, Default)]
pub struct ConnectionGeometryBuilder {
    config: ConnectionConfig,
}

impl ConnectionGeometryBuilder {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Midpoint between the parent's lower edge and the nearest child's upper edge
    pub fn bus_y(parent: &NodeBox, children: &[NodeBox]) -> Option<f64> {
        let nearest_top = children
            .iter()
            .map(NodeBox::top)
            .filter(|top| top.is_finite())
            .reduce(f64::min)?;
        let bottom = parent.bottom();
        Some(bottom + (nearest_top - bottom) / 2.0)
    }

    /// Whether the connection touches `culling_rect` at all
    pub fn is_visible(parent: &NodeBox, children: &[NodeBox], culling_rect: &WorldRect) -> bool {
        parent.rect().intersects(culling_rect)
            || children.iter().any(|child| child.rect().intersects(culling_rect))
    }

    /// Whether a bus is drawn for this group when viewed at `scale`
    pub fn needs_bus(&self, parent: &NodeBox, children: &[NodeBox], scale: f64) -> bool {
        match children {
            [] => false,
            [only] => {
                let offset_px = (only.center.x - parent.center.x).abs() * sanitize_scale(scale);
                offset_px > self.config.single_child_threshold_px
            }
            _ => true,
        }
    }

    /// Segments for one connection at `tier`, viewed at `scale` screen pixels
    /// per world unit.
    ///
    /// Children with non-finite boxes are skipped; a non-finite parent yields
    /// nothing.
    pub fn build(&self, parent: &NodeBox, children: &[NodeBox], tier: DetailTier, scale: f64) -> Vec<PathSegment> {
        if !tier.renders_connections() || !parent.is_finite() {
            return Vec::new();
        }
        let children: Vec<NodeBox> = children.iter().copied().filter(NodeBox::is_finite).collect();
        let Some(bus_y) = Self::bus_y(parent, &children) else {
            return Vec::new();
        };

        let px = parent.center.x;
        let stem_top = Position2D::new(px, parent.bottom());

        if !self.needs_bus(parent, &children, scale) {
            let child = &children[0];
            return vec![PathSegment::line(
                SegmentRole::Direct,
                stem_top,
                Position2D::new(px, child.top()),
            )];
        }

        let stem_foot = Position2D::new(px, bus_y);
        let (min_x, max_x) = children
            .iter()
            .fold((px, px), |(lo, hi), child| (lo.min(child.center.x), hi.max(child.center.x)));

        let mut segments = Vec::with_capacity(children.len() + 2);
        segments.push(PathSegment::line(SegmentRole::Stem, stem_top, stem_foot));
        segments.push(PathSegment::line(
            SegmentRole::Bus,
            Position2D::new(min_x, bus_y),
            Position2D::new(max_x, bus_y),
        ));
        segments.extend(children.iter().map(|child| self.drop_into(stem_foot, bus_y, child)));
        segments
    }

    fn drop_into(&self, stem_foot: Position2D, bus_y: f64, child: &NodeBox) -> PathSegment {
        let cx = child.center.x;
        let top = child.top();
        let on_bus = Position2D::new(cx, bus_y);
        let entry = Position2D::new(cx, top);
        let dy = top - bus_y;

        let commands = match self.config.style {
            ConnectionStyle::Elbow => vec![PathCommand::MoveTo(on_bus), PathCommand::LineTo(entry)],
            ConnectionStyle::CubicFan => vec![
                PathCommand::MoveTo(stem_foot),
                PathCommand::CubicTo {
                    control1: Position2D::new(stem_foot.x, bus_y + dy * 0.5),
                    control2: Position2D::new(cx, bus_y),
                    to: entry,
                },
            ],
            ConnectionStyle::TidyBus => {
                let offset = cx - stem_foot.x;
                let radius = self
                    .config
                    .corner_radius
                    .min(offset.abs())
                    .min((dy * 0.5).max(0.0));
                if radius <= f64::EPSILON {
                    vec![PathCommand::MoveTo(on_bus), PathCommand::LineTo(entry)]
                } else {
                    let start = Position2D::new(cx - offset.signum() * radius, bus_y);
                    let knee = Position2D::new(cx, bus_y + radius);
                    vec![
                        PathCommand::MoveTo(start),
                        PathCommand::CubicTo {
                            control1: Position2D::new(cx, bus_y),
                            control2: Position2D::new(cx, bus_y),
                            to: knee,
                        },
                        PathCommand::LineTo(entry),
                    ]
                }
            }
        };
        PathSegment {
            role: SegmentRole::Drop,
            commands,
        }
    }
}

fn sanitize_scale(scale: f64) -> f64 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(x: f64, y: f64, height: f64) -> NodeBox {
        NodeBox::new(
            Position2D::new(x, y),
            NodeSize {
                width: 100.0,
                height,
            },
        )
    }

    #[test]
    fn test_bus_sits_at_midpoint() {
        let parent = node(0.0, 100.0, 90.0);
        let children = [node(-100.0, 300.0, 35.0), node(100.0, 320.0, 35.0)];
        let bus = ConnectionGeometryBuilder::bus_y(&parent, &children).unwrap();
        assert_eq!(bus, 100.0 + 45.0 + ((300.0 - 17.5) - (100.0 + 45.0)) / 2.0);

        let segments = ConnectionGeometryBuilder::default().build(&parent, &children, DetailTier::FullDetail, 1.0);
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[1].role, SegmentRole::Bus);
        assert_eq!(segments[1].commands[0], PathCommand::MoveTo(Position2D::new(-100.0, bus)));
        assert_eq!(segments[1].commands[1], PathCommand::LineTo(Position2D::new(100.0, bus)));
    }

    #[test]
    fn test_style_never_moves_the_bus() {
        let parent = node(0.0, 0.0, 90.0);
        let children = [node(-200.0, 220.0, 90.0), node(0.0, 220.0, 90.0), node(200.0, 220.0, 90.0)];
        let expected = ConnectionGeometryBuilder::bus_y(&parent, &children).unwrap();

        for style in [ConnectionStyle::Elbow, ConnectionStyle::CubicFan, ConnectionStyle::TidyBus] {
            let builder = ConnectionGeometryBuilder::new(ConnectionConfig {
                style,
                ..Default::default()
            });
            let segments = builder.build(&parent, &children, DetailTier::CompactLabel, 1.0);
            let bus = segments.iter().find(|s| s.role == SegmentRole::Bus).unwrap();
            assert_eq!(bus.commands[0].end_point().y, expected);
            let drops: Vec<_> = segments.iter().filter(|s| s.role == SegmentRole::Drop).collect();
            assert_eq!(drops.len(), 3);
            for (drop, child) in drops.iter().zip(&children) {
                let end = drop.commands.last().unwrap().end_point();
                assert_eq!(end, Position2D::new(child.center.x, child.top()));
            }
        }
    }

    #[test]
    fn test_aligned_single_child_is_direct() {
        let builder = ConnectionGeometryBuilder::default();
        let parent = node(0.0, 0.0, 90.0);

        let segments = builder.build(&parent, &[node(1.5, 220.0, 90.0)], DetailTier::FullDetail, 1.0);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].role, SegmentRole::Direct);

        let segments = builder.build(&parent, &[node(30.0, 220.0, 90.0)], DetailTier::FullDetail, 1.0);
        assert_eq!(segments.len(), 3);
    }

    #[test]
    fn test_single_child_threshold_is_in_screen_pixels() {
        let builder = ConnectionGeometryBuilder::default();
        let parent = node(0.0, 0.0, 90.0);
        let child = [node(30.0, 220.0, 90.0)];

        // 30 world units is 1.5px at this zoom
        assert!(!builder.needs_bus(&parent, &child, 0.05));
        let segments = builder.build(&parent, &child, DetailTier::CompactLabel, 0.05);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].role, SegmentRole::Direct);

        // and 60px zoomed in
        assert!(builder.needs_bus(&parent, &child, 2.0));
        assert_eq!(builder.build(&parent, &child, DetailTier::FullDetail, 2.0).len(), 3);

        // An unusable scale is treated as 1:1
        assert!(builder.needs_bus(&parent, &child, f64::NAN));
    }

    #[test]
    fn test_aggregated_tier_emits_nothing() {
        let builder = ConnectionGeometryBuilder::default();
        let parent = node(0.0, 0.0, 90.0);
        let children = [node(-50.0, 200.0, 90.0), node(50.0, 200.0, 90.0)];
        assert!(builder.build(&parent, &children, DetailTier::Aggregated, 1.0).is_empty());
    }

    #[test]
    fn test_non_finite_children_are_skipped() {
        let builder = ConnectionGeometryBuilder::default();
        let parent = node(0.0, 0.0, 90.0);
        let children = [node(f64::NAN, 200.0, 90.0), node(50.0, 200.0, 90.0)];
        let segments = builder.build(&parent, &children, DetailTier::FullDetail, 1.0);
        assert_eq!(segments.iter().filter(|s| s.role == SegmentRole::Drop).count(), 1);

        let lost = node(f64::NAN, f64::NAN, 90.0);
        assert!(builder.build(&lost, &children, DetailTier::FullDetail, 1.0).is_empty());
    }

    #[test]
    fn test_visibility_uses_parent_or_any_child() {
        let parent = node(0.0, 0.0, 90.0);
        let children = [node(1000.0, 220.0, 90.0)];
        let near_child = WorldRect::from_origin_size(950.0, 200.0, 10.0, 10.0);
        let nowhere = WorldRect::from_origin_size(5000.0, 5000.0, 10.0, 10.0);
        assert!(ConnectionGeometryBuilder::is_visible(&parent, &children, &near_child));
        assert!(!ConnectionGeometryBuilder::is_visible(&parent, &children, &nowhere));
    }

    #[test]
    fn test_sizing_per_tier() {
        let sizing = NodeSizing::default();
        assert_eq!(sizing.size_for(DetailTier::FullDetail).height, 90.0);
        assert_eq!(sizing.size_for(DetailTier::CompactLabel).height, 35.0);
    }
}
