//! Viewport culling for efficient rendering of large hierarchies
//!
//! Only nodes and connections that intersect the visible rectangle (plus a
//! margin, so nodes just off screen are already prepared) are handed to the
//! renderer.

use serde::{Deserialize, Serialize};

use crate::value_objects::{Position2D, WorldRect};

/// Visible region of the world as produced by the host's pan/zoom gestures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Visible rectangle in world coordinates
    pub rect: WorldRect,
    /// Screen pixels per world unit
    pub scale: f64,
}

impl Viewport {
    /// Create a viewport from a world rectangle and a scale factor
    pub fn new(rect: WorldRect, scale: f64) -> Self {
        Self { rect, scale }
    }

    /// Derive the world rectangle from screen size and pan/zoom state.
    ///
    /// `translate` is the screen position of the world origin.
    pub fn from_screen(screen_width: f64, screen_height: f64, translate: Position2D, scale: f64) -> Self {
        let scale = sanitize_scale(scale);
        let min = Position2D::new(-translate.x / scale, -translate.y / scale);
        let max = Position2D::new(
            (screen_width - translate.x) / scale,
            (screen_height - translate.y) / scale,
        );
        Self {
            rect: WorldRect::from_corners(min, max),
            scale,
        }
    }

    /// Rectangle used for culling: the visible rect grown by `margin_px` screen pixels
    pub fn culling_rect(&self, margin_px: f64) -> WorldRect {
        self.rect.expand(margin_px / sanitize_scale(self.scale))
    }

    /// Convert a world position to screen space
    pub fn world_to_screen(&self, point: Position2D) -> Position2D {
        let scale = sanitize_scale(self.scale);
        Position2D::new(
            (point.x - self.rect.min_x) * scale,
            (point.y - self.rect.min_y) * scale,
        )
    }

    /// Convert a screen position to world space
    pub fn screen_to_world(&self, point: Position2D) -> Position2D {
        let scale = sanitize_scale(self.scale);
        Position2D::new(
            point.x / scale + self.rect.min_x,
            point.y / scale + self.rect.min_y,
        )
    }

    /// Test if a point is inside the viewport
    pub fn contains_point(&self, point: Position2D) -> bool {
        self.rect.contains(point)
    }

    /// Test if a bounding box intersects the viewport
    pub fn intersects(&self, rect: &WorldRect) -> bool {
        self.rect.intersects(rect)
    }
}

/// Scale used when the host hands over a zero, negative or non-finite value
fn sanitize_scale(scale: f64) -> f64 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    }
}

/// Stats tracking for viewport culling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CullingStats {
    pub total_nodes: usize,
    pub visible_nodes: usize,
    pub culled_nodes: usize,
    pub truncated: bool,
}

impl CullingStats {
    pub fn new(total_nodes: usize, visible_nodes: usize, truncated: bool) -> Self {
        Self {
            total_nodes,
            visible_nodes,
            culled_nodes: total_nodes.saturating_sub(visible_nodes),
            truncated,
        }
    }
}
