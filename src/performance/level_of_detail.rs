//! Level of Detail (LOD) tiers driven by zoom scale
//!
//! The tier is a frame-wide decision: zoomed in, nodes are drawn as full cards;
//! further out as compact labels; all the way out the hierarchy collapses to a
//! handful of aggregated hero anchors.

use serde::{Deserialize, Serialize};

/// Rendering tier for the whole frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DetailTier {
    /// Full detail - photo, name and details
    FullDetail = 0,
    /// Name label only
    CompactLabel = 1,
    /// Aggregated anchors, no per-node detail, no connections
    Aggregated = 2,
}

impl DetailTier {
    /// All tiers from most to least detailed
    pub const ALL: [DetailTier; 3] = [
        DetailTier::FullDetail,
        DetailTier::CompactLabel,
        DetailTier::Aggregated,
    ];

    /// Whether connections should be rendered at this tier
    pub fn renders_connections(&self) -> bool {
        !matches!(self, DetailTier::Aggregated)
    }

    /// Whether labels should be rendered at this tier
    pub fn renders_labels(&self) -> bool {
        !matches!(self, DetailTier::Aggregated)
    }

    /// Whether photos are requested at this tier
    pub fn renders_photos(&self) -> bool {
        matches!(self, DetailTier::FullDetail)
    }
}

/// Scale thresholds for the tier machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// At or above this scale the frame is Full-Detail
    pub full_detail_min_scale: f64,
    /// At or above this scale (and below the previous) the frame is Compact-Label
    pub compact_min_scale: f64,
    /// A threshold must be crossed by more than this to change tier
    pub hysteresis_band: f64,
    /// Scale changes smaller than this are not re-evaluated
    pub scale_quantum: f64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            full_detail_min_scale: 0.6,
            compact_min_scale: 0.25,
            hysteresis_band: 0.05,
            scale_quantum: 0.01,
        }
    }
}

impl TierConfig {
    /// Tier for `scale` with no memory of the previous tier
    pub fn classify(&self, scale: f64) -> DetailTier {
        if scale >= self.full_detail_min_scale {
            DetailTier::FullDetail
        } else if scale >= self.compact_min_scale {
            DetailTier::CompactLabel
        } else {
            DetailTier::Aggregated
        }
    }
}

/// Tier state machine with hysteresis
#[derive(Debug, Clone)]
pub struct TierController {
    config: TierConfig,
    tier: DetailTier,
    last_scale: f64,
    transitions: u64,
}

impl TierController {
    /// Initial tier derives directly from the initial scale
    pub fn new(config: TierConfig, initial_scale: f64) -> Self {
        let scale = if initial_scale.is_finite() && initial_scale > 0.0 {
            initial_scale
        } else {
            1.0
        };
        let tier = config.classify(scale);
        Self {
            last_scale: quantize(scale, config.scale_quantum),
            config,
            tier,
            transitions: 0,
        }
    }

    pub fn tier(&self) -> DetailTier {
        self.tier
    }

    /// Number of tier changes since creation
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Feed a new scale; returns the new tier when it changed.
    ///
    /// Moving to more detail requires the scale to clear the threshold plus the
    /// band; moving to less detail requires it to drop below the threshold minus
    /// the band. Scale changes within one quantum are ignored.
    pub fn update(&mut self, scale: f64) -> Option<DetailTier> {
        if !(scale.is_finite() && scale > 0.0) {
            tracing::debug!("Ignoring invalid zoom scale {}", scale);
            return None;
        }
        let quantized = quantize(scale, self.config.scale_quantum);
        if quantized == self.last_scale {
            return None;
        }
        self.last_scale = quantized;

        let band = self.config.hysteresis_band;
        let toward_detail = self.config.classify(scale - band);
        let toward_overview = self.config.classify(scale + band);

        let next = if toward_detail < self.tier {
            toward_detail
        } else if toward_overview > self.tier {
            toward_overview
        } else {
            return None;
        };

        tracing::debug!("Detail tier {:?} -> {:?} at scale {:.3}", self.tier, next, scale);
        self.tier = next;
        self.transitions += 1;
        Some(next)
    }
}

fn quantize(scale: f64, quantum: f64) -> f64 {
    if quantum > 0.0 {
        (scale / quantum).round() * quantum
    } else {
        scale
    }
}

/// Per-tier frame counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierStats {
    pub full_detail_frames: usize,
    pub compact_label_frames: usize,
    pub aggregated_frames: usize,
}

impl TierStats {
    pub fn record(&mut self, tier: DetailTier) {
        match tier {
            DetailTier::FullDetail => self.full_detail_frames += 1,
            DetailTier::CompactLabel => self.compact_label_frames += 1,
            DetailTier::Aggregated => self.aggregated_frames += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.full_detail_frames + self.compact_label_frames + self.aggregated_frames
    }
}
