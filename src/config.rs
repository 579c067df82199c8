//! Engine configuration
//!
//! Every section has documented defaults; a JSON document only needs to carry
//! the fields it overrides.

use serde::{Deserialize, Serialize};

use crate::layout::LayoutConfig;
use crate::loading::LoaderConfig;
use crate::performance::{
    ConnectionConfig, LabelConfig, NodeSizing, QualityConfig, SpatialIndexConfig, TierConfig,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub spatial: SpatialIndexConfig,
    pub tiers: TierConfig,
    pub quality: QualityConfig,
    pub connections: ConnectionConfig,
    pub sizing: NodeSizing,
    pub labels: LabelConfig,
    pub layout: LayoutConfig,
    pub loader: LoaderConfig,
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON document and validate it
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.spatial.cell_size.is_finite() && self.spatial.cell_size > 0.0) {
            return invalid("spatial.cell_size", format!("must be positive, got {}", self.spatial.cell_size));
        }
        if !(self.spatial.query_margin_px >= 0.0) {
            return invalid("spatial.query_margin_px", "must not be negative".to_string());
        }

        if !(self.tiers.compact_min_scale > 0.0
            && self.tiers.compact_min_scale < self.tiers.full_detail_min_scale)
        {
            return invalid(
                "tiers",
                format!(
                    "need 0 < compact_min_scale ({}) < full_detail_min_scale ({})",
                    self.tiers.compact_min_scale, self.tiers.full_detail_min_scale
                ),
            );
        }
        if !(self.tiers.hysteresis_band >= 0.0) {
            return invalid("tiers.hysteresis_band", "must not be negative".to_string());
        }

        let buckets = &self.quality.buckets;
        if buckets.is_empty() {
            return invalid("quality.buckets", "at least one bucket is required".to_string());
        }
        if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
            return invalid("quality.buckets", format!("must be strictly ascending, got {buckets:?}"));
        }
        if !(0.0..1.0).contains(&self.quality.hysteresis) {
            return invalid("quality.hysteresis", format!("must be in [0, 1), got {}", self.quality.hysteresis));
        }

        if self.connections.segments_per_batch == 0 {
            return invalid("connections.segments_per_batch", "must be at least 1".to_string());
        }

        if self.loader.max_ids_per_request == 0 {
            return invalid("loader.max_ids_per_request", "must be at least 1".to_string());
        }
        if self.loader.flush_max_wait_ms < self.loader.flush_quiet_ms {
            return invalid(
                "loader.flush_max_wait_ms",
                format!(
                    "{} ms is shorter than the quiet window of {} ms",
                    self.loader.flush_max_wait_ms, self.loader.flush_quiet_ms
                ),
            );
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigResult<()> {
    Err(ConfigError::Invalid { field, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::ConnectionStyle;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.spatial.cell_size, 512.0);
        assert_eq!(config.quality.buckets, vec![32, 64, 128, 256, 512]);
        assert_eq!(config.connections.segments_per_batch, 50);
        assert_eq!(config.loader.cache_schema_version, "structure-v1");
    }

    #[test]
    fn test_partial_json_overrides() {
        let config = EngineConfig::from_json_str(
            r#"{"spatial":{"max_results":250},"connections":{"style":"TidyBus"}}"#,
        )
        .unwrap();
        assert_eq!(config.spatial.max_results, 250);
        assert_eq!(config.spatial.cell_size, 512.0);
        assert_eq!(config.connections.style, ConnectionStyle::TidyBus);
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = EngineConfig::from_json_str(r#"{"quality":{"buckets":[64,32]}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "quality.buckets", .. }));

        let err = EngineConfig::from_json_str(r#"{"tiers":{"compact_min_scale":0.9}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "tiers", .. }));

        let err = EngineConfig::from_json_str(r#"{"loader":{"flush_max_wait_ms":10}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "loader.flush_max_wait_ms", .. }));

        assert!(matches!(
            EngineConfig::from_json_str("{").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig::default();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), config);
    }
}
