//! Collaborators of the loader: remote structure, remote enrichment, local cache

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LoadResult;
use crate::hierarchy::{EnrichmentRecord, StructureRecord};
use crate::value_objects::NodeId;

/// Cache key holding the structural record list
pub const STRUCTURE_CACHE_KEY: &str = "hierarchy.structure";

/// Remote fetch of the global minimal record set
#[async_trait]
pub trait StructureSource: Send + Sync {
    async fn fetch_structure(&self) -> LoadResult<Vec<StructureRecord>>;
}

/// Remote fetch of rich fields for a bounded list of ids.
///
/// Partial results are valid: ids absent from the response have no new data.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    async fn fetch_enrichment(&self, ids: &[NodeId]) -> LoadResult<Vec<EnrichmentRecord>>;
}

/// Key-value store on the device
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn get(&self, key: &str) -> LoadResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> LoadResult<()>;

    async fn remove(&self, key: &str) -> LoadResult<()>;
}

/// Envelope stored under [`STRUCTURE_CACHE_KEY`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedStructure {
    pub schema_version: String,
    pub stored_at: DateTime<Utc>,
    pub records: Vec<StructureRecord>,
}

impl CachedStructure {
    pub fn new(schema_version: impl Into<String>, records: Vec<StructureRecord>) -> Self {
        Self {
            schema_version: schema_version.into(),
            stored_at: Utc::now(),
            records,
        }
    }

    pub fn to_json(&self) -> LoadResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> LoadResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Current schema and enough records to be worth trusting without a fetch
    pub fn is_usable(&self, expected_schema: &str, min_records: usize) -> bool {
        self.schema_version == expected_schema && self.records.len() >= min_records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_json() {
        let cached = CachedStructure::new(
            "structure-v1",
            vec![StructureRecord::root("r"), StructureRecord::child("a", "r", 0)],
        );
        let json = cached.to_json().unwrap();
        assert!(json.contains("\"schema_version\":\"structure-v1\""));
        assert_eq!(CachedStructure::from_json(&json).unwrap(), cached);
        assert!(CachedStructure::from_json("{not json").is_err());
    }

    #[test]
    fn test_usability() {
        let cached = CachedStructure::new("structure-v1", vec![StructureRecord::root("r")]);
        assert!(cached.is_usable("structure-v1", 1));
        assert!(!cached.is_usable("structure-v1", 10));
        assert!(!cached.is_usable("structure-v2", 1));
    }

    #[test]
    fn test_records_accept_missing_optional_fields() {
        let records: Vec<StructureRecord> =
            serde_json::from_str(r#"[{"id":"r"},{"id":"a","parent_id":"r","order":3}]"#).unwrap();
        assert_eq!(records[0], StructureRecord::root("r"));
        assert_eq!(records[1], StructureRecord::child("a", "r", 3));
    }
}
