//! Remote sources served from memory

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::hierarchy::{EnrichmentRecord, RichData, StructureRecord};
use crate::loading::{EnrichmentSource, LoadError, LoadResult, StructureSource};
use crate::value_objects::NodeId;

/// Scripted failure for a static source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureMode {
    Healthy,
    Unreachable,
    ServerError(u16),
}

impl FailureMode {
    fn check(&self) -> LoadResult<()> {
        match self {
            FailureMode::Healthy => Ok(()),
            FailureMode::Unreachable => Err(LoadError::Network("host unreachable".to_string())),
            FailureMode::ServerError(status) => Err(LoadError::Server {
                status: *status,
                message: "internal error".to_string(),
            }),
        }
    }
}

/// Serves a fixed record list
#[derive(Debug)]
pub struct StaticStructureSource {
    records: RwLock<Vec<StructureRecord>>,
    failure: RwLock<FailureMode>,
    fetches: AtomicUsize,
}

impl StaticStructureSource {
    pub fn new(records: Vec<StructureRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            failure: RwLock::new(FailureMode::Healthy),
            fetches: AtomicUsize::new(0),
        }
    }

    pub async fn set_failure(&self, failure: FailureMode) {
        *self.failure.write().await = failure;
    }

    pub async fn set_records(&self, records: Vec<StructureRecord>) {
        *self.records.write().await = records;
    }

    /// Number of fetches attempted, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StructureSource for StaticStructureSource {
    async fn fetch_structure(&self) -> LoadResult<Vec<StructureRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.failure.read().await.check()?;
        Ok(self.records.read().await.clone())
    }
}

/// Serves rich data by id; unknown ids are simply absent from the response
#[derive(Debug)]
pub struct StaticEnrichmentSource {
    data: RwLock<HashMap<NodeId, RichData>>,
    failure: RwLock<FailureMode>,
    requests: RwLock<Vec<Vec<NodeId>>>,
}

impl StaticEnrichmentSource {
    pub fn new(data: HashMap<NodeId, RichData>) -> Self {
        Self {
            data: RwLock::new(data),
            failure: RwLock::new(FailureMode::Healthy),
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Every id gets a generated name and phone
    pub fn generated<'a>(ids: impl IntoIterator<Item = &'a NodeId>) -> Self {
        let data = ids
            .into_iter()
            .map(|id| {
                (
                    id.clone(),
                    RichData {
                        name: Some(format!("Member {id}")),
                        phone: Some(format!("+1-555-{:04}", id.as_str().len() * 37 % 10_000)),
                        ..Default::default()
                    },
                )
            })
            .collect();
        Self::new(data)
    }

    pub async fn set_failure(&self, failure: FailureMode) {
        *self.failure.write().await = failure;
    }

    pub async fn insert(&self, id: NodeId, data: RichData) {
        self.data.write().await.insert(id, data);
    }

    /// Id lists received, one entry per call
    pub async fn requests(&self) -> Vec<Vec<NodeId>> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl EnrichmentSource for StaticEnrichmentSource {
    async fn fetch_enrichment(&self, ids: &[NodeId]) -> LoadResult<Vec<EnrichmentRecord>> {
        self.requests.write().await.push(ids.to_vec());
        self.failure.read().await.check()?;
        let data = self.data.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                data.get(id)
                    .map(|rich| EnrichmentRecord::new(id.clone(), rich.clone()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_structure_failure_modes() {
        let source = StaticStructureSource::new(vec![StructureRecord::root("r")]);
        assert_eq!(assert_ok!(source.fetch_structure().await).len(), 1);

        source.set_failure(FailureMode::ServerError(500)).await;
        let error = assert_err!(source.fetch_structure().await);
        assert!(error.is_transient());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_enrichment_returns_known_ids_only() {
        let ids = [NodeId::from("a"), NodeId::from("b")];
        let source = StaticEnrichmentSource::generated(&ids[..1]);

        let records = assert_ok!(source.fetch_enrichment(&ids).await);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, NodeId::from("a"));
        assert_eq!(records[0].data.name.as_deref(), Some("Member a"));
        assert_eq!(source.requests().await, vec![ids.to_vec()]);

        source.set_failure(FailureMode::Unreachable).await;
        assert_err!(source.fetch_enrichment(&ids).await);
    }
}
