//! Shared node set with separate structural and enrichment write paths
//!
//! A [`HierarchySnapshot`] bundles everything derived from one structural
//! version: the arena, tree indices, spatial index and connections. Readers see
//! either the old snapshot or the new one, never a partial update. Enrichment
//! merges take the same lock but only touch rich fields.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::watch;

use super::connection::Connection;
use super::indices::TreeIndices;
use super::node::{NodeIndex, RichData, StructureRecord};
use super::store::NodeStore;
use super::structural_hash::StructuralHash;
use super::{HierarchyError, HierarchyResult};
use crate::layout::{LayoutEngine, LayoutMemo};
use crate::performance::spatial_index::{SpatialIndex, SpatialIndexConfig};
use crate::value_objects::NodeId;

/// Monotonic counters bumped by each write path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HierarchyVersion {
    pub structural: u64,
    pub enrichment: u64,
}

/// Everything derived from one structural version
#[derive(Debug, Clone)]
pub struct HierarchySnapshot {
    store: NodeStore,
    indices: TreeIndices,
    hash: StructuralHash,
    spatial: SpatialIndex,
    connections: Vec<Connection>,
    connection_by_parent: HashMap<NodeIndex, usize>,
}

impl HierarchySnapshot {
    /// Run the structural pipeline: arena, indices, memoized layout, centroids,
    /// spatial index and connections.
    ///
    /// Rich data already merged into `previous` is carried over for ids that
    /// survive the rebuild.
    pub fn build(
        records: &[StructureRecord],
        layout: &dyn LayoutEngine,
        memo: &mut LayoutMemo,
        spatial_config: SpatialIndexConfig,
        hero_count: usize,
        previous: Option<&HierarchySnapshot>,
    ) -> HierarchyResult<Self> {
        let hash = StructuralHash::of_records(records);
        let mut store = NodeStore::from_records(records)?;
        let mut indices = TreeIndices::build(&mut store, hero_count)?;

        let positions = memo.positions_for(hash, layout, &store, &indices)?;
        store.apply_positions(&positions);
        indices.compute_centroids(&store);

        if let Some(previous) = previous {
            let carried = store.carry_rich_from(&previous.store);
            tracing::debug!("Carried rich data for {} nodes into structure {}", carried, hash);
        }

        let mut spatial = SpatialIndex::new(spatial_config);
        spatial.build(&store);
        let connections = Connection::derive_all(&store, &indices);
        let connection_by_parent = connections
            .iter()
            .enumerate()
            .map(|(i, connection)| (connection.parent, i))
            .collect();

        tracing::info!(
            nodes = store.len(),
            connections = connections.len(),
            cells = spatial.cell_count(),
            "Structure {} ready",
            hash
        );

        Ok(Self {
            store,
            indices,
            hash,
            spatial,
            connections,
            connection_by_parent,
        })
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn indices(&self) -> &TreeIndices {
        &self.indices
    }

    pub fn hash(&self) -> StructuralHash {
        self.hash
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connection whose parent is `parent`, if it has reachable children
    pub fn connection_of(&self, parent: NodeIndex) -> Option<&Connection> {
        self.connection_by_parent
            .get(&parent)
            .map(|&i| &self.connections[i])
    }

    pub fn node_count(&self) -> usize {
        self.store.len()
    }

    /// Ids among `ids` that exist and still lack rich data
    pub fn missing_rich<'a>(&self, ids: impl IntoIterator<Item = &'a NodeId>) -> Vec<NodeId> {
        ids.into_iter()
            .filter(|id| self.store.node(id).is_some_and(|node| !node.has_rich_data()))
            .cloned()
            .collect()
    }
}

/// Outcome of one enrichment merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Nodes whose rich data changed
    pub applied: usize,
    /// Updates identical to what the node already had
    pub unchanged: usize,
    /// Updates for ids not in the current structure
    pub unknown: usize,
    pub version: HierarchyVersion,
}

#[derive(Debug, Default)]
struct Inner {
    snapshot: Option<HierarchySnapshot>,
    version: HierarchyVersion,
}

/// Handle to the current snapshot; clones share state
#[derive(Debug, Clone)]
pub struct SharedHierarchy {
    inner: Arc<RwLock<Inner>>,
    versions: Arc<watch::Sender<HierarchyVersion>>,
}

impl SharedHierarchy {
    pub fn new() -> Self {
        let (versions, _) = watch::channel(HierarchyVersion::default());
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            versions: Arc::new(versions),
        }
    }

    /// Swap in a new structural version
    pub fn replace_structure(&self, snapshot: HierarchySnapshot) -> HierarchyVersion {
        let version = {
            let mut inner = self.inner.write();
            inner.snapshot = Some(snapshot);
            inner.version.structural += 1;
            inner.version
        };
        self.versions.send_replace(version);
        version
    }

    /// Merge rich fields in one write; positions and indices are not touched
    pub fn merge_enrichment(&self, updates: &IndexMap<NodeId, RichData>) -> HierarchyResult<MergeReport> {
        let report = {
            let mut inner = self.inner.write();
            let Inner { snapshot, version } = &mut *inner;
            let snapshot = snapshot.as_mut().ok_or(HierarchyError::NotReady)?;

            let mut report = MergeReport::default();
            for (id, data) in updates {
                match snapshot.store.merge_rich(id, data) {
                    Some(true) => report.applied += 1,
                    Some(false) => report.unchanged += 1,
                    None => report.unknown += 1,
                }
            }
            if report.applied > 0 {
                version.enrichment += 1;
            }
            report.version = *version;
            report
        };

        if report.unknown > 0 {
            tracing::warn!("Ignored enrichment for {} unknown nodes", report.unknown);
        }
        if report.applied > 0 {
            self.versions.send_replace(report.version);
        }
        Ok(report)
    }

    /// Run `f` against the current snapshot under the read lock
    pub fn read<R>(&self, f: impl FnOnce(&HierarchySnapshot) -> R) -> Option<R> {
        self.inner.read().snapshot.as_ref().map(f)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read().snapshot.is_some()
    }

    pub fn version(&self) -> HierarchyVersion {
        self.inner.read().version
    }

    /// Structural hash of the current snapshot
    pub fn hash(&self) -> Option<StructuralHash> {
        self.read(HierarchySnapshot::hash)
    }

    /// Structural records of the current snapshot
    pub fn records(&self) -> Option<Vec<StructureRecord>> {
        self.read(|snapshot| snapshot.store.records())
    }

    /// Receiver notified on every version change
    pub fn subscribe(&self) -> watch::Receiver<HierarchyVersion> {
        self.versions.subscribe()
    }

    /// Drop the current snapshot
    pub fn clear(&self) {
        self.inner.write().snapshot = None;
    }

    /// Clone of the current snapshot, for callers that need to hold it across awaits
    pub fn snapshot(&self) -> Option<HierarchySnapshot> {
        self.read(|snapshot| snapshot.clone())
    }
}

impl Default for SharedHierarchy {
    fn default() -> Self {
        Self::new()
    }
}
