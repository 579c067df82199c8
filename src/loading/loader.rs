//! Progressive loader: one load session from skeleton to enriched nodes
//!
//! ```text
//! Idle -> LoadingStructure -> StructureReady -> Enriching (recurring)
//! ```
//!
//! All timing runs through the injected [`Clock`] and a [`DeferredQueue`];
//! the host calls [`ProgressiveLoader::tick`] (or sleeps until
//! [`ProgressiveLoader::next_deadline`]) to fire due work.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::change_feed::{apply_events, ChangeEvent, ChangeFeedBuffer};
use super::enrichment::EnrichmentBatch;
use super::sources::{
    CachedStructure, EnrichmentSource, LocalCache, StructureSource, STRUCTURE_CACHE_KEY,
};
use super::{LoadError, LoadResult};
use crate::hierarchy::{
    EnrichmentRecord, HierarchyError, HierarchySnapshot, MergeReport, SharedHierarchy, StructuralHash,
    StructureRecord, DEFAULT_HERO_COUNT,
};
use crate::layout::{LayoutEngine, LayoutMemo};
use crate::performance::spatial_index::SpatialIndexConfig;
use crate::scheduling::{Clock, DeferredQueue, RequestSequence, RequestTicket};
use crate::value_objects::NodeId;

/// Loader timing and sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Quiet time after the visible set changes before enrichment is requested
    pub enrichment_debounce_ms: u64,
    /// Quiet time before accumulated enrichment is merged
    pub flush_quiet_ms: u64,
    /// Hard ceiling on how long accumulated enrichment may wait
    pub flush_max_wait_ms: u64,
    /// Ids per remote enrichment call
    pub max_ids_per_request: usize,
    /// Cache envelopes with another tag are stale
    pub cache_schema_version: String,
    /// Cached structures smaller than this are refetched
    pub min_cached_records: usize,
    pub hero_count: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            enrichment_debounce_ms: 300,
            flush_quiet_ms: 150,
            flush_max_wait_ms: 1000,
            max_ids_per_request: 100,
            cache_schema_version: "structure-v1".to_string(),
            min_cached_records: 10,
            hero_count: DEFAULT_HERO_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadPhase {
    Idle,
    LoadingStructure,
    StructureReady,
    Enriching,
}

/// Where the installed structure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureOrigin {
    /// Fresh local cache, no fetch
    Cache,
    Remote,
    /// Remote failed; stale or undersized cache used instead
    LastKnownGood,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub origin: StructureOrigin,
    pub node_count: usize,
    pub hash: StructuralHash,
}

/// One issued enrichment request, split into remote calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentRequest {
    pub ticket: RequestTicket,
    pub chunks: Vec<Vec<NodeId>>,
}

impl EnrichmentRequest {
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.chunks.iter().flatten()
    }

    pub fn id_count(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Records went into the batch
    Accepted { records: usize },
    /// A newer request was issued; the result was dropped
    Stale,
    /// The fetch failed; ids are requested again on the next visible change
    Failed,
}

/// Result of firing due tasks
#[derive(Debug, Default)]
pub struct TickReport {
    pub enrichment: Option<CompletionOutcome>,
    pub flushed: Option<MergeReport>,
    pub structure_rebuilt: bool,
    pub errors: Vec<LoadError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub cache_hits: u64,
    pub remote_fetches: u64,
    pub fallbacks: u64,
    pub enrichment_requests: u64,
    pub enrichment_calls: u64,
    pub stale_discarded: u64,
    pub failed_fetches: u64,
    pub structural_rebuilds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Task {
    IssueEnrichment,
    FlushEnrichment,
    ApplyStructuralChanges,
}

pub struct ProgressiveLoader {
    session_id: Uuid,
    config: LoaderConfig,
    clock: Arc<dyn Clock>,
    structure_source: Arc<dyn StructureSource>,
    enrichment_source: Arc<dyn EnrichmentSource>,
    cache: Arc<dyn LocalCache>,
    layout: Arc<dyn LayoutEngine>,
    memo: LayoutMemo,
    spatial_config: SpatialIndexConfig,
    hierarchy: SharedHierarchy,
    phase: LoadPhase,
    queue: DeferredQueue<Task>,
    sequence: RequestSequence,
    visible: Vec<NodeId>,
    in_flight: HashSet<NodeId>,
    batch: EnrichmentBatch,
    changes: ChangeFeedBuffer,
    stats: LoaderStats,
}

impl ProgressiveLoader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: LoaderConfig,
        clock: Arc<dyn Clock>,
        structure_source: Arc<dyn StructureSource>,
        enrichment_source: Arc<dyn EnrichmentSource>,
        cache: Arc<dyn LocalCache>,
        layout: Arc<dyn LayoutEngine>,
        spatial_config: SpatialIndexConfig,
        hierarchy: SharedHierarchy,
    ) -> Self {
        let batch = EnrichmentBatch::new(config.flush_quiet_ms, config.flush_max_wait_ms);
        let changes = ChangeFeedBuffer::new(config.enrichment_debounce_ms, config.flush_max_wait_ms);
        Self {
            session_id: Uuid::new_v4(),
            config,
            clock,
            structure_source,
            enrichment_source,
            cache,
            layout,
            memo: LayoutMemo::new(),
            spatial_config,
            hierarchy,
            phase: LoadPhase::Idle,
            queue: DeferredQueue::new(),
            sequence: RequestSequence::new(),
            visible: Vec::new(),
            in_flight: HashSet::new(),
            batch,
            changes,
            stats: LoaderStats::default(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn hierarchy(&self) -> &SharedHierarchy {
        &self.hierarchy
    }

    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Updates waiting in the enrichment batch
    pub fn pending_enrichment(&self) -> usize {
        self.batch.len()
    }

    /// Structural events waiting to be applied
    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }

    /// Layouts actually computed this session
    pub fn layout_computations(&self) -> u64 {
        self.memo.computations()
    }

    /// Earliest time any deferred work is due
    pub fn next_deadline(&self) -> Option<u64> {
        self.queue.next_due()
    }

    fn set_phase(&mut self, phase: LoadPhase) {
        if self.phase != phase {
            tracing::info!(session = %self.session_id, "Load phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Load the structure: fresh cache, else remote, else last-known-good cache
    pub async fn load(&mut self) -> LoadResult<LoadOutcome> {
        self.set_phase(LoadPhase::LoadingStructure);

        let cached = self.read_cache().await;
        let fresh = cached.as_ref().is_some_and(|cached| {
            cached.is_usable(&self.config.cache_schema_version, self.config.min_cached_records)
        });

        let (records, origin) = match cached {
            Some(cached) if fresh => {
                self.stats.cache_hits += 1;
                tracing::debug!("Using cached structure ({} records)", cached.records.len());
                (cached.records, StructureOrigin::Cache)
            }
            cached => match self.fetch_structure().await {
                Ok(records) => {
                    self.write_cache(&records).await;
                    (records, StructureOrigin::Remote)
                }
                Err(error) => match cached.filter(|cached| !cached.records.is_empty()) {
                    Some(cached) => {
                        self.stats.fallbacks += 1;
                        tracing::warn!(
                            "Structure fetch failed ({}); falling back to cached copy from {}",
                            error,
                            cached.stored_at
                        );
                        (cached.records, StructureOrigin::LastKnownGood)
                    }
                    None => {
                        self.set_phase(LoadPhase::Idle);
                        return Err(error);
                    }
                },
            },
        };

        let (node_count, hash) = match self.install_structure(&records) {
            Ok(installed) => installed,
            Err(error) => {
                self.set_phase(LoadPhase::Idle);
                return Err(error);
            }
        };
        self.set_phase(LoadPhase::StructureReady);

        Ok(LoadOutcome {
            origin,
            node_count,
            hash,
        })
    }

    async fn fetch_structure(&mut self) -> LoadResult<Vec<StructureRecord>> {
        self.stats.remote_fetches += 1;
        let records = self.structure_source.fetch_structure().await?;
        if records.is_empty() {
            return Err(LoadError::EmptyResult);
        }
        Ok(records)
    }

    async fn read_cache(&self) -> Option<CachedStructure> {
        match self.cache.get(STRUCTURE_CACHE_KEY).await {
            Ok(Some(json)) => match CachedStructure::from_json(&json) {
                Ok(cached) => {
                    if cached.schema_version != self.config.cache_schema_version {
                        tracing::warn!(
                            "Cached structure has schema {} (expected {}); treating as stale",
                            cached.schema_version,
                            self.config.cache_schema_version
                        );
                    }
                    Some(cached)
                }
                Err(error) => {
                    tracing::warn!("Discarding unreadable cached structure: {}", error);
                    None
                }
            },
            Ok(None) => {
                tracing::debug!("No cached structure");
                None
            }
            Err(error) => {
                tracing::warn!("Local cache read failed: {}", error);
                None
            }
        }
    }

    async fn write_cache(&self, records: &[StructureRecord]) {
        let envelope = CachedStructure::new(self.config.cache_schema_version.clone(), records.to_vec());
        let result = match envelope.to_json() {
            Ok(json) => self.cache.set(STRUCTURE_CACHE_KEY, json).await,
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            tracing::warn!("Could not persist structure to local cache: {}", error);
        }
    }

    /// Structural path: rebuild the snapshot and swap it in
    fn install_structure(&mut self, records: &[StructureRecord]) -> LoadResult<(usize, StructuralHash)> {
        let previous = self.hierarchy.snapshot();
        let snapshot = HierarchySnapshot::build(
            records,
            self.layout.as_ref(),
            &mut self.memo,
            self.spatial_config.clone(),
            self.config.hero_count,
            previous.as_ref(),
        )?;
        let installed = (snapshot.node_count(), snapshot.hash());
        self.hierarchy.replace_structure(snapshot);
        self.stats.structural_rebuilds += 1;
        Ok(installed)
    }

    /// The host reports which nodes are on screen; enrichment follows after
    /// the debounce.
    pub fn on_visible_changed(&mut self, visible: impl IntoIterator<Item = NodeId>) {
        self.visible = visible.into_iter().collect();
        if matches!(self.phase, LoadPhase::StructureReady | LoadPhase::Enriching) {
            let due = self.clock.now_ms() + self.config.enrichment_debounce_ms;
            self.queue.schedule(Task::IssueEnrichment, due);
        }
    }

    /// Issue a request for visible nodes still lacking rich data.
    ///
    /// Issuing supersedes every earlier request, whether or not it resolved.
    pub fn issue_enrichment(&mut self) -> Option<EnrichmentRequest> {
        let missing: Vec<NodeId> = self
            .hierarchy
            .read(|snapshot| snapshot.missing_rich(&self.visible))?
            .into_iter()
            .filter(|id| !self.batch.contains(id))
            .collect();
        if missing.is_empty() {
            return None;
        }

        let ticket = self.sequence.issue();
        self.in_flight = missing.iter().cloned().collect();
        let chunks: Vec<Vec<NodeId>> = missing
            .chunks(self.config.max_ids_per_request.max(1))
            .map(<[NodeId]>::to_vec)
            .collect();
        self.stats.enrichment_requests += 1;
        self.set_phase(LoadPhase::Enriching);
        tracing::debug!("Enrichment request {} for {} ids", ticket, missing.len());
        Some(EnrichmentRequest { ticket, chunks })
    }

    /// Run the remote calls for `request`, one per chunk
    pub async fn fetch_enrichment(&mut self, request: &EnrichmentRequest) -> LoadResult<Vec<EnrichmentRecord>> {
        let mut records = Vec::with_capacity(request.id_count());
        for chunk in &request.chunks {
            self.stats.enrichment_calls += 1;
            records.extend(self.enrichment_source.fetch_enrichment(chunk).await?);
        }
        Ok(records)
    }

    /// Hand back the result of a request; stale results are discarded
    pub fn complete_enrichment(
        &mut self,
        ticket: RequestTicket,
        result: LoadResult<Vec<EnrichmentRecord>>,
    ) -> CompletionOutcome {
        if !self.sequence.is_current(ticket) {
            self.stats.stale_discarded += 1;
            tracing::debug!("Discarding stale enrichment result {}", ticket);
            return CompletionOutcome::Stale;
        }
        self.in_flight.clear();

        let records = match result {
            Ok(records) => records,
            Err(error) => {
                self.stats.failed_fetches += 1;
                tracing::warn!("Enrichment fetch {} failed: {}", ticket, error);
                return CompletionOutcome::Failed;
            }
        };

        let count = records.len();
        let now = self.clock.now_ms();
        if let Some(deadline) = self.batch.extend(records, now) {
            self.queue.schedule(Task::FlushEnrichment, deadline);
        }
        CompletionOutcome::Accepted { records: count }
    }

    /// Issue, fetch and complete in one go
    pub async fn enrich_visible(&mut self) -> Option<CompletionOutcome> {
        let request = self.issue_enrichment()?;
        let result = self.fetch_enrichment(&request).await;
        Some(self.complete_enrichment(request.ticket, result))
    }

    /// Ids covered by the newest unresolved request
    pub fn in_flight(&self) -> &HashSet<NodeId> {
        &self.in_flight
    }

    /// Merge the batch now; on failure the batch is kept
    pub fn flush_enrichment(&mut self) -> LoadResult<Option<MergeReport>> {
        let report = self.batch.flush(&self.hierarchy)?;
        self.queue.cancel(&Task::FlushEnrichment);
        Ok(report)
    }

    /// Feed one realtime change event
    pub fn on_change_event(&mut self, event: ChangeEvent) {
        let now = self.clock.now_ms();
        match event {
            ChangeEvent::Update { record } => {
                let deadline = self.batch.accumulate(record, now);
                self.queue.schedule(Task::FlushEnrichment, deadline);
            }
            structural => {
                let deadline = self.changes.push(structural, now);
                self.queue.schedule(Task::ApplyStructuralChanges, deadline);
            }
        }
    }

    /// Apply buffered structural events through the structural path
    pub async fn apply_structural_changes(&mut self) -> LoadResult<bool> {
        if self.changes.is_empty() {
            return Ok(false);
        }
        let records = self
            .hierarchy
            .records()
            .ok_or(LoadError::Hierarchy(HierarchyError::NotReady))?;
        let events = self.changes.drain();
        let next = apply_events(records, &events);

        if let Err(error) = self.install_structure(&next) {
            tracing::error!(
                "Rejected {} structural changes, keeping current structure: {}",
                events.len(),
                error
            );
            return Err(error);
        }
        self.queue.cancel(&Task::ApplyStructuralChanges);
        self.write_cache(&next).await;
        Ok(true)
    }

    /// Fire every task due at the clock's current time
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let now = self.clock.now_ms();

        // Work fired here can schedule more work that is already due
        loop {
            let due = self.queue.pop_due(now);
            if due.is_empty() {
                break;
            }
            for task in due {
                match task {
                    Task::IssueEnrichment => {
                        report.enrichment = self.enrich_visible().await;
                    }
                    Task::FlushEnrichment => match self.flush_enrichment() {
                        Ok(flushed) => report.flushed = flushed,
                        Err(error) => report.errors.push(error),
                    },
                    Task::ApplyStructuralChanges => match self.apply_structural_changes().await {
                        Ok(rebuilt) => report.structure_rebuilt = rebuilt,
                        Err(error) => report.errors.push(error),
                    },
                }
            }
        }
        report
    }

    /// Teardown: flush synchronously and stop all deferred work.
    ///
    /// A failed flush is returned and the updates stay in the batch.
    pub fn shutdown(&mut self) -> LoadResult<Option<MergeReport>> {
        let flushed = self.flush_enrichment();
        self.queue.clear();
        self.set_phase(LoadPhase::Idle);
        flushed
    }
}

impl std::fmt::Debug for ProgressiveLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressiveLoader")
            .field("session_id", &self.session_id)
            .field("phase", &self.phase)
            .field("pending_enrichment", &self.batch.len())
            .field("pending_changes", &self.changes.len())
            .field("stats", &self.stats)
            .finish()
    }
}
