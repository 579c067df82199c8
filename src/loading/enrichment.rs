//! Enrichment batch accumulator
//!
//! Results are not merged into the node set as they arrive. They accumulate
//! here and flush as one merge on quiet, on max-wait, or on teardown. A failed
//! flush leaves every pending update in place for the next attempt.

use indexmap::IndexMap;

use super::{LoadError, LoadResult};
use crate::hierarchy::{EnrichmentRecord, MergeReport, RichData, SharedHierarchy};
use crate::scheduling::Debouncer;
use crate::value_objects::NodeId;

/// Destination of a flush
pub trait EnrichmentSink: Send + Sync {
    fn apply_enrichment(&self, updates: &IndexMap<NodeId, RichData>) -> LoadResult<MergeReport>;
}

impl EnrichmentSink for SharedHierarchy {
    fn apply_enrichment(&self, updates: &IndexMap<NodeId, RichData>) -> LoadResult<MergeReport> {
        Ok(self.merge_enrichment(updates)?)
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentBatch {
    pending: IndexMap<NodeId, RichData>,
    first_at: Option<u64>,
    debouncer: Debouncer,
    flushes: u64,
    failed_flushes: u64,
}

impl EnrichmentBatch {
    pub fn new(quiet_ms: u64, max_wait_ms: u64) -> Self {
        Self {
            pending: IndexMap::new(),
            first_at: None,
            debouncer: Debouncer::new(quiet_ms, max_wait_ms),
            flushes: 0,
            failed_flushes: 0,
        }
    }

    /// Add one update and return the flush deadline it implies.
    ///
    /// Updates for the same id fold together; later fields win.
    pub fn accumulate(&mut self, record: EnrichmentRecord, now_ms: u64) -> u64 {
        self.first_at.get_or_insert(now_ms);
        self.pending
            .entry(record.id)
            .or_default()
            .merge_from(&record.data);
        self.debouncer.on_event(now_ms)
    }

    /// Add several updates; `None` when `records` was empty
    pub fn extend(
        &mut self,
        records: impl IntoIterator<Item = EnrichmentRecord>,
        now_ms: u64,
    ) -> Option<u64> {
        records
            .into_iter()
            .map(|record| self.accumulate(record, now_ms))
            .last()
    }

    /// Merge everything pending into `sink` in one call.
    ///
    /// Cleared only when the sink accepts the batch.
    pub fn flush(&mut self, sink: &dyn EnrichmentSink) -> LoadResult<Option<MergeReport>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        match sink.apply_enrichment(&self.pending) {
            Ok(report) => {
                tracing::debug!(
                    "Flushed {} enrichment updates ({} applied)",
                    self.pending.len(),
                    report.applied
                );
                self.pending.clear();
                self.first_at = None;
                self.debouncer.reset();
                self.flushes += 1;
                Ok(Some(report))
            }
            Err(error) => {
                self.failed_flushes += 1;
                tracing::error!(
                    "Enrichment flush of {} updates failed, keeping them: {}",
                    self.pending.len(),
                    error
                );
                Err(match error {
                    LoadError::Flush(_) => error,
                    other => LoadError::Flush(other.to_string()),
                })
            }
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// When the first update of the current batch arrived
    pub fn first_at(&self) -> Option<u64> {
        self.first_at
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes
    }
}
