//! Batched path output for efficient drawing
//!
//! Segments from many connections are packed into bounded path batches so the
//! host draws a few large path objects instead of one object per edge.

use super::connection_geometry::{ConnectionStyle, PathSegment};
use super::level_of_detail::DetailTier;

/// What every segment in a batch shares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub tier: DetailTier,
    pub style: ConnectionStyle,
}

/// One drawable path object
#[derive(Debug, Clone, PartialEq)]
pub struct PathBatch {
    pub key: BatchKey,
    pub segments: Vec<PathSegment>,
}

impl PathBatch {
    fn new(key: BatchKey, capacity: usize) -> Self {
        Self {
            key,
            segments: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchingStats {
    pub connections: usize,
    pub segments: usize,
    pub batch_count: usize,
    pub largest_batch: usize,
    /// Draw objects avoided compared to one object per segment
    pub draw_calls_saved: usize,
}

/// Accumulates segments into batches of at most `segments_per_batch`
#[derive(Debug)]
pub struct PathBatcher {
    key: BatchKey,
    segments_per_batch: usize,
    open: Option<PathBatch>,
    finished: Vec<PathBatch>,
    stats: BatchingStats,
}

impl PathBatcher {
    pub fn new(key: BatchKey, segments_per_batch: usize) -> Self {
        Self {
            key,
            segments_per_batch: segments_per_batch.max(1),
            open: None,
            finished: Vec::new(),
            stats: BatchingStats::default(),
        }
    }

    /// Add every segment of one connection
    pub fn push_connection(&mut self, segments: Vec<PathSegment>) {
        if segments.is_empty() {
            return;
        }
        self.stats.connections += 1;
        for segment in segments {
            let (key, limit) = (self.key, self.segments_per_batch);
            let batch = self.open.get_or_insert_with(|| PathBatch::new(key, limit));
            batch.segments.push(segment);
            self.stats.segments += 1;
            if batch.len() >= limit {
                self.seal();
            }
        }
    }

    fn seal(&mut self) {
        if let Some(batch) = self.open.take() {
            self.stats.largest_batch = self.stats.largest_batch.max(batch.len());
            self.finished.push(batch);
        }
    }

    /// Close the open batch and hand back everything built
    pub fn finish(mut self) -> (Vec<PathBatch>, BatchingStats) {
        self.seal();
        self.stats.batch_count = self.finished.len();
        self.stats.draw_calls_saved = self.stats.segments.saturating_sub(self.stats.batch_count);
        (self.finished, self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::connection_geometry::{PathCommand, SegmentRole};
    use crate::value_objects::Position2D;

    fn segment() -> PathSegment {
        PathSegment {
            role: SegmentRole::Drop,
            commands: vec![
                PathCommand::MoveTo(Position2D::new(0.0, 0.0)),
                PathCommand::LineTo(Position2D::new(0.0, 10.0)),
            ],
        }
    }

    fn key() -> BatchKey {
        BatchKey {
            tier: DetailTier::FullDetail,
            style: ConnectionStyle::Elbow,
        }
    }

    #[test]
    fn test_batches_are_bounded() {
        let mut batcher = PathBatcher::new(key(), 50);
        for _ in 0..30 {
            batcher.push_connection(vec![segment(); 4]);
        }
        let (batches, stats) = batcher.finish();

        assert_eq!(stats.segments, 120);
        assert_eq!(stats.connections, 30);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 50);
        assert_eq!(batches[2].len(), 20);
        assert_eq!(stats.largest_batch, 50);
        assert_eq!(stats.draw_calls_saved, 117);
    }

    #[test]
    fn test_empty_connections_are_ignored() {
        let mut batcher = PathBatcher::new(key(), 50);
        batcher.push_connection(Vec::new());
        let (batches, stats) = batcher.finish();
        assert!(batches.is_empty());
        assert_eq!(stats, BatchingStats::default());
    }
}
