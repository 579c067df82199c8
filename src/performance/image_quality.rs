//! Per-node image quality buckets
//!
//! Photo assets come in a fixed ascending set of pixel sizes. Each node keeps
//! its committed bucket across frames: growing requires the requested size to
//! clear the current bucket by the hysteresis fraction and then survive the
//! upgrade delay, shrinking happens as soon as the size drops clearly below the
//! next smaller bucket.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::lru::LruMap;
use crate::scheduling::Clock;
use crate::value_objects::NodeId;

/// Bucket set and transition tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Available asset sizes in pixels, ascending
    pub buckets: Vec<u32>,
    /// Fraction a size must clear a bucket boundary by before a change
    pub hysteresis: f64,
    /// Quiet time before a pending upgrade is committed
    pub upgrade_delay_ms: u64,
    /// Bucket used for invalid sizes when a node has no state yet
    pub default_bucket: u32,
    /// Upper bound on tracked nodes
    pub state_capacity: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            buckets: vec![32, 64, 128, 256, 512],
            hysteresis: 0.15,
            upgrade_delay_ms: 250,
            default_bucket: 64,
            state_capacity: 4096,
        }
    }
}

impl QualityConfig {
    /// Smallest bucket that is at least `px`; the largest bucket when none is
    pub fn select_bucket(&self, px: f64) -> u32 {
        self.buckets
            .iter()
            .copied()
            .find(|&bucket| f64::from(bucket) >= px)
            .or_else(|| self.buckets.last().copied())
            .unwrap_or(self.default_bucket)
    }

    /// Largest bucket strictly smaller than `bucket`
    fn bucket_below(&self, bucket: u32) -> Option<u32> {
        self.buckets.iter().copied().filter(|&b| b < bucket).max()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingUpgrade {
    target: u32,
    due_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BucketState {
    current: u32,
    pending: Option<PendingUpgrade>,
}

/// Counters for the quality machine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityStats {
    pub queries: u64,
    pub invalid_inputs: u64,
    pub upgrades: u64,
    pub downgrades: u64,
    pub deferred_upgrades: u64,
}

/// Owns the bucket state of every node in the working set
#[derive(Debug)]
pub struct QualityController {
    config: QualityConfig,
    clock: Arc<dyn Clock>,
    states: LruMap<NodeId, BucketState>,
    stats: QualityStats,
}

impl QualityController {
    pub fn new(config: QualityConfig, clock: Arc<dyn Clock>) -> Self {
        let states = LruMap::new(config.state_capacity);
        Self {
            config,
            clock,
            states,
            stats: QualityStats::default(),
        }
    }

    /// Bucket to request for `id` when it needs `px` pixels on screen
    pub fn bucket_for(&mut self, id: &NodeId, px: f64) -> u32 {
        self.stats.queries += 1;

        if !(px.is_finite() && px > 0.0) {
            self.stats.invalid_inputs += 1;
            return self
                .states
                .peek(id)
                .map(|state| state.current)
                .unwrap_or(self.config.default_bucket);
        }

        let target = self.config.select_bucket(px);
        let now = self.clock.now_ms();
        let hysteresis = self.config.hysteresis;

        let Some(state) = self.states.get_mut(id) else {
            self.states.insert(
                id.clone(),
                BucketState {
                    current: target,
                    pending: None,
                },
            );
            return target;
        };

        if target > state.current {
            if px <= f64::from(state.current) * (1.0 + hysteresis) {
                state.pending = None;
                return state.current;
            }
            match state.pending.as_mut() {
                Some(pending) => {
                    pending.target = target;
                    if now >= pending.due_ms {
                        state.current = pending.target;
                        state.pending = None;
                        self.stats.upgrades += 1;
                    }
                }
                None => {
                    state.pending = Some(PendingUpgrade {
                        target,
                        due_ms: now + self.config.upgrade_delay_ms,
                    });
                    self.stats.deferred_upgrades += 1;
                }
            }
            return state.current;
        }

        state.pending = None;
        if target < state.current {
            let below = self.config.bucket_below(state.current).unwrap_or(target);
            if px <= f64::from(below) * (1.0 - hysteresis) {
                state.current = target;
                self.stats.downgrades += 1;
            }
        }
        state.current
    }

    /// Committed bucket for `id`, if it has state
    pub fn current_bucket(&self, id: &NodeId) -> Option<u32> {
        self.states.peek(id).map(|state| state.current)
    }

    /// Whether an upgrade is waiting on its delay
    pub fn has_pending_upgrade(&self, id: &NodeId) -> bool {
        self.states
            .peek(id)
            .is_some_and(|state| state.pending.is_some())
    }

    /// Drop state for nodes outside the working set
    pub fn retain_working_set(&mut self, keep: impl Fn(&NodeId) -> bool) {
        self.states.retain(|id, _| keep(id));
    }

    pub fn remove(&mut self, id: &NodeId) -> bool {
        self.states.remove(id).is_some()
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    pub fn evictions(&self) -> u64 {
        self.states.evictions()
    }

    pub fn stats(&self) -> &QualityStats {
        &self.stats
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Teardown: forget all node state
    pub fn clear(&mut self) {
        self.states.clear();
    }
}
