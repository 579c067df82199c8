//! Time, deferred tasks and request sequencing
//!
//! All debounce and max-wait logic runs against a [`Clock`] and a
//! [`DeferredQueue`] instead of sleeping, so tests drive time with
//! [`ManualClock`] and never wait on the wall clock.

pub mod sequence;

pub use sequence::{RequestSequence, RequestTicket};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic millisecond clock
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> u64;
}

/// Clock backed by the tokio timer, so it follows `tokio::time::pause`
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Cancellable deferred-task queue keyed by task identity.
///
/// Scheduling a key that is already pending moves its deadline; this is what
/// turns repeated events into a debounce.
#[derive(Debug, Clone)]
pub struct DeferredQueue<K> {
    queue: BTreeMap<(u64, u64), K>,
    scheduled: HashMap<K, (u64, u64)>,
    next_seq: u64,
}

impl<K: Hash + Eq + Clone> DeferredQueue<K> {
    pub fn new() -> Self {
        Self {
            queue: BTreeMap::new(),
            scheduled: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `key` at `due_ms`, replacing any pending deadline
    pub fn schedule(&mut self, key: K, due_ms: u64) {
        self.cancel(&key);
        let slot = (due_ms, self.next_seq);
        self.next_seq += 1;
        self.queue.insert(slot, key.clone());
        self.scheduled.insert(key, slot);
    }

    /// Returns whether a pending task was removed
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.scheduled.remove(key) {
            Some(slot) => {
                self.queue.remove(&slot);
                true
            }
            None => false,
        }
    }

    pub fn due_at(&self, key: &K) -> Option<u64> {
        self.scheduled.get(key).map(|&(due, _)| due)
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.scheduled.contains_key(key)
    }

    /// Earliest pending deadline
    pub fn next_due(&self) -> Option<u64> {
        self.queue.keys().next().map(|&(due, _)| due)
    }

    /// Remove and return every task due at or before `now_ms`, earliest first
    pub fn pop_due(&mut self, now_ms: u64) -> Vec<K> {
        let mut fired = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now_ms {
                break;
            }
            let key = entry.remove();
            self.scheduled.remove(&key);
            fired.push(key);
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.scheduled.clear();
    }
}

impl<K: Hash + Eq + Clone> Default for DeferredQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Quiet-window debounce with a hard max-wait ceiling.
///
/// Each event pushes the deadline to `now + quiet`, but never past
/// `first event of the burst + max_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debouncer {
    quiet_ms: u64,
    max_wait_ms: u64,
    burst_started_at: Option<u64>,
}

impl Debouncer {
    pub fn new(quiet_ms: u64, max_wait_ms: u64) -> Self {
        Self {
            quiet_ms,
            max_wait_ms: max_wait_ms.max(quiet_ms),
            burst_started_at: None,
        }
    }

    /// Record an event and return the deadline it implies
    pub fn on_event(&mut self, now_ms: u64) -> u64 {
        let started = *self.burst_started_at.get_or_insert(now_ms);
        (now_ms + self.quiet_ms).min(started + self.max_wait_ms)
    }

    /// End the current burst (after the deadline fired)
    pub fn reset(&mut self) {
        self.burst_started_at = None;
    }

    pub fn burst_started_at(&self) -> Option<u64> {
        self.burst_started_at
    }
}
