//! Realtime change events
//!
//! Updates to rich fields go through the enrichment batch. Structural events
//! (insert, delete, reparent) are buffered here and applied together through
//! the structural path once the feed goes quiet.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::hierarchy::{EnrichmentRecord, StructureRecord};
use crate::scheduling::Debouncer;
use crate::value_objects::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert {
        record: StructureRecord,
    },
    Update {
        record: EnrichmentRecord,
    },
    Delete {
        id: NodeId,
    },
    Reparent {
        id: NodeId,
        parent_id: NodeId,
        order: i64,
    },
}

impl ChangeEvent {
    /// Whether applying the event changes the structural hash
    pub fn is_structural(&self) -> bool {
        !matches!(self, ChangeEvent::Update { .. })
    }

    pub fn node_id(&self) -> &NodeId {
        match self {
            ChangeEvent::Insert { record } => &record.id,
            ChangeEvent::Update { record } => &record.id,
            ChangeEvent::Delete { id } | ChangeEvent::Reparent { id, .. } => id,
        }
    }
}

/// Buffers structural events between flushes
#[derive(Debug, Clone)]
pub struct ChangeFeedBuffer {
    pending: Vec<ChangeEvent>,
    debouncer: Debouncer,
}

impl ChangeFeedBuffer {
    pub fn new(quiet_ms: u64, max_wait_ms: u64) -> Self {
        Self {
            pending: Vec::new(),
            debouncer: Debouncer::new(quiet_ms, max_wait_ms),
        }
    }

    /// Queue a structural event and return the apply deadline
    pub fn push(&mut self, event: ChangeEvent, now_ms: u64) -> u64 {
        self.pending.push(event);
        self.debouncer.on_event(now_ms)
    }

    /// Take every buffered event, oldest first
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        self.debouncer.reset();
        std::mem::take(&mut self.pending)
    }


    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Apply structural events to a record list, preserving record order.
///
/// Inserting an existing id replaces it; deleting or reparenting an unknown id
/// is skipped with a warning. Children of a deleted node keep their parent id
/// and drop out of the reachable tree until they are reparented.
pub fn apply_events(records: Vec<StructureRecord>, events: &[ChangeEvent]) -> Vec<StructureRecord> {
    let mut by_id: IndexMap<NodeId, StructureRecord> = records
        .into_iter()
        .map(|record| (record.id.clone(), record))
        .collect();

    for event in events {
        match event {
            ChangeEvent::Insert { record } => {
                by_id.insert(record.id.clone(), record.clone());
            }
            ChangeEvent::Delete { id } => {
                if by_id.shift_remove(id).is_none() {
                    tracing::warn!("Delete for unknown node {}", id);
                }
            }
            ChangeEvent::Reparent {
                id,
                parent_id,
                order,
            } => match by_id.get_mut(id) {
                Some(record) => {
                    record.parent_id = Some(parent_id.clone());
                    record.order = *order;
                }
                None => tracing::warn!("Reparent for unknown node {}", id),
            },
            ChangeEvent::Update { .. } => {}
        }
    }

    by_id.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::RichData;

    fn base() -> Vec<StructureRecord> {
        vec![
            StructureRecord::root("r"),
            StructureRecord::child("a", "r", 0),
            StructureRecord::child("b", "r", 1),
        ]
    }

    #[test]
    fn test_apply_events() {
        let events = vec![
            ChangeEvent::Insert {
                record: StructureRecord::child("c", "a", 0),
            },
            ChangeEvent::Reparent {
                id: "b".into(),
                parent_id: "a".into(),
                order: 1,
            },
            ChangeEvent::Delete { id: "zzz".into() },
        ];
        let records = apply_events(base(), &events);
        assert_eq!(records.len(), 4);
        assert_eq!(records[2], StructureRecord::child("b", "a", 1));
        assert_eq!(records[3], StructureRecord::child("c", "a", 0));

        let records = apply_events(records, &[ChangeEvent::Delete { id: "a".into() }]);
        assert!(records.iter().all(|r| r.id.as_str() != "a"));
    }

    #[test]
    fn test_event_json_shape() {
        let event: ChangeEvent =
            serde_json::from_str(r#"{"type":"delete","id":"x"}"#).unwrap();
        assert_eq!(event, ChangeEvent::Delete { id: "x".into() });
        assert!(event.is_structural());

        let update = ChangeEvent::Update {
            record: EnrichmentRecord::new("x", RichData::default()),
        };
        assert!(!update.is_structural());
        assert_eq!(update.node_id().as_str(), "x");
    }

    #[test]
    fn test_buffer_debounce_and_drain() {
        let mut buffer = ChangeFeedBuffer::new(300, 1000);
        assert_eq!(buffer.push(ChangeEvent::Delete { id: "a".into() }, 0), 300);
        assert_eq!(buffer.push(ChangeEvent::Delete { id: "b".into() }, 100), 400);

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());

        assert_eq!(drained[0].node_id().as_str(), "a");

        // A drained buffer starts a fresh burst
        assert_eq!(buffer.push(ChangeEvent::Delete { id: "c".into() }, 2000), 2300);
        assert_eq!(buffer.len(), 1);
    }
}
