//! Digest over the structure-affecting fields of the node set
//!
//! Only `(id, parent_id, order)` triples feed the hash, so enrichment never
//! changes it. Triples are sorted by id first: the same structure delivered in a
//! different order hashes identically.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::node::StructureRecord;

/// BLAKE3 digest of a structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructuralHash([u8; 32]);

impl StructuralHash {
    pub fn of_records(records: &[StructureRecord]) -> Self {
        let mut triples: Vec<&StructureRecord> = records.iter().collect();
        triples.sort_by(|a, b| a.id.cmp(&b.id));

        let mut hasher = blake3::Hasher::new();
        hasher.update(&(triples.len() as u64).to_le_bytes());
        for record in triples {
            let id = record.id.as_str().as_bytes();
            hasher.update(&(id.len() as u64).to_le_bytes());
            hasher.update(id);
            match &record.parent_id {
                Some(parent) => {
                    let parent = parent.as_str().as_bytes();
                    hasher.update(&[1]);
                    hasher.update(&(parent.len() as u64).to_le_bytes());
                    hasher.update(parent);
                }
                None => {
                    hasher.update(&[0]);
                }
            }
            hasher.update(&record.order.to_le_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for StructuralHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<StructureRecord> {
        vec![
            StructureRecord::root("r"),
            StructureRecord::child("a", "r", 0),
            StructureRecord::child("b", "r", 1),
        ]
    }

    #[test]
    fn test_hash_ignores_arrival_order() {
        let mut shuffled = records();
        shuffled.reverse();
        assert_eq!(
            StructuralHash::of_records(&records()),
            StructuralHash::of_records(&shuffled)
        );
    }

    #[test]
    fn test_hash_tracks_parent_and_order() {
        let base = StructuralHash::of_records(&records());

        let mut reordered = records();
        reordered[2].order = 5;
        assert_ne!(base, StructuralHash::of_records(&reordered));

        let mut reparented = records();
        reparented[2].parent_id = Some("a".into());
        assert_ne!(base, StructuralHash::of_records(&reparented));
    }

    #[test]
    fn test_display_is_short_hex() {
        let hash = StructuralHash::of_records(&records());
        assert_eq!(hash.to_string().len(), 16);
    }
}
