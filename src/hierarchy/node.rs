//! Node records and the in-memory node representation

use serde::{Deserialize, Serialize};

use crate::value_objects::{NodeId, Position2D};

/// Index of a node inside a [`NodeStore`](super::NodeStore) arena
pub type NodeIndex = usize;

/// Minimal structural record delivered by the remote structure fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureRecord {
    pub id: NodeId,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    /// Position among siblings
    #[serde(default)]
    pub order: i64,
}

impl StructureRecord {
    pub fn new(id: impl Into<NodeId>, parent_id: Option<NodeId>, order: i64) -> Self {
        Self {
            id: id.into(),
            parent_id,
            order,
        }
    }

    /// Root record (no parent)
    pub fn root(id: impl Into<NodeId>) -> Self {
        Self::new(id, None, 0)
    }

    pub fn child(id: impl Into<NodeId>, parent: impl Into<NodeId>, order: i64) -> Self {
        Self::new(id, Some(parent.into()), order)
    }
}

/// Non-structural fields, initially absent and filled in by enrichment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biography: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl RichData {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.photo_url.is_none()
            && self.biography.is_none()
            && self.phone.is_none()
    }

    /// Overwrite fields that `update` carries; absent fields keep their value.
    /// Returns whether anything changed.
    pub fn merge_from(&mut self, update: &RichData) -> bool {
        let mut changed = false;
        for (slot, value) in [
            (&mut self.name, &update.name),
            (&mut self.photo_url, &update.photo_url),
            (&mut self.biography, &update.biography),
            (&mut self.phone, &update.phone),
        ] {
            if value.is_some() && slot != value {
                *slot = value.clone();
                changed = true;
            }
        }
        changed
    }
}

/// Rich-data record returned by the enrichment fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub id: NodeId,
    #[serde(flatten)]
    pub data: RichData,
}

impl EnrichmentRecord {
    pub fn new(id: impl Into<NodeId>, data: RichData) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// A node of the hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub order: i64,
    /// World position assigned by layout, immutable until the structure changes
    pub position: Position2D,
    pub rich: RichData,
    pub(crate) parent: Option<NodeIndex>,
    pub(crate) children: Vec<NodeIndex>,
}

impl Node {
    pub(crate) fn from_record(record: &StructureRecord) -> Self {
        Self {
            id: record.id.clone(),
            parent_id: record.parent_id.clone(),
            order: record.order,
            position: Position2D::new(f64::NAN, f64::NAN),
            rich: RichData::default(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Derived child list, ordered by sibling order
    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    /// Arena index of the parent, resolved when children were linked
    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    pub fn has_rich_data(&self) -> bool {
        !self.rich.is_empty()
    }

    pub fn record(&self) -> StructureRecord {
        StructureRecord::new(self.id.clone(), self.parent_id.clone(), self.order)
    }
}
