//! Arena of nodes with id lookup
//!
//! Nodes live in a `Vec` in input order; everything else refers to them by
//! [`NodeIndex`]. Parent and child links are derived from the records and are
//! never authoritative.

use std::collections::HashMap;

use super::node::{Node, NodeIndex, RichData, StructureRecord};
use super::{HierarchyError, HierarchyResult};
use crate::value_objects::{NodeId, Position2D};

/// The node set
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: Vec<Node>,
    index: HashMap<NodeId, NodeIndex>,
    /// Records dropped while building (duplicate ids)
    skipped: usize,
}

impl NodeStore {
    /// Build the arena from structural records.
    ///
    /// A repeated id is a data-quality problem: the first occurrence wins and the
    /// rest are skipped.
    pub fn from_records(records: &[StructureRecord]) -> HierarchyResult<Self> {
        if records.is_empty() {
            return Err(HierarchyError::EmptyStructure);
        }

        let mut nodes = Vec::with_capacity(records.len());
        let mut index = HashMap::with_capacity(records.len());
        let mut skipped = 0;

        for record in records {
            if index.contains_key(&record.id) {
                tracing::warn!("Skipping duplicate node id {}", record.id);
                skipped += 1;
                continue;
            }
            index.insert(record.id.clone(), nodes.len());
            nodes.push(Node::from_record(record));
        }

        Ok(Self {
            nodes,
            index,
            skipped,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of input records that were skipped
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn get(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn index_of(&self, id: &NodeId) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.nodes.iter().enumerate()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn children(&self, index: NodeIndex) -> &[NodeIndex] {
        self.nodes
            .get(index)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn position(&self, index: NodeIndex) -> Option<Position2D> {
        self.nodes.get(index).map(|n| n.position)
    }

    /// Resolve parent ids into arena links and fill each node's child list.
    ///
    /// Returns the indices of nodes whose parent id is not in the set.
    pub(crate) fn link_children(&mut self) -> Vec<NodeIndex> {
        for node in &mut self.nodes {
            node.children.clear();
            node.parent = None;
        }

        let mut orphans = Vec::new();
        for i in 0..self.nodes.len() {
            let Some(parent_id) = self.nodes[i].parent_id.as_ref() else {
                continue;
            };
            match self.index.get(parent_id).copied() {
                Some(p) => {
                    self.nodes[i].parent = Some(p);
                    self.nodes[p].children.push(i);
                }
                None => orphans.push(i),
            }
        }

        // Stable sort keeps input order among equal sibling orders
        for i in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[i].children);
            children.sort_by_key(|&c| self.nodes[c].order);
            self.nodes[i].children = children;
        }

        orphans
    }

    /// Apply layout positions by id; nodes the layout did not place keep a
    /// non-finite position and are skipped by the spatial index.
    pub fn apply_positions(&mut self, positions: &HashMap<NodeId, Position2D>) {
        for node in &mut self.nodes {
            node.position = positions
                .get(&node.id)
                .copied()
                .unwrap_or(Position2D::new(f64::NAN, f64::NAN));
        }
    }

    /// Merge rich fields into one node. Unknown ids are ignored.
    pub fn merge_rich(&mut self, id: &NodeId, update: &RichData) -> Option<bool> {
        let index = self.index_of(id)?;
        Some(self.nodes[index].rich.merge_from(update))
    }

    /// Copy rich data for ids that survive a structural rebuild
    pub fn carry_rich_from(&mut self, previous: &NodeStore) -> usize {
        let mut carried = 0;
        for node in &mut self.nodes {
            if let Some(old) = previous.node(&node.id) {
                if !old.rich.is_empty() {
                    node.rich = old.rich.clone();
                    carried += 1;
                }
            }
        }
        carried
    }

    /// Structural records in arena order
    pub fn records(&self) -> Vec<StructureRecord> {
        self.nodes.iter().map(Node::record).collect()
    }
}
