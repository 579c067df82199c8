//! Tree indices: depth, subtree size, centroid and hero anchors
//!
//! Built in a fixed number of linear passes over the arena:
//!
//! 1. one pass linking parent → children,
//! 2. a breadth-first walk from the unique root assigning depth,
//! 3. an explicit-stack post-order walk accumulating subtree size and the
//!    position-weighted centroid bottom-up,
//! 4. hero selection among the root's children.
//!
//! Nothing here recurses, so a pathologically deep chain cannot overflow the stack.

use std::cmp::Reverse;
use std::collections::VecDeque;

use super::node::NodeIndex;
use super::store::NodeStore;
use super::{HierarchyError, HierarchyResult};
use crate::value_objects::Position2D;

/// Number of depth-1 heroes selected next to the root
pub const DEFAULT_HERO_COUNT: usize = 2;

const UNREACHED: u32 = u32::MAX;

/// Precomputed structural metadata for one structural version
#[derive(Debug, Clone, PartialEq)]
pub struct TreeIndices {
    root: NodeIndex,
    depth: Vec<u32>,
    subtree_size: Vec<u32>,
    centroid: Vec<Position2D>,
    heroes: Vec<NodeIndex>,
    bfs_order: Vec<NodeIndex>,
    post_order: Vec<NodeIndex>,
    unreachable: Vec<NodeIndex>,
    max_depth: u32,
}

impl TreeIndices {
    /// Link children on `store` and compute every index.
    ///
    /// A missing or ambiguous root and circular parent references abort the build.
    /// Nodes hanging off a parent id that is not in the set are skipped with a
    /// warning and reported through [`TreeIndices::unreachable`].
    pub fn build(store: &mut NodeStore, hero_count: usize) -> HierarchyResult<Self> {
        let orphans = store.link_children();
        for &orphan in &orphans {
            if let Some(node) = store.get(orphan) {
                tracing::warn!(
                    "Node {} references unknown parent {:?}; skipping its subtree",
                    node.id,
                    node.parent_id
                );
            }
        }

        let root = find_root(store)?;
        let (depth, bfs_order, max_depth) = assign_depths(store, root);

        let unreachable: Vec<NodeIndex> = (0..store.len())
            .filter(|&i| depth[i] == UNREACHED)
            .collect();
        if !unreachable.is_empty() {
            if let Some(node) = find_cycle(store, &unreachable) {
                let id = store
                    .get(node)
                    .map(|n| n.id.clone())
                    .ok_or(HierarchyError::NotReady)?;
                tracing::warn!("Circular parent reference detected at {}", id);
                return Err(HierarchyError::CycleDetected { node: id });
            }
        }

        let post_order = post_order(store, root);
        let mut subtree_size = vec![0u32; store.len()];
        for &i in &post_order {
            subtree_size[i] = 1 + store
                .children(i)
                .iter()
                .map(|&c| subtree_size[c])
                .sum::<u32>();
        }

        let heroes = select_heroes(store, root, &subtree_size, hero_count);

        let mut indices = Self {
            root,
            depth,
            subtree_size,
            centroid: vec![Position2D::new(f64::NAN, f64::NAN); store.len()],
            heroes,
            bfs_order,
            post_order,
            unreachable,
            max_depth,
        };
        indices.compute_centroids(store);

        tracing::debug!(
            nodes = store.len(),
            reachable = indices.post_order.len(),
            max_depth = indices.max_depth,
            "Tree indices built"
        );
        Ok(indices)
    }

    /// Recompute centroids from the store's current positions.
    ///
    /// One pass over the cached post-order; called again after layout assigns
    /// positions. Nodes without a finite position do not contribute.
    pub fn compute_centroids(&mut self, store: &NodeStore) {
        let n = store.len();
        let mut sum_x = vec![0.0f64; n];
        let mut sum_y = vec![0.0f64; n];
        let mut placed = vec![0u32; n];

        for &i in &self.post_order {
            if let Some(position) = store.position(i).filter(Position2D::is_finite) {
                sum_x[i] += position.x;
                sum_y[i] += position.y;
                placed[i] += 1;
            }
            for &c in store.children(i) {
                sum_x[i] += sum_x[c];
                sum_y[i] += sum_y[c];
                placed[i] += placed[c];
            }
            self.centroid[i] = if placed[i] > 0 {
                let count = f64::from(placed[i]);
                Position2D::new(sum_x[i] / count, sum_y[i] / count)
            } else {
                Position2D::new(f64::NAN, f64::NAN)
            };
        }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Depth from the root, `None` for skipped nodes
    pub fn depth(&self, index: NodeIndex) -> Option<u32> {
        self.depth.get(index).copied().filter(|&d| d != UNREACHED)
    }

    /// 1 + the subtree sizes of all children; 0 for skipped nodes
    pub fn subtree_size(&self, index: NodeIndex) -> u32 {
        self.subtree_size.get(index).copied().unwrap_or(0)
    }

    pub fn centroid(&self, index: NodeIndex) -> Option<Position2D> {
        self.centroid.get(index).copied().filter(Position2D::is_finite)
    }

    /// Root first, then the selected depth-1 anchors by descending subtree size
    pub fn heroes(&self) -> &[NodeIndex] {
        &self.heroes
    }

    pub fn bfs_order(&self) -> &[NodeIndex] {
        &self.bfs_order
    }

    /// Children always precede their parent
    pub fn post_order(&self) -> &[NodeIndex] {
        &self.post_order
    }

    /// Nodes not reachable from the root (orphaned subtrees)
    pub fn unreachable(&self) -> &[NodeIndex] {
        &self.unreachable
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn reachable_count(&self) -> usize {
        self.post_order.len()
    }
}

/// Walk from `index` up to the root, guarding against cycles with a visited set
pub fn path_to_root(store: &NodeStore, index: NodeIndex) -> HierarchyResult<Vec<NodeIndex>> {
    let mut visited = vec![false; store.len()];
    let mut path = Vec::new();
    let mut current = Some(index);

    while let Some(i) = current {
        let node = store.get(i).ok_or(HierarchyError::NotReady)?;
        if visited[i] {
            return Err(HierarchyError::CycleDetected {
                node: node.id.clone(),
            });
        }
        visited[i] = true;
        path.push(i);
        current = node.parent();
    }
    Ok(path)
}

fn find_root(store: &NodeStore) -> HierarchyResult<NodeIndex> {
    let roots: Vec<NodeIndex> = store
        .iter()
        .filter(|(_, node)| node.is_root())
        .map(|(i, _)| i)
        .collect();

    match roots.as_slice() {
        [] => Err(HierarchyError::MissingRoot),
        [root] => Ok(*root),
        many => Err(HierarchyError::AmbiguousRoot {
            roots: many
                .iter()
                .filter_map(|&i| store.get(i).map(|n| n.id.clone()))
                .collect(),
        }),
    }
}

fn assign_depths(store: &NodeStore, root: NodeIndex) -> (Vec<u32>, Vec<NodeIndex>, u32) {
    let mut depth = vec![UNREACHED; store.len()];
    let mut order = Vec::with_capacity(store.len());
    let mut queue = VecDeque::new();
    let mut max_depth = 0;

    depth[root] = 0;
    queue.push_back(root);
    while let Some(i) = queue.pop_front() {
        order.push(i);
        let next = depth[i] + 1;
        for &c in store.children(i) {
            if depth[c] == UNREACHED {
                depth[c] = next;
                max_depth = max_depth.max(next);
                queue.push_back(c);
            }
        }
    }
    (depth, order, max_depth)
}

/// Find a node on a parent cycle among `candidates`, in linear time overall
fn find_cycle(store: &NodeStore, candidates: &[NodeIndex]) -> Option<NodeIndex> {
    const FRESH: u8 = 0;
    const ON_PATH: u8 = 1;
    const DONE: u8 = 2;

    let mut state = vec![FRESH; store.len()];
    let mut path = Vec::new();

    for &start in candidates {
        if state[start] != FRESH {
            continue;
        }
        path.clear();
        let mut current = Some(start);
        while let Some(i) = current {
            match state[i] {
                ON_PATH => return Some(i),
                DONE => break,
                _ => {
                    state[i] = ON_PATH;
                    path.push(i);
                    current = store.get(i).and_then(|n| n.parent());
                }
            }
        }
        for &i in &path {
            state[i] = DONE;
        }
    }
    None
}

fn post_order(store: &NodeStore, root: NodeIndex) -> Vec<NodeIndex> {
    let mut order = Vec::with_capacity(store.len());
    let mut stack = vec![(root, false)];

    while let Some((i, expanded)) = stack.pop() {
        if expanded {
            order.push(i);
            continue;
        }
        stack.push((i, true));
        for &c in store.children(i).iter().rev() {
            stack.push((c, false));
        }
    }
    order
}

fn select_heroes(
    store: &NodeStore,
    root: NodeIndex,
    subtree_size: &[u32],
    hero_count: usize,
) -> Vec<NodeIndex> {
    let mut candidates: Vec<NodeIndex> = store
        .children(root)
        .iter()
        .copied()
        .filter(|&c| !store.children(c).is_empty())
        .collect();
    // Ties fall back to input (arena) order
    candidates.sort_by_key(|&c| (Reverse(subtree_size[c]), c));

    let mut heroes = Vec::with_capacity(hero_count + 1);
    heroes.push(root);
    heroes.extend(candidates.into_iter().take(hero_count));
    heroes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::StructureRecord;
    use std::collections::HashMap;

    fn build(records: &[StructureRecord]) -> (NodeStore, HierarchyResult<TreeIndices>) {
        let mut store = NodeStore::from_records(records).unwrap();
        let indices = TreeIndices::build(&mut store, DEFAULT_HERO_COUNT);
        (store, indices)
    }

    fn family() -> Vec<StructureRecord> {
        vec![
            StructureRecord::root("r"),
            StructureRecord::child("a", "r", 0),
            StructureRecord::child("b", "r", 1),
            StructureRecord::child("a1", "a", 0),
            StructureRecord::child("a2", "a", 1),
            StructureRecord::child("b1", "b", 0),
            StructureRecord::child("c", "r", 2),
        ]
    }

    #[test]
    fn test_depth_and_subtree_size() {
        let (store, indices) = build(&family());
        let indices = indices.unwrap();
        let idx = |id: &str| store.index_of(&id.into()).unwrap();

        assert_eq!(indices.depth(idx("r")), Some(0));
        assert_eq!(indices.depth(idx("a2")), Some(2));
        assert_eq!(indices.subtree_size(idx("r")), 7);
        assert_eq!(indices.subtree_size(idx("a")), 3);
        assert_eq!(indices.subtree_size(idx("c")), 1);
        assert_eq!(indices.max_depth(), 2);
        assert_eq!(indices.bfs_order()[0], idx("r"));
        assert_eq!(*indices.post_order().last().unwrap(), idx("r"));
    }

    #[test]
    fn test_heroes_skip_leaves_and_rank_by_size() {
        let (store, indices) = build(&family());
        let heroes: Vec<_> = indices
            .unwrap()
            .heroes()
            .iter()
            .map(|&i| store.get(i).unwrap().id.to_string())
            .collect();
        assert_eq!(heroes, vec!["r", "a", "b"]);
    }

    #[test]
    fn test_hero_ties_use_input_order() {
        let records = vec![
            StructureRecord::root("r"),
            StructureRecord::child("x", "r", 0),
            StructureRecord::child("y", "r", 1),
            StructureRecord::child("z", "r", 2),
            StructureRecord::child("x1", "x", 0),
            StructureRecord::child("y1", "y", 0),
            StructureRecord::child("z1", "z", 0),
        ];
        let (store, indices) = build(&records);
        let heroes: Vec<_> = indices
            .unwrap()
            .heroes()
            .iter()
            .map(|&i| store.get(i).unwrap().id.to_string())
            .collect();
        assert_eq!(heroes, vec!["r", "x", "y"]);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let records = vec![
            StructureRecord::child("a", "b", 0),
            StructureRecord::child("b", "a", 0),
        ];
        let (_, indices) = build(&records);
        assert_eq!(indices.unwrap_err(), HierarchyError::MissingRoot);
    }

    #[test]
    fn test_ambiguous_root_is_fatal() {
        let records = vec![StructureRecord::root("a"), StructureRecord::root("b")];
        let (_, indices) = build(&records);
        assert!(matches!(
            indices.unwrap_err(),
            HierarchyError::AmbiguousRoot { roots } if roots.len() == 2
        ));
    }

    #[test]
    fn test_cycle_detached_from_root_is_fatal() {
        let records = vec![
            StructureRecord::root("r"),
            StructureRecord::child("a", "r", 0),
            StructureRecord::child("x", "y", 0),
            StructureRecord::child("y", "x", 0),
        ];
        let (_, indices) = build(&records);
        assert!(matches!(
            indices.unwrap_err(),
            HierarchyError::CycleDetected { .. }
        ));
    }

    #[test]
    fn test_orphans_are_skipped_not_fatal() {
        let records = vec![
            StructureRecord::root("r"),
            StructureRecord::child("a", "r", 0),
            StructureRecord::child("lost", "ghost", 0),
            StructureRecord::child("lost-child", "lost", 0),
        ];
        let (store, indices) = build(&records);
        let indices = indices.unwrap();
        assert_eq!(indices.unreachable().len(), 2);
        assert_eq!(indices.reachable_count(), 2);
        assert_eq!(indices.depth(store.index_of(&"lost".into()).unwrap()), None);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let depth = 200_000;
        let mut records = vec![StructureRecord::root("n0")];
        for i in 1..depth {
            records.push(StructureRecord::child(
                format!("n{i}"),
                format!("n{}", i - 1),
                0,
            ));
        }
        let (store, indices) = build(&records);
        let indices = indices.unwrap();
        assert_eq!(indices.subtree_size(indices.root()), depth as u32);
        assert_eq!(indices.max_depth(), depth as u32 - 1);
        let leaf = store.index_of(&format!("n{}", depth - 1).into()).unwrap();
        assert_eq!(path_to_root(&store, leaf).unwrap().len(), depth);
    }

    #[test]
    fn test_centroid_weighted_by_count() {
        let (mut store, indices) = build(&family());
        let mut indices = indices.unwrap();
        let positions: HashMap<_, _> = [
            ("r", (0.0, 0.0)),
            ("a", (-100.0, 100.0)),
            ("b", (100.0, 100.0)),
            ("a1", (-150.0, 200.0)),
            ("a2", (-50.0, 200.0)),
            ("b1", (100.0, 200.0)),
            ("c", (300.0, 100.0)),
        ]
        .into_iter()
        .map(|(id, (x, y))| (id.into(), Position2D::new(x, y)))
        .collect();
        store.apply_positions(&positions);
        indices.compute_centroids(&store);

        let idx = |id: &str| store.index_of(&id.into()).unwrap();
        assert_eq!(indices.centroid(idx("a1")), Some(Position2D::new(-150.0, 200.0)));
        assert_eq!(indices.centroid(idx("a")), Some(Position2D::new(-100.0, 500.0 / 3.0)));
        let root = indices.centroid(idx("r")).unwrap();
        assert!((root.x - 200.0 / 7.0).abs() < 1e-9);
        assert!((root.y - 900.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_unplaced_nodes_have_no_centroid() {
        let (store, indices) = build(&family());
        assert_eq!(indices.unwrap().centroid(store.index_of(&"r".into()).unwrap()), None);
    }
}
