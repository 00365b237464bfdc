//! B*-tree encoding of relative module placement.
//!
//! Every node owns one module. A node's left child abuts immediately to its
//! right; its right child sits immediately above it at the same x origin.
//! Nodes live in an arena addressed by [`NodeIdx`]; parent and child links
//! are indices, and deleting a node frees its slot for reuse. Traversals use
//! an explicit work list so tree depth never touches the call stack.

mod contour;
mod mutate;
mod pack;
mod snapshot;

pub use contour::{Contour, ContourLink, Segment};
pub use pack::{PackRules, PackedModule, Packing};
pub use snapshot::{SnapshotNode, TreeSnapshot};

use crate::error::{PlaceError, PlaceResult};
use qbplan_common::ModuleId;
use std::collections::HashMap;

qbplan_common::define_id!(
    /// Index of a node slot in a [`PlacementTree`] arena.
    NodeIdx
);

/// The per-module payload of a node, detached from any tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Detached {
    /// The module this node places.
    pub module: ModuleId,
    /// Width and height are swapped when set.
    pub rotate: bool,
    /// Pins are mirrored horizontally when set.
    pub flip: bool,
    /// Forced height-to-width ratio from a variant constraint.
    pub ratio: Option<f64>,
}

impl Detached {
    /// An unrotated, unflipped payload with no forced ratio.
    pub fn new(module: ModuleId) -> Self {
        Self {
            module,
            rotate: false,
            flip: false,
            ratio: None,
        }
    }
}

/// A live node of a [`PlacementTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// The module this node places.
    pub module: ModuleId,
    /// Width and height are swapped when set.
    pub rotate: bool,
    /// Pins are mirrored horizontally when set.
    pub flip: bool,
    /// Forced height-to-width ratio from a variant constraint.
    pub ratio: Option<f64>,
    parent: Option<NodeIdx>,
    left: Option<NodeIdx>,
    right: Option<NodeIdx>,
}

impl TreeNode {
    fn from_detached(d: Detached, parent: Option<NodeIdx>) -> Self {
        Self {
            module: d.module,
            rotate: d.rotate,
            flip: d.flip,
            ratio: d.ratio,
            parent,
            left: None,
            right: None,
        }
    }

    fn detach(self) -> Detached {
        Detached {
            module: self.module,
            rotate: self.rotate,
            flip: self.flip,
            ratio: self.ratio,
        }
    }

    /// Parent slot, `None` for the root.
    pub fn parent(&self) -> Option<NodeIdx> {
        self.parent
    }

    /// Left child: the module abutting on the right.
    pub fn left(&self) -> Option<NodeIdx> {
        self.left
    }

    /// Right child: the module stacked above.
    pub fn right(&self) -> Option<NodeIdx> {
        self.right
    }
}

/// An arena-backed binary tree of modules.
///
/// Invariants: exactly one parentless node (the root) when non-empty, every
/// live node reachable from the root, no cycles, and `index` mapping each
/// owned module to its slot.
#[derive(Debug, Clone, Default)]
pub struct PlacementTree {
    slots: Vec<Option<TreeNode>>,
    free: Vec<NodeIdx>,
    root: Option<NodeIdx>,
    index: HashMap<ModuleId, NodeIdx>,
}

impl PlacementTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a complete binary tree in input order: node `i` has children
    /// `2i + 1` (left) and `2i + 2` (right).
    pub fn from_modules(nodes: impl IntoIterator<Item = Detached>) -> PlaceResult<Self> {
        let nodes: Vec<Detached> = nodes.into_iter().collect();
        let n = nodes.len();
        let mut tree = Self::new();
        for (i, d) in nodes.into_iter().enumerate() {
            if tree.index.contains_key(&d.module) {
                return Err(PlaceError::structural(format!(
                    "m{} listed twice",
                    d.module
                )));
            }
            let parent = (i > 0).then(|| NodeIdx::from_raw(((i - 1) / 2) as u32));
            let mut node = TreeNode::from_detached(d, parent);
            node.left = (2 * i + 1 < n).then(|| NodeIdx::from_raw((2 * i + 1) as u32));
            node.right = (2 * i + 2 < n).then(|| NodeIdx::from_raw((2 * i + 2) as u32));
            tree.index.insert(node.module, NodeIdx::from_raw(i as u32));
            tree.slots.push(Some(node));
        }
        tree.root = (n > 0).then(|| NodeIdx::from_raw(0));
        Ok(tree)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The root slot.
    pub fn root(&self) -> Option<NodeIdx> {
        self.root
    }

    /// Arena capacity, including freed slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The node in `idx`, if live.
    pub fn node(&self, idx: NodeIdx) -> Option<&TreeNode> {
        self.slots.get(idx.index()).and_then(Option::as_ref)
    }

    /// Returns `true` if `module` is owned by this tree.
    pub fn contains(&self, module: ModuleId) -> bool {
        self.index.contains_key(&module)
    }

    /// The slot owning `module`.
    pub fn node_of(&self, module: ModuleId) -> PlaceResult<NodeIdx> {
        self.index
            .get(&module)
            .copied()
            .ok_or(PlaceError::ModuleNotFound { module })
    }

    /// The node owning `module`.
    pub fn node_for(&self, module: ModuleId) -> PlaceResult<&TreeNode> {
        self.get(self.node_of(module)?)
    }

    pub(crate) fn get(&self, idx: NodeIdx) -> PlaceResult<&TreeNode> {
        self.node(idx)
            .ok_or_else(|| PlaceError::structural(format!("slot {idx} is not live")))
    }

    pub(crate) fn get_mut(&mut self, idx: NodeIdx) -> PlaceResult<&mut TreeNode> {
        self.slots
            .get_mut(idx.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| PlaceError::structural(format!("slot {idx} is not live")))
    }

    fn alloc(&mut self, node: TreeNode) -> NodeIdx {
        let module = node.module;
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx.index()] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                NodeIdx::from_raw((self.slots.len() - 1) as u32)
            }
        };
        self.index.insert(module, idx);
        idx
    }

    fn release(&mut self, idx: NodeIdx) -> PlaceResult<TreeNode> {
        let node = self
            .slots
            .get_mut(idx.index())
            .and_then(Option::take)
            .ok_or_else(|| PlaceError::structural(format!("slot {idx} freed twice")))?;
        self.index.remove(&node.module);
        self.free.push(idx);
        Ok(node)
    }

    /// Live slots in pre-order (node, left subtree, right subtree).
    pub fn preorder(&self) -> Vec<NodeIdx> {
        let mut order = Vec::with_capacity(self.len());
        let mut stack: Vec<NodeIdx> = self.root.into_iter().collect();
        while let Some(idx) = stack.pop() {
            let Some(node) = self.node(idx) else { continue };
            order.push(idx);
            stack.extend(node.right);
            stack.extend(node.left);
        }
        order
    }

    /// Owned modules in pre-order.
    pub fn modules(&self) -> Vec<ModuleId> {
        self.preorder()
            .into_iter()
            .filter_map(|idx| self.node(idx).map(|n| n.module))
            .collect()
    }

    /// Verifies root uniqueness, reachability, acyclicity, and the module index.
    pub fn check_invariants(&self) -> PlaceResult<()> {
        let live = self.slots.iter().filter(|s| s.is_some()).count();
        if live != self.index.len() {
            return Err(PlaceError::structural(format!(
                "{live} live slots but {} indexed modules",
                self.index.len()
            )));
        }
        let Some(root) = self.root else {
            return if live == 0 {
                Ok(())
            } else {
                Err(PlaceError::structural("live nodes without a root"))
            };
        };
        if self.get(root)?.parent.is_some() {
            return Err(PlaceError::structural("root has a parent"));
        }

        let mut seen = vec![false; self.slots.len()];
        let mut stack = vec![root];
        let mut visited = 0;
        while let Some(idx) = stack.pop() {
            if std::mem::replace(&mut seen[idx.index()], true) {
                return Err(PlaceError::structural(format!("slot {idx} reached twice")));
            }
            visited += 1;
            let node = self.get(idx)?;
            if self.index.get(&node.module) != Some(&idx) {
                return Err(PlaceError::structural(format!(
                    "index disagrees for m{}",
                    node.module
                )));
            }
            for child in [node.left, node.right].into_iter().flatten() {
                if self.get(child)?.parent != Some(idx) {
                    return Err(PlaceError::structural(format!(
                        "slot {child} does not point back to parent {idx}"
                    )));
                }
                stack.push(child);
            }
        }
        if visited != live {
            return Err(PlaceError::structural(format!(
                "{visited} of {live} nodes reachable from the root"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u32) -> Vec<Detached> {
        (0..n).map(|i| Detached::new(ModuleId::from_raw(i))).collect()
    }

    #[test]
    fn complete_tree_layout() {
        let tree = PlacementTree::from_modules(ids(5)).unwrap();
        assert_eq!(tree.len(), 5);
        let root = tree.root().unwrap();
        let node = tree.node(root).unwrap();
        assert_eq!(node.left(), Some(NodeIdx::from_raw(1)));
        assert_eq!(node.right(), Some(NodeIdx::from_raw(2)));
        let n1 = tree.node(NodeIdx::from_raw(1)).unwrap();
        assert_eq!(n1.left(), Some(NodeIdx::from_raw(3)));
        assert_eq!(n1.right(), Some(NodeIdx::from_raw(4)));
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn preorder_visits_left_before_right() {
        let tree = PlacementTree::from_modules(ids(5)).unwrap();
        let order: Vec<u32> = tree.modules().iter().map(|m| m.as_raw()).collect();
        assert_eq!(order, vec![0, 1, 3, 4, 2]);
    }

    #[test]
    fn empty_tree_is_valid() {
        let tree = PlacementTree::new();
        assert!(tree.is_empty());
        assert!(tree.root().is_none());
        assert!(tree.preorder().is_empty());
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn duplicate_module_rejected() {
        let mut nodes = ids(2);
        nodes.push(Detached::new(ModuleId::from_raw(0)));
        assert!(PlacementTree::from_modules(nodes).is_err());
    }

    #[test]
    fn unknown_module_not_found() {
        let tree = PlacementTree::from_modules(ids(2)).unwrap();
        let err = tree.node_of(ModuleId::from_raw(9)).unwrap_err();
        assert!(matches!(err, PlaceError::ModuleNotFound { .. }));
    }
}
