//! Flattened, self-contained copies of a placement tree.

use super::{NodeIdx, PlacementTree, TreeNode};
use crate::error::{PlaceError, PlaceResult};
use qbplan_common::ModuleId;
use serde::{Deserialize, Serialize};

/// One node of a [`TreeSnapshot`], linked by position in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// The placed module.
    pub module: ModuleId,
    /// Rotation flag.
    pub rotate: bool,
    /// Flip flag.
    pub flip: bool,
    /// Forced ratio, if any.
    pub ratio: Option<f64>,
    /// Position of the parent in the snapshot.
    pub parent: Option<u32>,
    /// Position of the left child in the snapshot.
    pub left: Option<u32>,
    /// Position of the right child in the snapshot.
    pub right: Option<u32>,
}

/// A deep copy of a placement tree plus the cost it was kept at.
///
/// Nodes are stored in pre-order, so the root (if any) is at position 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    /// Nodes in pre-order.
    pub nodes: Vec<SnapshotNode>,
    /// Cost recorded when the snapshot was taken.
    pub cost: f64,
}

impl TreeSnapshot {
    /// Modules held by the snapshot, in pre-order.
    pub fn modules(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.nodes.iter().map(|n| n.module)
    }
}

impl PlacementTree {
    /// Copies every live node into a compact pre-order array.
    pub fn snapshot(&self, cost: f64) -> TreeSnapshot {
        let order = self.preorder();
        let mut position = vec![None; self.capacity()];
        for (i, idx) in order.iter().enumerate() {
            position[idx.index()] = Some(i as u32);
        }
        let at = |idx: Option<NodeIdx>| idx.and_then(|i| position.get(i.index()).copied().flatten());

        let nodes = order
            .iter()
            .filter_map(|&idx| self.node(idx))
            .map(|n| SnapshotNode {
                module: n.module,
                rotate: n.rotate,
                flip: n.flip,
                ratio: n.ratio,
                parent: at(n.parent),
                left: at(n.left),
                right: at(n.right),
            })
            .collect();
        TreeSnapshot { nodes, cost }
    }

    /// Rebuilds an independent tree from a snapshot.
    ///
    /// Links that point outside the snapshot, duplicate modules, or a shape
    /// that is not a single rooted tree are rejected.
    pub fn restore(snapshot: &TreeSnapshot) -> PlaceResult<Self> {
        let n = snapshot.nodes.len();
        let link = |pos: Option<u32>| -> PlaceResult<Option<NodeIdx>> {
            match pos {
                Some(p) if p as usize >= n => Err(PlaceError::structural(format!(
                    "snapshot link {p} outside {n} nodes"
                ))),
                p => Ok(p.map(NodeIdx::from_raw)),
            }
        };

        let mut tree = Self::new();
        for (i, s) in snapshot.nodes.iter().enumerate() {
            let idx = NodeIdx::from_raw(i as u32);
            if tree.index.insert(s.module, idx).is_some() {
                return Err(PlaceError::structural(format!(
                    "snapshot lists m{} twice",
                    s.module
                )));
            }
            tree.slots.push(Some(TreeNode {
                module: s.module,
                rotate: s.rotate,
                flip: s.flip,
                ratio: s.ratio,
                parent: link(s.parent)?,
                left: link(s.left)?,
                right: link(s.right)?,
            }));
        }
        tree.root = (n > 0).then(|| NodeIdx::from_raw(0));
        tree.check_invariants()?;
        Ok(tree)
    }
}
