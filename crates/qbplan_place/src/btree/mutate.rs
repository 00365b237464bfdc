//! Local-search operators on a placement tree.
//!
//! Every operator addresses modules by id and fails with
//! [`PlaceError::ModuleNotFound`] rather than touching a stale slot. Each
//! leaves a single rooted tree behind.

use super::{Detached, NodeIdx, PlacementTree, TreeNode};
use crate::error::{PlaceError, PlaceResult};
use qbplan_common::ModuleId;
use rand::Rng;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

impl PlacementTree {
    fn links(&self, idx: NodeIdx) -> PlaceResult<(Option<NodeIdx>, Option<NodeIdx>, Option<NodeIdx>)> {
        let n = self.get(idx)?;
        Ok((n.parent, n.left, n.right))
    }

    fn set_parent(&mut self, idx: Option<NodeIdx>, parent: Option<NodeIdx>) -> PlaceResult<()> {
        if let Some(idx) = idx {
            self.get_mut(idx)?.parent = parent;
        }
        Ok(())
    }

    fn set_child(&mut self, idx: NodeIdx, side: Side, child: Option<NodeIdx>) -> PlaceResult<()> {
        let node = self.get_mut(idx)?;
        match side {
            Side::Left => node.left = child,
            Side::Right => node.right = child,
        }
        Ok(())
    }

    /// Points whatever referenced `old` from `parent` (or the root pointer) at `new`.
    fn replace_child(&mut self, parent: Option<NodeIdx>, old: NodeIdx, new: Option<NodeIdx>) -> PlaceResult<()> {
        let Some(p) = parent else {
            self.root = new;
            return Ok(());
        };
        let node = self.get_mut(p)?;
        if node.left == Some(old) {
            node.left = new;
        } else if node.right == Some(old) {
            node.right = new;
        } else {
            return Err(PlaceError::structural(format!(
                "slot {old} is not a child of its parent {p}"
            )));
        }
        Ok(())
    }

    /// Toggles the rotation of `module`, and its flip when `flip` is set.
    pub fn rotate(&mut self, module: ModuleId, flip: bool) -> PlaceResult<()> {
        let idx = self.node_of(module)?;
        let node = self.get_mut(idx)?;
        node.rotate = !node.rotate;
        if flip {
            node.flip = !node.flip;
        }
        Ok(())
    }

    /// Exchanges the tree positions of two modules by relinking.
    pub fn swap(&mut self, a: ModuleId, b: ModuleId) -> PlaceResult<()> {
        let a = self.node_of(a)?;
        let b = self.node_of(b)?;
        self.swap_nodes(a, b)
    }

    fn swap_nodes(&mut self, a: NodeIdx, b: NodeIdx) -> PlaceResult<()> {
        if a == b {
            return Ok(());
        }
        let (pa, la, ra) = self.links(a)?;
        let (pb, lb, rb) = self.links(b)?;
        if pb == Some(a) {
            return self.swap_with_child(a, b);
        }
        if pa == Some(b) {
            return self.swap_with_child(b, a);
        }

        if pa.is_some() && pa == pb {
            // Siblings: exchange the parent's two slots.
            if let Some(p) = pa {
                let node = self.get_mut(p)?;
                std::mem::swap(&mut node.left, &mut node.right);
            }
        } else {
            self.replace_child(pa, a, Some(b))?;
            self.replace_child(pb, b, Some(a))?;
        }

        {
            let node = self.get_mut(a)?;
            node.parent = pb;
            node.left = lb;
            node.right = rb;
        }
        {
            let node = self.get_mut(b)?;
            node.parent = pa;
            node.left = la;
            node.right = ra;
        }
        for child in [lb, rb] {
            self.set_parent(child, Some(a))?;
        }
        for child in [la, ra] {
            self.set_parent(child, Some(b))?;
        }
        Ok(())
    }

    /// Swaps `parent` with its direct `child` in one relink.
    fn swap_with_child(&mut self, parent: NodeIdx, child: NodeIdx) -> PlaceResult<()> {
        let (grand, pl, pr) = self.links(parent)?;
        let (_, cl, cr) = self.links(child)?;
        let side = if pl == Some(child) { Side::Left } else { Side::Right };

        self.replace_child(grand, parent, Some(child))?;
        {
            let node = self.get_mut(child)?;
            node.parent = grand;
            match side {
                Side::Left => {
                    node.left = Some(parent);
                    node.right = pr;
                }
                Side::Right => {
                    node.left = pl;
                    node.right = Some(parent);
                }
            }
        }
        let sibling = match side {
            Side::Left => pr,
            Side::Right => pl,
        };
        self.set_parent(sibling, Some(child))?;
        {
            let node = self.get_mut(parent)?;
            node.parent = Some(child);
            node.left = cl;
            node.right = cr;
        }
        self.set_parent(cl, Some(parent))?;
        self.set_parent(cr, Some(parent))?;
        Ok(())
    }

    /// Hangs `subtree` on the first open child slot found walking down from
    /// `start`, choosing a random branch whenever both slots are taken.
    fn graft<R: Rng + ?Sized>(&mut self, start: NodeIdx, subtree: NodeIdx, rng: &mut R) -> PlaceResult<()> {
        let mut cursor = start;
        loop {
            let (_, left, right) = self.links(cursor)?;
            match (left, right) {
                (None, _) => {
                    self.set_child(cursor, Side::Left, Some(subtree))?;
                    break;
                }
                (Some(_), None) => {
                    self.set_child(cursor, Side::Right, Some(subtree))?;
                    break;
                }
                (Some(l), Some(r)) => cursor = if rng.gen_bool(0.5) { l } else { r },
            }
        }
        self.set_parent(Some(subtree), Some(cursor))
    }

    /// Removes `module` from the tree and returns its payload.
    ///
    /// An internal node is replaced by one of its children. When both exist
    /// a random one is promoted; the promoted child's inner subtree, displaced
    /// by the other child, is re-grafted below that other child.
    pub fn remove<R: Rng + ?Sized>(&mut self, module: ModuleId, rng: &mut R) -> PlaceResult<Detached> {
        let idx = self.node_of(module)?;
        let (parent, left, right) = self.links(idx)?;

        let promoted = match (left, right) {
            (None, None) => None,
            (Some(only), None) | (None, Some(only)) => Some(only),
            (Some(l), Some(r)) => {
                let (keep, other, side) = if rng.gen_bool(0.5) {
                    (l, r, Side::Right)
                } else {
                    (r, l, Side::Left)
                };
                let displaced = {
                    let node = self.get(keep)?;
                    match side {
                        Side::Right => node.right,
                        Side::Left => node.left,
                    }
                };
                self.set_child(keep, side, Some(other))?;
                self.set_parent(Some(other), Some(keep))?;
                if let Some(sub) = displaced {
                    self.graft(other, sub, rng)?;
                }
                Some(keep)
            }
        };

        self.set_parent(promoted, parent)?;
        self.replace_child(parent, idx, promoted)?;
        Ok(self.release(idx)?.detach())
    }

    /// Inserts `node` as a child of `parent` on a random side; the parent's
    /// previous child on that side becomes the new node's child on the same side.
    pub fn insert_under<R: Rng + ?Sized>(&mut self, parent: ModuleId, node: Detached, rng: &mut R) -> PlaceResult<()> {
        if self.contains(node.module) {
            return Err(PlaceError::structural(format!(
                "m{} is already in the tree",
                node.module
            )));
        }
        let p = self.node_of(parent)?;
        let side = if rng.gen_bool(0.5) { Side::Left } else { Side::Right };
        let previous = {
            let pn = self.get(p)?;
            match side {
                Side::Left => pn.left,
                Side::Right => pn.right,
            }
        };
        let mut fresh = TreeNode::from_detached(node, Some(p));
        match side {
            Side::Left => fresh.left = previous,
            Side::Right => fresh.right = previous,
        }
        let idx = self.alloc(fresh);
        self.set_child(p, side, Some(idx))?;
        self.set_parent(previous, Some(idx))
    }

    /// Inserts `node` below a random live node, or as the root of an empty tree.
    pub fn insert_random<R: Rng + ?Sized>(&mut self, node: Detached, rng: &mut R) -> PlaceResult<()> {
        if self.is_empty() {
            if self.contains(node.module) {
                return Err(PlaceError::structural("empty tree indexes a module"));
            }
            let idx = self.alloc(TreeNode::from_detached(node, None));
            self.root = Some(idx);
            return Ok(());
        }
        let modules = self.modules();
        let parent = modules[rng.gen_range(0..modules.len())];
        self.insert_under(parent, node, rng)
    }

    /// Moves `module` to become a child of `parent`.
    pub fn move_under<R: Rng + ?Sized>(&mut self, module: ModuleId, parent: ModuleId, rng: &mut R) -> PlaceResult<()> {
        if module == parent {
            return Err(PlaceError::structural(format!(
                "m{module} cannot be moved under itself"
            )));
        }
        self.node_of(parent)?;
        let node = self.remove(module, rng)?;
        self.insert_under(parent, node, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn m(i: u32) -> ModuleId {
        ModuleId::from_raw(i)
    }

    fn tree(n: u32) -> PlacementTree {
        PlacementTree::from_modules((0..n).map(|i| Detached::new(m(i)))).unwrap()
    }

    fn parent_module(t: &PlacementTree, module: u32) -> Option<u32> {
        let node = t.node_for(m(module)).unwrap();
        node.parent().map(|p| t.node(p).unwrap().module.as_raw())
    }

    #[test]
    fn rotate_toggles_flags() {
        let mut t = tree(2);
        t.rotate(m(1), true).unwrap();
        let node = t.node_for(m(1)).unwrap();
        assert!(node.rotate && node.flip);
        t.rotate(m(1), false).unwrap();
        let node = t.node_for(m(1)).unwrap();
        assert!(!node.rotate && node.flip);
    }

    #[test]
    fn swap_with_root() {
        let mut t = tree(5);
        t.swap(m(0), m(3)).unwrap();
        t.check_invariants().unwrap();
        assert_eq!(t.node(t.root().unwrap()).unwrap().module, m(3));
        assert_eq!(parent_module(&t, 0), Some(1));
        assert_eq!(t.modules(), vec![m(3), m(1), m(0), m(4), m(2)]);
    }

    #[test]
    fn swap_parent_and_left_child() {
        let mut t = tree(5);
        t.swap(m(1), m(3)).unwrap();
        t.check_invariants().unwrap();
        assert_eq!(parent_module(&t, 1), Some(3));
        assert_eq!(parent_module(&t, 3), Some(0));
        assert_eq!(parent_module(&t, 4), Some(3));
        assert_eq!(t.modules(), vec![m(0), m(3), m(1), m(4), m(2)]);
    }

    #[test]
    fn swap_root_and_right_child() {
        let mut t = tree(3);
        t.swap(m(2), m(0)).unwrap();
        t.check_invariants().unwrap();
        assert_eq!(t.node(t.root().unwrap()).unwrap().module, m(2));
        assert_eq!(parent_module(&t, 1), Some(2));
        assert_eq!(parent_module(&t, 0), Some(2));
        assert_eq!(t.modules(), vec![m(2), m(1), m(0)]);
    }

    #[test]
    fn swap_siblings() {
        let mut t = tree(3);
        t.swap(m(1), m(2)).unwrap();
        t.check_invariants().unwrap();
        assert_eq!(t.modules(), vec![m(0), m(2), m(1)]);
    }

    #[test]
    fn swap_unknown_module() {
        let mut t = tree(3);
        assert!(matches!(
            t.swap(m(0), m(7)),
            Err(PlaceError::ModuleNotFound { module }) if module == m(7)
        ));
        t.check_invariants().unwrap();
    }

    #[test]
    fn remove_leaf_and_root() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut t = tree(5);
        let d = t.remove(m(4), &mut rng).unwrap();
        assert_eq!(d.module, m(4));
        t.check_invariants().unwrap();
        t.remove(m(0), &mut rng).unwrap();
        t.check_invariants().unwrap();
        assert_eq!(t.len(), 3);
        assert!(!t.contains(m(0)));
    }

    #[test]
    fn remove_internal_keeps_every_node() {
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut t = tree(15);
            t.remove(m(1), &mut rng).unwrap();
            t.check_invariants().unwrap();
            assert_eq!(t.preorder().len(), 14);
        }
    }

    #[test]
    fn remove_unknown_module() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut t = tree(2);
        assert!(t.remove(m(3), &mut rng).unwrap_err().is_structural());
    }

    #[test]
    fn insert_pushes_previous_child_down() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut t = tree(3);
        let before = t.node_for(m(0)).map(|n| (n.left(), n.right())).unwrap();
        t.insert_under(m(0), Detached::new(m(9)), &mut rng).unwrap();
        t.check_invariants().unwrap();
        assert_eq!(parent_module(&t, 9), Some(0));
        let new = t.node_for(m(9)).unwrap();
        let pushed = new.left().or(new.right()).unwrap();
        let pushed_module = t.node(pushed).unwrap().module;
        assert!(before.0.is_some() && before.1.is_some());
        assert!(pushed_module == m(1) || pushed_module == m(2));
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn insert_duplicate_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut t = tree(3);
        assert!(t.insert_under(m(0), Detached::new(m(2)), &mut rng).is_err());
    }

    #[test]
    fn insert_random_into_empty_tree_makes_root() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut t = PlacementTree::new();
        t.insert_random(Detached::new(m(4)), &mut rng).unwrap();
        assert_eq!(t.modules(), vec![m(4)]);
        t.check_invariants().unwrap();
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut t = tree(4);
        let slot = t.node_of(m(3)).unwrap();
        let d = t.remove(m(3), &mut rng).unwrap();
        t.insert_under(m(0), d, &mut rng).unwrap();
        assert_eq!(t.node_of(m(3)).unwrap(), slot);
        assert_eq!(t.capacity(), 4);
    }

    #[test]
    fn random_surgery_preserves_invariants() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut t = tree(20);
        for step in 0..2000 {
            let modules = t.modules();
            let a = modules[rng.gen_range(0..modules.len())];
            let b = modules[rng.gen_range(0..modules.len())];
            match step % 3 {
                0 => t.swap(a, b).unwrap(),
                1 if a != b => t.move_under(a, b, &mut rng).unwrap(),
                _ => t.rotate(a, true).unwrap(),
            }
            t.check_invariants().unwrap();
            let mut seen = t.modules();
            seen.sort();
            assert_eq!(seen, (0..20).map(m).collect::<Vec<_>>());
        }
    }
}
