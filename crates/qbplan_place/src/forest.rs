//! One placement tree per hosting leaf, coordinated as a unit.
//!
//! The [`Forest`] owns every tree and a module-to-cell registry that each
//! mutator keeps current, so finding a module's tree is a single lookup.
//! Cross-tree moves are built from three primitives: detach from one tree
//! (dropping the tree once it is empty), attach into another (creating the
//! tree when the leaf had none), and the single-tree mutators.

use crate::btree::{Detached, PackRules, PlacementTree, TreeSnapshot};
use crate::data::Design;
use crate::error::{PlaceError, PlaceResult};
use crate::partition::{Orientation, QuadTree};
use qbplan_common::{CellId, ModuleId, Rect};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Absolute placement of one module after packing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulePlacement {
    /// The placed module.
    pub module: ModuleId,
    /// Absolute, normalized rectangle.
    pub rect: Rect,
    /// Effective rotation.
    pub rotate: bool,
    /// Horizontal pin mirroring requested by the tree node.
    pub flip: bool,
    /// Hosting leaf.
    pub cell: CellId,
    /// How the hosting tree maps into the leaf.
    pub orientation: Orientation,
}

/// Bounding size of one packed tree in its own coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeExtent {
    /// Hosting leaf.
    pub cell: CellId,
    /// Largest local right edge.
    pub width: i64,
    /// Largest local top edge.
    pub height: i64,
}

/// Result of packing every tree of a forest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Layout {
    modules: Vec<Option<ModulePlacement>>,
    extents: Vec<TreeExtent>,
}

impl Layout {
    /// Placement of `module`, if it has been packed.
    pub fn placement(&self, module: ModuleId) -> Option<&ModulePlacement> {
        self.modules.get(module.index()).and_then(Option::as_ref)
    }

    /// Rectangle of `module`, failing if it was never packed.
    pub fn rect(&self, module: ModuleId) -> PlaceResult<Rect> {
        self.placement(module)
            .map(|p| p.rect)
            .ok_or(PlaceError::ModuleNotFound { module })
    }

    /// All placements in module order.
    pub fn placements(&self) -> impl Iterator<Item = &ModulePlacement> + '_ {
        self.modules.iter().flatten()
    }

    /// Per-tree extents in cell order.
    pub fn extents(&self) -> &[TreeExtent] {
        &self.extents
    }

    /// Smallest rectangle covering every placed module.
    pub fn bounding_box(&self) -> Option<Rect> {
        self.placements().map(|p| p.rect).reduce(|a, b| a.union(&b))
    }
}

/// Deep copy of every tree of a forest plus the recorded cost.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ForestSnapshot {
    /// Hosting cell and flattened tree, in cell order.
    pub trees: Vec<(CellId, TreeSnapshot)>,
    /// Cost recorded at the time of the snapshot.
    pub cost: f64,
}

/// The multi-tree placement state.
#[derive(Clone, Debug)]
pub struct Forest {
    partition: QuadTree,
    trees: Vec<Option<PlacementTree>>,
    owner: HashMap<ModuleId, CellId>,
    modules: Vec<ModuleId>,
    layout: Layout,
}

impl Forest {
    /// Places every module in one tree hosted by the largest free leaf.
    pub fn new<R: Rng + ?Sized>(partition: QuadTree, nodes: Vec<Detached>, rng: &mut R) -> PlaceResult<Self> {
        let mut modules: Vec<ModuleId> = nodes.iter().map(|d| d.module).collect();
        modules.sort();
        let mut forest = Self {
            trees: vec![None; partition.len()],
            partition,
            owner: HashMap::new(),
            modules,
            layout: Layout::default(),
        };
        if nodes.is_empty() {
            return Ok(forest);
        }
        let leaf = forest
            .partition
            .largest_leaf(rng)
            .ok_or_else(|| PlaceError::malformed("no free leaf can host the modules"))?;
        let tree = PlacementTree::from_modules(nodes)?;
        for module in tree.modules() {
            forest.owner.insert(module, leaf);
        }
        forest.trees[leaf.index()] = Some(tree);
        Ok(forest)
    }

    /// The partition the trees live in.
    pub fn partition(&self) -> &QuadTree {
        &self.partition
    }

    /// Modules owned by the forest, in id order.
    pub fn modules(&self) -> &[ModuleId] {
        &self.modules
    }

    /// The leaf hosting `module`.
    pub fn owner(&self, module: ModuleId) -> PlaceResult<CellId> {
        self.owner
            .get(&module)
            .copied()
            .ok_or(PlaceError::ModuleNotFound { module })
    }

    /// The tree hosted by `cell`.
    pub fn tree(&self, cell: CellId) -> Option<&PlacementTree> {
        self.trees.get(cell.index()).and_then(Option::as_ref)
    }

    fn tree_mut(&mut self, cell: CellId) -> PlaceResult<&mut PlacementTree> {
        self.trees
            .get_mut(cell.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| PlaceError::structural(format!("cell {cell} hosts no tree")))
    }

    /// Live trees in cell order.
    pub fn trees(&self) -> impl Iterator<Item = (CellId, &PlacementTree)> + '_ {
        self.trees
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (CellId::from_raw(i as u32), t)))
    }

    /// Hosting leaves that currently have no tree.
    pub fn empty_leaves(&self) -> Vec<CellId> {
        self.partition
            .hosting_leaves()
            .filter(|c| self.tree(c.id).is_none())
            .map(|c| c.id)
            .collect()
    }

    /// The most recent packing.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// A uniformly chosen module, `None` when the forest is empty.
    pub fn random_module<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ModuleId> {
        if self.modules.is_empty() {
            return None;
        }
        Some(self.modules[rng.gen_range(0..self.modules.len())])
    }

    fn detach<R: Rng + ?Sized>(&mut self, module: ModuleId, rng: &mut R) -> PlaceResult<(CellId, Detached)> {
        let cell = self.owner(module)?;
        let tree = self.tree_mut(cell)?;
        let node = tree.remove(module, rng)?;
        if tree.is_empty() {
            self.trees[cell.index()] = None;
        }
        self.owner.remove(&module);
        Ok((cell, node))
    }

    fn attach<R: Rng + ?Sized>(
        &mut self,
        cell: CellId,
        parent: Option<ModuleId>,
        node: Detached,
        rng: &mut R,
    ) -> PlaceResult<()> {
        let hosts = self.partition.cell(cell).is_some_and(|c| c.hosts_tree());
        if !hosts {
            return Err(PlaceError::structural(format!(
                "cell {cell} cannot host a tree"
            )));
        }
        let module = node.module;
        let tree = self.trees[cell.index()].get_or_insert_with(PlacementTree::new);
        match parent {
            Some(parent) => tree.insert_under(parent, node, rng)?,
            None => tree.insert_random(node, rng)?,
        }
        self.owner.insert(module, cell);
        Ok(())
    }

    /// Runs a cross-tree edit touching `cells` and the owners of `moved`,
    /// putting both back as they were if the edit fails part way.
    fn rollback_on_error<F>(&mut self, cells: &[CellId], moved: &[ModuleId], edit: F) -> PlaceResult<()>
    where
        F: FnOnce(&mut Self) -> PlaceResult<()>,
    {
        let trees: Vec<(CellId, Option<PlacementTree>)> = cells
            .iter()
            .map(|&c| (c, self.trees.get(c.index()).cloned().flatten()))
            .collect();
        let owners: Vec<(ModuleId, Option<CellId>)> =
            moved.iter().map(|&m| (m, self.owner.get(&m).copied())).collect();
        let result = edit(self);
        if result.is_err() {
            for (cell, tree) in trees {
                if let Some(slot) = self.trees.get_mut(cell.index()) {
                    *slot = tree;
                }
            }
            for (module, cell) in owners {
                match cell {
                    Some(cell) => self.owner.insert(module, cell),
                    None => self.owner.remove(&module),
                };
            }
        }
        result
    }

    /// Toggles the rotation (and optionally the flip) of `module`.
    pub fn rotate(&mut self, module: ModuleId, flip: bool) -> PlaceResult<()> {
        let cell = self.owner(module)?;
        self.tree_mut(cell)?.rotate(module, flip)
    }

    /// Exchanges two modules, within one tree or across two.
    pub fn swap<R: Rng + ?Sized>(&mut self, a: ModuleId, b: ModuleId, rng: &mut R) -> PlaceResult<()> {
        let ca = self.owner(a)?;
        let cb = self.owner(b)?;
        if ca == cb {
            self.tree_mut(ca)?.swap(a, b)
        } else {
            self.swap_between_trees(a, b, rng)
        }
    }

    /// Moves `a` into the tree of `b` and `b` into the tree of `a`.
    pub fn swap_between_trees<R: Rng + ?Sized>(&mut self, a: ModuleId, b: ModuleId, rng: &mut R) -> PlaceResult<()> {
        let ca = self.owner(a)?;
        let cb = self.owner(b)?;
        if ca == cb {
            return Err(PlaceError::structural(format!(
                "m{a} and m{b} already share cell {ca}"
            )));
        }
        self.rollback_on_error(&[ca, cb], &[a, b], |forest| {
            let (_, na) = forest.detach(a, rng)?;
            let (_, nb) = forest.detach(b, rng)?;
            forest.attach(ca, None, nb, rng)?;
            forest.attach(cb, None, na, rng)
        })
    }

    /// Makes `module` a child of `parent`, crossing trees if needed.
    pub fn move_under<R: Rng + ?Sized>(&mut self, module: ModuleId, parent: ModuleId, rng: &mut R) -> PlaceResult<()> {
        let from = self.owner(module)?;
        let to = self.owner(parent)?;
        if from == to {
            return self.tree_mut(from)?.move_under(module, parent, rng);
        }
        self.rollback_on_error(&[from, to], &[module], |forest| {
            let (_, node) = forest.detach(module, rng)?;
            forest.attach(to, Some(parent), node, rng)
        })
    }

    /// Moves `module` into `leaf`, creating the leaf's tree if it has none.
    ///
    /// Moving a module into the leaf that already hosts it does nothing.
    pub fn move_to_leaf<R: Rng + ?Sized>(&mut self, module: ModuleId, leaf: CellId, rng: &mut R) -> PlaceResult<()> {
        if self.owner(module)? == leaf {
            return Ok(());
        }
        let hosts = self.partition.cell(leaf).is_some_and(|c| c.hosts_tree());
        if !hosts {
            return Err(PlaceError::structural(format!(
                "cell {leaf} cannot host a tree"
            )));
        }
        let from = self.owner(module)?;
        self.rollback_on_error(&[from, leaf], &[module], |forest| {
            let (_, node) = forest.detach(module, rng)?;
            forest.attach(leaf, None, node, rng)
        })
    }

    /// Packs every tree and maps the result into absolute coordinates.
    pub fn pack(&mut self, design: &Design, rules: &PackRules) -> PlaceResult<()> {
        let mut modules = vec![None; design.module_count()];
        let mut extents = Vec::new();
        for (cell, tree) in self.trees() {
            let orientation = self
                .partition
                .cell(cell)
                .map(|c| c.orientation())
                .ok_or_else(|| PlaceError::structural(format!("tree in unknown cell {cell}")))?;
            let packing = tree.pack(design, rules)?;
            for pm in &packing.modules {
                let slot = modules
                    .get_mut(pm.module.index())
                    .ok_or(PlaceError::ModuleNotFound { module: pm.module })?;
                *slot = Some(ModulePlacement {
                    module: pm.module,
                    rect: orientation.place(pm.rect()),
                    rotate: pm.rotate,
                    flip: pm.flip,
                    cell,
                    orientation,
                });
            }
            extents.push(TreeExtent {
                cell,
                width: packing.width,
                height: packing.height,
            });
        }
        self.layout = Layout { modules, extents };
        Ok(())
    }

    /// Copies every tree.
    pub fn snapshot(&self, cost: f64) -> ForestSnapshot {
        ForestSnapshot {
            trees: self
                .trees()
                .map(|(cell, tree)| (cell, tree.snapshot(cost)))
                .collect(),
            cost,
        }
    }

    /// Replaces every tree with the snapshot's; the layout is stale until
    /// the next [`Forest::pack`].
    ///
    /// The snapshot must hold exactly the forest's modules. On error the
    /// forest is left untouched.
    pub fn restore(&mut self, snapshot: &ForestSnapshot) -> PlaceResult<()> {
        let mut trees = vec![None; self.partition.len()];
        let mut owner = HashMap::with_capacity(self.modules.len());
        for (cell, snap) in &snapshot.trees {
            let slot = trees
                .get_mut(cell.index())
                .ok_or_else(|| PlaceError::structural(format!("snapshot names unknown cell {cell}")))?;
            let tree = PlacementTree::restore(snap)?;
            for module in tree.modules() {
                if owner.insert(module, *cell).is_some() {
                    return Err(PlaceError::structural(format!(
                        "snapshot places m{module} in two trees"
                    )));
                }
            }
            *slot = Some(tree);
        }
        if let Some(missing) = self.modules.iter().find(|m| !owner.contains_key(m)) {
            return Err(PlaceError::structural(format!(
                "snapshot leaves out m{missing}"
            )));
        }
        if owner.len() != self.modules.len() {
            return Err(PlaceError::structural(format!(
                "snapshot holds {} modules, the forest owns {}",
                owner.len(),
                self.modules.len()
            )));
        }
        self.trees = trees;
        self.owner = owner;
        Ok(())
    }

    /// Verifies every tree, the registry, and that each module is owned once.
    pub fn check_invariants(&self) -> PlaceResult<()> {
        let mut seen = 0;
        for (cell, tree) in self.trees() {
            tree.check_invariants()?;
            if tree.is_empty() {
                return Err(PlaceError::structural(format!("cell {cell} keeps an empty tree")));
            }
            if !self.partition.cell(cell).is_some_and(|c| c.hosts_tree()) {
                return Err(PlaceError::structural(format!("cell {cell} cannot host a tree")));
            }
            for module in tree.modules() {
                if self.owner.get(&module) != Some(&cell) {
                    return Err(PlaceError::structural(format!(
                        "registry disagrees on the cell of m{module}"
                    )));
                }
                seen += 1;
            }
        }
        if seen != self.modules.len() || self.owner.len() != self.modules.len() {
            return Err(PlaceError::structural(format!(
                "{seen} tree nodes for {} modules",
                self.modules.len()
            )));
        }
        Ok(())
    }
}
