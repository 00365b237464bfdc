//! Contour packing: converting a tree into per-module coordinates.

use super::contour::Contour;
use super::{NodeIdx, PlacementTree};
use crate::data::{Design, MAX_DIMENSION};
use crate::error::{PlaceError, PlaceResult};
use qbplan_common::{ModuleId, Rect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Constraint-derived adjustments applied while packing.
#[derive(Clone, Debug, Default)]
pub struct PackRules {
    min_separation: HashMap<ModuleId, i64>,
    fixed_rotation: HashMap<ModuleId, bool>,
}

impl PackRules {
    /// Creates an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `distance` clearance around `module`; the largest value wins.
    pub fn add_min_separation(&mut self, module: ModuleId, distance: i64) {
        let entry = self.min_separation.entry(module).or_insert(0);
        *entry = (*entry).max(distance);
    }

    /// Locks the rotation of `module`.
    pub fn lock_rotation(&mut self, module: ModuleId, rotated: bool) {
        self.fixed_rotation.insert(module, rotated);
    }

    /// Clearance required around `module`, zero when unconstrained.
    pub fn min_separation(&self, module: ModuleId) -> i64 {
        self.min_separation.get(&module).copied().unwrap_or(0)
    }

    /// The locked rotation of `module`, if any.
    pub fn locked_rotation(&self, module: ModuleId) -> Option<bool> {
        self.fixed_rotation.get(&module).copied()
    }

    fn separation(&self, a: ModuleId, b: ModuleId) -> i64 {
        self.min_separation(a).max(self.min_separation(b))
    }

    fn has_separation(&self) -> bool {
        self.min_separation.values().any(|&d| d > 0)
    }
}

/// Tree-local coordinates of one packed module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedModule {
    /// The placed module.
    pub module: ModuleId,
    /// Lower-left x.
    pub x: i64,
    /// Lower-left y.
    pub y: i64,
    /// Width after rotation and variant ratio.
    pub width: i64,
    /// Height after rotation and variant ratio.
    pub height: i64,
    /// Effective rotation, after any lock.
    pub rotate: bool,
    /// Horizontal pin mirroring.
    pub flip: bool,
}

impl PackedModule {
    /// The occupied rectangle.
    pub fn rect(&self) -> Rect {
        Rect::with_size(self.x, self.y, self.width, self.height)
    }
}

/// The result of packing one tree.
#[derive(Clone, Debug, Default)]
pub struct Packing {
    /// Packed modules in pre-order.
    pub modules: Vec<PackedModule>,
    /// Largest right edge.
    pub width: i64,
    /// Largest top edge.
    pub height: i64,
    /// The skyline left behind by the pass.
    pub contour: Contour,
}

fn overflow(module: ModuleId) -> PlaceError {
    PlaceError::malformed(format!("coordinates of m{module} overflow"))
}

/// Height of a module of `width` forced to `ratio`, at least one unit.
fn ratio_height(module: ModuleId, width: i64, ratio: f64) -> PlaceResult<i64> {
    let height = (width as f64 * ratio).round();
    if !height.is_finite() || height > MAX_DIMENSION as f64 {
        return Err(PlaceError::malformed(format!(
            "ratio {ratio} gives m{module} an unrepresentable height"
        )));
    }
    Ok((height as i64).max(1))
}

/// Lowest y at or above `y` that keeps a `w` by `h` module at `x` clear of
/// every module already placed by the pass.
///
/// Each conflicting neighbour pushes the module to its top plus the
/// required separation, so `y` only grows and the loop ends.
fn clear_of_placed(
    module: ModuleId,
    (x, y): (i64, i64),
    (w, h): (i64, i64),
    placed: &[PackedModule],
    rules: &PackRules,
) -> PlaceResult<i64> {
    let mut y = y;
    loop {
        let right = x.checked_add(w).ok_or_else(|| overflow(module))?;
        let top = y.checked_add(h).ok_or_else(|| overflow(module))?;
        let rect = Rect { left: x, bottom: y, right, top };
        let mut raise = None;
        for p in placed {
            let other = p.rect();
            let needed = rules.separation(p.module, module);
            if rect.overlaps(&other) || (needed > 0 && rect.clearance(&other) < needed) {
                let above = other
                    .top
                    .checked_add(needed)
                    .ok_or_else(|| overflow(module))?;
                raise = raise.max(Some(above));
            }
        }
        match raise {
            Some(above) if above > y => y = above,
            _ => return Ok(y),
        }
    }
}

impl PlacementTree {
    /// Footprint of the node in `idx` after ratio, rotation, and lock.
    fn footprint(&self, idx: NodeIdx, design: &Design, rules: &PackRules) -> PlaceResult<(i64, i64, bool)> {
        let node = self.get(idx)?;
        if !design.contains(node.module) {
            return Err(PlaceError::ModuleNotFound {
                module: node.module,
            });
        }
        let module = design.module(node.module);
        let width = module.width;
        let height = match node.ratio {
            Some(ratio) => ratio_height(node.module, width, ratio)?,
            None => module.height,
        };
        let rotate = rules.locked_rotation(node.module).unwrap_or(node.rotate);
        Ok(if rotate {
            (height, width, rotate)
        } else {
            (width, height, rotate)
        })
    }

    /// Packs the tree into non-overlapping tree-local coordinates.
    ///
    /// Pre-order from the root: a left child starts at its parent's right
    /// edge, a right child at its parent's left edge, and the y coordinate
    /// comes from the contour. Minimum-separation clearance is added to the
    /// x advance past the parent and to every skyline step the module lands on.
    /// When any module carries a clearance, a module that still ends up too
    /// close to an earlier one (a neighbour beside it that is not its parent)
    /// is lifted until every pair keeps its distance.
    pub fn pack(&self, design: &Design, rules: &PackRules) -> PlaceResult<Packing> {
        let mut contour = Contour::new(self.capacity());
        let mut modules: Vec<PackedModule> = Vec::with_capacity(self.len());
        let mut width = 0;
        let mut height = 0;
        let separated = rules.has_separation();

        let mut stack: Vec<NodeIdx> = self.root.into_iter().collect();
        while let Some(idx) = stack.pop() {
            let node = self.get(idx)?;
            let module = node.module;
            let (w, h, rotate) = self.footprint(idx, design, rules)?;

            let (x, y) = match node.parent {
                None => {
                    let origin = rules.min_separation(module);
                    let rect = Rect::with_size(origin, origin, w, h);
                    contour.place_root(idx, rect);
                    (origin, origin)
                }
                Some(parent) => {
                    let parent_node = self.get(parent)?;
                    let parent_rect = contour.rect(parent).ok_or_else(|| {
                        PlaceError::structural(format!("parent of m{module} packed after it"))
                    })?;
                    let lift = |owner: NodeIdx| {
                        self.node(owner)
                            .map_or(0, |n| rules.separation(n.module, module))
                    };
                    if parent_node.left == Some(idx) {
                        let x = parent_rect
                            .right
                            .checked_add(rules.separation(parent_node.module, module))
                            .ok_or_else(|| overflow(module))?;
                        let right = x.checked_add(w).ok_or_else(|| overflow(module))?;
                        (x, contour.resolve_beside(parent, idx, right, lift))
                    } else {
                        let x = parent_rect.left;
                        let right = x.checked_add(w).ok_or_else(|| overflow(module))?;
                        (x, contour.resolve_above(parent, idx, right, lift))
                    }
                }
            };
            let y = if separated {
                clear_of_placed(module, (x, y), (w, h), &modules, rules)?
            } else {
                y
            };

            let right = x.checked_add(w).ok_or_else(|| overflow(module))?;
            let top = y.checked_add(h).ok_or_else(|| overflow(module))?;
            contour.set_rect(idx, Rect { left: x, bottom: y, right, top });
            width = width.max(right);
            height = height.max(top);
            modules.push(PackedModule {
                module,
                x,
                y,
                width: w,
                height: h,
                rotate,
                flip: node.flip,
            });

            stack.extend(node.right);
            stack.extend(node.left);
        }

        Ok(Packing {
            modules,
            width,
            height,
            contour,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{Detached, SnapshotNode, TreeSnapshot};
    use crate::data::{Module, RootModule};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn design(dims: &[(i64, i64)]) -> Design {
        let mut d = Design::new(RootModule::default());
        for (i, &(w, h)) in dims.iter().enumerate() {
            d.add_module(Module::new(format!("m{i}"), w, h));
        }
        d
    }

    fn tree(n: u32) -> PlacementTree {
        PlacementTree::from_modules((0..n).map(|i| Detached::new(ModuleId::from_raw(i)))).unwrap()
    }

    fn shuffle(t: &mut PlacementTree, rng: &mut StdRng) {
        let modules = t.modules();
        let a = modules[rng.gen_range(0..modules.len())];
        let b = modules[rng.gen_range(0..modules.len())];
        match rng.gen_range(0..3) {
            0 => t.rotate(a, rng.gen_bool(0.5)).unwrap(),
            1 => t.swap(a, b).unwrap(),
            _ if a != b => t.move_under(a, b, rng).unwrap(),
            _ => {}
        }
    }

    fn rect_of(p: &Packing, m: u32) -> Rect {
        p.modules
            .iter()
            .find(|pm| pm.module == ModuleId::from_raw(m))
            .unwrap()
            .rect()
    }

    #[test]
    fn root_left_right_scenario() {
        let d = design(&[(2, 2), (3, 1), (1, 3)]);
        let p = tree(3).pack(&d, &PackRules::new()).unwrap();
        assert_eq!(rect_of(&p, 0), Rect::from_corners(0, 0, 2, 2));
        assert_eq!(rect_of(&p, 1), Rect::from_corners(2, 0, 5, 1));
        assert_eq!(rect_of(&p, 2), Rect::from_corners(0, 2, 1, 5));
        assert_eq!((p.width, p.height), (5, 5));
    }

    #[test]
    fn rotation_swaps_footprint() {
        let d = design(&[(2, 2), (3, 1)]);
        let mut t = tree(2);
        t.rotate(ModuleId::from_raw(1), false).unwrap();
        let p = t.pack(&d, &PackRules::new()).unwrap();
        assert_eq!(rect_of(&p, 1), Rect::from_corners(2, 0, 3, 3));
        assert!(p.modules[1].rotate);
    }

    #[test]
    fn locked_rotation_overrides_node() {
        let d = design(&[(2, 2), (3, 1)]);
        let t = tree(2);
        let mut rules = PackRules::new();
        rules.lock_rotation(ModuleId::from_raw(1), true);
        let p = t.pack(&d, &rules).unwrap();
        assert_eq!(rect_of(&p, 1), Rect::from_corners(2, 0, 3, 3));
    }

    #[test]
    fn variant_ratio_sets_height() {
        let d = design(&[(4, 1)]);
        let mut nodes = vec![Detached::new(ModuleId::from_raw(0))];
        nodes[0].ratio = Some(0.5);
        let t = PlacementTree::from_modules(nodes).unwrap();
        let p = t.pack(&d, &PackRules::new()).unwrap();
        assert_eq!(rect_of(&p, 0), Rect::from_corners(0, 0, 4, 2));
    }

    #[test]
    fn min_separation_offsets() {
        let d = design(&[(4, 4), (4, 4), (4, 4)]);
        let mut rules = PackRules::new();
        rules.add_min_separation(ModuleId::from_raw(0), 5);
        let p = tree(3).pack(&d, &rules).unwrap();
        // The constrained root moves off the origin; its neighbours keep clear.
        assert_eq!(rect_of(&p, 0), Rect::with_size(5, 5, 4, 4));
        assert_eq!(rect_of(&p, 1), Rect::with_size(14, 0, 4, 4));
        assert_eq!(rect_of(&p, 2), Rect::with_size(5, 14, 4, 4));
        assert!(rect_of(&p, 0).clearance(&rect_of(&p, 1)) >= 5);
        assert!(rect_of(&p, 0).clearance(&rect_of(&p, 2)) >= 5);
    }

    #[test]
    fn beside_module_keeps_clear_of_constrained_uncle() {
        // m0 has no left child; m2 sits beside m1 stacked on m0, which puts
        // it level with m0's right edge unless it is lifted.
        let node = |module: u32, parent, left, right| SnapshotNode {
            module: ModuleId::from_raw(module),
            rotate: false,
            flip: false,
            ratio: None,
            parent,
            left,
            right,
        };
        let t = PlacementTree::restore(&TreeSnapshot {
            nodes: vec![
                node(0, None, None, Some(1)),
                node(1, Some(0), Some(2), None),
                node(2, Some(1), None, None),
            ],
            cost: 0.0,
        })
        .unwrap();
        let d = design(&[(4, 4), (4, 4), (4, 4)]);
        let mut rules = PackRules::new();
        rules.add_min_separation(ModuleId::from_raw(0), 5);
        let p = t.pack(&d, &rules).unwrap();

        assert_eq!(rect_of(&p, 0), Rect::with_size(5, 5, 4, 4));
        assert_eq!(rect_of(&p, 1), Rect::with_size(5, 14, 4, 4));
        assert_eq!(rect_of(&p, 2), Rect::with_size(9, 14, 4, 4));
        assert_eq!(rect_of(&p, 0).clearance(&rect_of(&p, 2)), 5);
    }

    #[test]
    fn random_trees_keep_min_separation() {
        let dims: Vec<(i64, i64)> = (0..20).map(|i| (1 + (i * 7) % 5, 1 + (i * 3) % 4)).collect();
        let d = design(&dims);
        let mut rules = PackRules::new();
        for (m, distance) in [(0, 3), (5, 1), (9, 4), (14, 2)] {
            rules.add_min_separation(ModuleId::from_raw(m), distance);
        }
        let mut t = tree(20);
        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..300 {
            shuffle(&mut t, &mut rng);
            let p = t.pack(&d, &rules).unwrap();
            for (i, a) in p.modules.iter().enumerate() {
                for b in &p.modules[i + 1..] {
                    let (ra, rb) = (a.rect(), b.rect());
                    assert!(!ra.overlaps(&rb), "{ra} overlaps {rb}");
                    let needed = rules.separation(a.module, b.module);
                    assert!(
                        ra.clearance(&rb) >= needed,
                        "m{} at {ra} and m{} at {rb} are closer than {needed}",
                        a.module,
                        b.module
                    );
                }
            }
        }
    }

    #[test]
    fn oversized_ratio_is_malformed() {
        let d = design(&[(4, 1)]);
        for ratio in [f64::INFINITY, f64::NAN, 1e12] {
            let mut nodes = vec![Detached::new(ModuleId::from_raw(0))];
            nodes[0].ratio = Some(ratio);
            let t = PlacementTree::from_modules(nodes).unwrap();
            assert!(matches!(
                t.pack(&d, &PackRules::new()),
                Err(PlaceError::InputMalformed { .. })
            ));
        }
    }

    #[test]
    fn packing_is_idempotent() {
        let d = design(&[(3, 2), (1, 4), (2, 2), (5, 1), (2, 3), (1, 1)]);
        let t = tree(6);
        let a = t.pack(&d, &PackRules::new()).unwrap();
        let b = t.pack(&d, &PackRules::new()).unwrap();
        assert_eq!(a.modules, b.modules);
        assert_eq!((a.width, a.height), (b.width, b.height));
    }

    #[test]
    fn random_trees_never_overlap_and_contour_is_monotonic() {
        let dims: Vec<(i64, i64)> = (0..24).map(|i| (1 + (i * 7) % 5, 1 + (i * 3) % 4)).collect();
        let d = design(&dims);
        let mut t = tree(24);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..300 {
            shuffle(&mut t, &mut rng);
            let p = t.pack(&d, &PackRules::new()).unwrap();
            for (i, a) in p.modules.iter().enumerate() {
                for b in &p.modules[i + 1..] {
                    assert!(!a.rect().overlaps(&b.rect()), "{a:?} overlaps {b:?}");
                }
            }
            let ends: Vec<i64> = p.contour.segments().iter().map(|s| s.end).collect();
            assert!(ends.windows(2).all(|w| w[0] < w[1]), "{ends:?}");
            assert!(p.contour.segments().iter().all(|s| s.start < s.end));
        }
    }
}
