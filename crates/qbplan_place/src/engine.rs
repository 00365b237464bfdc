//! Constraint checking and repair over a packed forest.
//!
//! Every constraint record becomes a [`PlacementConstraint`] rule. Rules read
//! the forest's current layout and, when unsatisfied, mutate the forest
//! through its public moves. The engine repacks after every repair so later
//! rules see fresh coordinates.
//!
//! Edges are measured against the module's hosting leaf, not the whole chip.

use crate::btree::PackRules;
use crate::constraint::{
    Boundary, CloseToBoundary, ConstraintKind, ConstraintSet, Edge, MaxSeparation, MinSeparation,
    Proximity, Range,
};
use crate::data::Design;
use crate::error::{PlaceError, PlaceResult};
use crate::forest::Forest;
use qbplan_common::{CellId, ModuleId, Rect};
use rand::RngCore;

/// A check/repair rule built from one constraint record.
pub trait PlacementConstraint: std::fmt::Debug {
    /// The constraint kind, for reporting.
    fn kind(&self) -> ConstraintKind;

    /// The module the constraint is anchored on.
    fn module(&self) -> ModuleId;

    /// Returns `true` if the current layout satisfies the constraint.
    fn check(&self, forest: &Forest) -> PlaceResult<bool>;

    /// Continuous violation magnitude, zero when satisfied.
    fn violation(&self, forest: &Forest) -> PlaceResult<f64>;

    /// Mutates the forest toward satisfaction.
    ///
    /// Returns `false` when no candidate move exists.
    fn repair(&self, forest: &mut Forest, rng: &mut dyn RngCore) -> PlaceResult<bool>;
}

/// A constraint left unsatisfied, with its violation magnitude.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Unsatisfied {
    /// Constraint kind.
    pub kind: ConstraintKind,
    /// Anchor module.
    pub module: ModuleId,
    /// Violation magnitude.
    pub violation: f64,
}

fn leaf_rect(forest: &Forest, module: ModuleId) -> PlaceResult<Rect> {
    let cell = forest.owner(module)?;
    forest
        .partition()
        .cell(cell)
        .map(|c| c.rect)
        .ok_or_else(|| PlaceError::structural(format!("m{module} owned by unknown cell {cell}")))
}

fn center_distance(a: &Rect, b: &Rect) -> f64 {
    let (ax, ay) = a.center();
    let (bx, by) = b.center();
    (ax - bx).hypot(ay - by)
}

fn on_leaf_edge(rect: &Rect, leaf: &Rect) -> bool {
    rect.left == leaf.left || rect.right == leaf.right || rect.top == leaf.top || rect.bottom == leaf.bottom
}

/// Modules sharing `module`'s tree, other than `module`.
fn tree_mates(forest: &Forest, module: ModuleId) -> PlaceResult<Vec<ModuleId>> {
    let cell = forest.owner(module)?;
    Ok(forest
        .tree(cell)
        .map(|t| t.modules().into_iter().filter(|&m| m != module).collect())
        .unwrap_or_default())
}

#[derive(Debug)]
struct MinSeparationRule(MinSeparation);

impl MinSeparationRule {
    fn deficit(&self, forest: &Forest) -> PlaceResult<i64> {
        let c = &self.0;
        let rect = forest.layout().rect(c.module)?;
        Ok(forest
            .layout()
            .placements()
            .filter(|p| p.module != c.module)
            .map(|p| c.distance - rect.clearance(&p.rect))
            .max()
            .unwrap_or(0)
            .max(0))
    }
}

impl PlacementConstraint for MinSeparationRule {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::MinSeparation
    }

    fn module(&self) -> ModuleId {
        self.0.module
    }

    fn check(&self, forest: &Forest) -> PlaceResult<bool> {
        Ok(self.deficit(forest)? == 0)
    }

    fn violation(&self, forest: &Forest) -> PlaceResult<f64> {
        if self.0.distance == 0 {
            return Ok(0.0);
        }
        Ok(self.deficit(forest)? as f64 / self.0.distance as f64)
    }

    /// Relocates the module to the leaf farthest from it, preferring leaves
    /// that host no tree yet.
    fn repair(&self, forest: &mut Forest, rng: &mut dyn RngCore) -> PlaceResult<bool> {
        let module = self.0.module;
        let home = forest.owner(module)?;
        let rect = forest.layout().rect(module)?;
        let empty = forest.empty_leaves();
        let farthest = |cells: &mut dyn Iterator<Item = (CellId, Rect)>| {
            cells
                .map(|(id, r)| (id, center_distance(&rect, &r)))
                .fold(None, |best: Option<(CellId, f64)>, (id, d)| match best {
                    Some((_, bd)) if bd >= d => best,
                    _ => Some((id, d)),
                })
                .map(|(id, _)| id)
        };
        let target = {
            let partition = forest.partition();
            let mut empty_leaves = partition
                .hosting_leaves()
                .filter(|c| empty.contains(&c.id))
                .map(|c| (c.id, c.rect));
            farthest(&mut empty_leaves).or_else(|| {
                let mut others = partition
                    .hosting_leaves()
                    .filter(|c| c.id != home)
                    .map(|c| (c.id, c.rect));
                farthest(&mut others)
            })
        };
        match target {
            Some(leaf) => {
                forest.move_to_leaf(module, leaf, rng)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug)]
struct MaxSeparationRule(MaxSeparation);

impl MaxSeparationRule {
    fn distance(&self, forest: &Forest) -> PlaceResult<f64> {
        let a = forest.layout().rect(self.0.a)?;
        let b = forest.layout().rect(self.0.b)?;
        Ok(center_distance(&a, &b))
    }
}

impl PlacementConstraint for MaxSeparationRule {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::MaxSeparation
    }

    fn module(&self) -> ModuleId {
        self.0.a
    }

    fn check(&self, forest: &Forest) -> PlaceResult<bool> {
        Ok(self.distance(forest)? <= self.0.distance as f64)
    }

    fn violation(&self, forest: &Forest) -> PlaceResult<f64> {
        let limit = self.0.distance as f64;
        let excess = self.distance(forest)? - limit;
        Ok(if excess > 0.0 { excess / limit.max(1.0) } else { 0.0 })
    }

    /// Pulls `b` toward `a`: into `a`'s tree when the nearest leaf within
    /// reach is `a`'s own, else into that nearer leaf.
    fn repair(&self, forest: &mut Forest, rng: &mut dyn RngCore) -> PlaceResult<bool> {
        let MaxSeparation { a, b, distance } = self.0;
        let home = forest.owner(a)?;
        if forest.owner(b)? == home {
            forest.move_under(b, a, rng)?;
            return Ok(true);
        }
        let center = forest.layout().rect(a)?.center();
        let reach = Rect::from_corners(
            (center.0 - distance as f64).floor() as i64,
            (center.1 - distance as f64).floor() as i64,
            (center.0 + distance as f64).ceil() as i64,
            (center.1 + distance as f64).ceil() as i64,
        );
        let nearest = forest
            .partition()
            .hosting_leaves()
            .filter(|c| c.rect.touches(&reach))
            .map(|c| (c.id, c.rect.distance_to(center)))
            .fold(None, |best: Option<(CellId, f64)>, (id, d)| match best {
                Some((bid, bd)) if bd < d || (bd == d && bid == home) => best,
                _ => Some((id, d)),
            })
            .map(|(id, _)| id);
        match nearest {
            Some(leaf) if leaf == home => forest.move_under(b, a, rng)?,
            Some(leaf) => forest.move_to_leaf(b, leaf, rng)?,
            None => return Ok(false),
        }
        Ok(true)
    }
}

#[derive(Debug)]
struct RangeRule(Range);

fn edge_gap(rect: &Rect, leaf: &Rect, edge: Edge) -> i64 {
    match edge {
        Edge::Top => leaf.top - rect.top,
        Edge::Bottom => rect.bottom - leaf.bottom,
        Edge::Left => rect.left - leaf.left,
        Edge::Right => leaf.right - rect.right,
    }
    .abs()
}

impl RangeRule {
    fn satisfied_by(&self, forest: &Forest, module: ModuleId) -> PlaceResult<bool> {
        let rect = forest.layout().rect(module)?;
        let leaf = leaf_rect(forest, module)?;
        Ok(edge_gap(&rect, &leaf, self.0.edge) <= self.0.range)
    }
}

impl PlacementConstraint for RangeRule {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Range
    }

    fn module(&self) -> ModuleId {
        self.0.module
    }

    fn check(&self, forest: &Forest) -> PlaceResult<bool> {
        self.satisfied_by(forest, self.0.module)
    }

    fn violation(&self, forest: &Forest) -> PlaceResult<f64> {
        let rect = forest.layout().rect(self.0.module)?;
        let leaf = leaf_rect(forest, self.0.module)?;
        let excess = edge_gap(&rect, &leaf, self.0.edge) - self.0.range;
        if excess <= 0 {
            return Ok(0.0);
        }
        let extent = match self.0.edge {
            Edge::Top | Edge::Bottom => rect.height(),
            Edge::Left | Edge::Right => rect.width(),
        };
        Ok((excess as f64 / extent.max(1) as f64).min(1.0))
    }

    /// Swaps with a module that already meets the bound, trying other
    /// trees before the module's own.
    fn repair(&self, forest: &mut Forest, rng: &mut dyn RngCore) -> PlaceResult<bool> {
        let module = self.0.module;
        let home = forest.owner(module)?;
        let mut foreign = None;
        let mut local = None;
        for &other in forest.modules() {
            if other == module || !self.satisfied_by(forest, other)? {
                continue;
            }
            if forest.owner(other)? == home {
                local = local.or(Some(other));
            } else {
                foreign = Some(other);
                break;
            }
        }
        match foreign.or(local) {
            Some(other) => {
                forest.swap(module, other, rng)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug)]
struct CloseToBoundaryRule(CloseToBoundary);

impl CloseToBoundaryRule {
    /// The part of `module`'s leaf farther than `distance` from every edge.
    fn inner(&self, forest: &Forest, module: ModuleId) -> PlaceResult<Option<Rect>> {
        Ok(leaf_rect(forest, module)?.shrink(self.0.distance))
    }

    fn in_band(&self, forest: &Forest, module: ModuleId) -> PlaceResult<bool> {
        let rect = forest.layout().rect(module)?;
        Ok(self
            .inner(forest, module)?
            .map_or(true, |inner| !rect.overlaps(&inner)))
    }
}

impl PlacementConstraint for CloseToBoundaryRule {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::CloseToBoundary
    }

    fn module(&self) -> ModuleId {
        self.0.module
    }

    fn check(&self, forest: &Forest) -> PlaceResult<bool> {
        self.in_band(forest, self.0.module)
    }

    fn violation(&self, forest: &Forest) -> PlaceResult<f64> {
        let rect = forest.layout().rect(self.0.module)?;
        let inside = self
            .inner(forest, self.0.module)?
            .and_then(|inner| rect.intersection(&inner))
            .map_or(0.0, |r| r.area());
        Ok(inside / rect.area().max(1.0))
    }

    /// Swaps with a tree mate already in the band, else moves to a leaf too
    /// narrow to have an inner region.
    fn repair(&self, forest: &mut Forest, rng: &mut dyn RngCore) -> PlaceResult<bool> {
        let module = self.0.module;
        for other in tree_mates(forest, module)? {
            if self.in_band(forest, other)? {
                forest.swap(module, other, rng)?;
                return Ok(true);
            }
        }
        let home = forest.owner(module)?;
        let tighter = forest
            .partition()
            .hosting_leaves()
            .find(|c| c.id != home && c.rect.shrink(self.0.distance).is_none())
            .map(|c| c.id);
        match tighter {
            Some(leaf) => {
                forest.move_to_leaf(module, leaf, rng)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug)]
struct ProximityRule {
    lead: ModuleId,
    group: Proximity,
}

struct GroupSpan {
    bbox: Rect,
    total_width: i64,
    total_height: i64,
    anchor: ModuleId,
}

impl ProximityRule {
    /// Wraps `group`, reported under its first member; `None` when empty.
    fn new(group: Proximity) -> Option<Self> {
        let lead = group.members.first().copied()?;
        Some(Self { lead, group })
    }

    fn span(&self, forest: &Forest) -> PlaceResult<Option<GroupSpan>> {
        let mut span: Option<GroupSpan> = None;
        for &m in &self.group.members {
            let r = forest.layout().rect(m)?;
            span = Some(match span {
                None => GroupSpan {
                    bbox: r,
                    total_width: r.width(),
                    total_height: r.height(),
                    anchor: m,
                },
                Some(s) => GroupSpan {
                    anchor: if r.left < s.bbox.left { m } else { s.anchor },
                    bbox: s.bbox.union(&r),
                    total_width: s.total_width + r.width(),
                    total_height: s.total_height + r.height(),
                },
            });
        }
        Ok(span)
    }
}

impl PlacementConstraint for ProximityRule {
    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Proximity
    }

    fn module(&self) -> ModuleId {
        self.lead
    }

    fn check(&self, forest: &Forest) -> PlaceResult<bool> {
        Ok(self.span(forest)?.map_or(true, |s| {
            s.bbox.width() <= s.total_width && s.bbox.height() <= s.total_height
        }))
    }

    fn violation(&self, forest: &Forest) -> PlaceResult<f64> {
        let Some(s) = self.span(forest)? else {
            return Ok(0.0);
        };
        let excess = |extent: i64, total: i64| (extent - total).max(0) as f64 / total.max(1) as f64;
        Ok(excess(s.bbox.width(), s.total_width) + excess(s.bbox.height(), s.total_height))
    }

    /// Moves every member reaching past the group budget into the anchor's
    /// tree, the anchor being the leftmost member.
    fn repair(&self, forest: &mut Forest, rng: &mut dyn RngCore) -> PlaceResult<bool> {
        let Some(s) = self.span(forest)? else {
            return Ok(true);
        };
        let outliers: Vec<ModuleId> = self
            .group
            .members
            .iter()
            .copied()
            .filter(|&m| m != s.anchor)
            .filter(|&m| {
                forest.layout().rect(m).is_ok_and(|r| {
                    r.right - s.bbox.left > s.total_width || r.top - s.bbox.bottom > s.total_height
                })
            })
            .collect();
        for m in outliers {
            forest.move_under(m, s.anchor, rng)?;
        }
        Ok(true)
    }
}

#[derive(Debug)]
struct BoundaryRule(Boundary);

impl BoundaryRule {
    fn touches_edge(&self, forest: &Forest, module: ModuleId) -> PlaceResult<bool> {
        let rect = forest.layout().rect(module)?;
        Ok(on_leaf_edge(&rect, &leaf_rect(forest, module)?))
    }
}

impl PlacementConstraint for BoundaryRule {
    fn kind(&self) -> ConstraintKind {
        if self.0.rotated.is_some() {
            ConstraintKind::FixedBoundary
        } else {
            ConstraintKind::Boundary
        }
    }

    fn module(&self) -> ModuleId {
        self.0.module
    }

    fn check(&self, forest: &Forest) -> PlaceResult<bool> {
        self.touches_edge(forest, self.0.module)
    }

    fn violation(&self, forest: &Forest) -> PlaceResult<f64> {
        let rect = forest.layout().rect(self.0.module)?;
        let leaf = leaf_rect(forest, self.0.module)?;
        let gap = [Edge::Top, Edge::Bottom, Edge::Left, Edge::Right]
            .into_iter()
            .map(|e| edge_gap(&rect, &leaf, e))
            .min()
            .unwrap_or(0);
        let side = rect.width().min(rect.height()).max(1);
        Ok((gap as f64 / side as f64).min(1.0))
    }

    /// Swaps with a tree mate that lies on a leaf edge.
    fn repair(&self, forest: &mut Forest, rng: &mut dyn RngCore) -> PlaceResult<bool> {
        for other in tree_mates(forest, self.0.module)? {
            if self.touches_edge(forest, other)? {
                forest.swap(self.0.module, other, rng)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Ordered check/repair rules plus the packing adjustments they imply.
#[derive(Debug, Default)]
pub struct ConstraintEngine {
    rules: Vec<Box<dyn PlacementConstraint>>,
    pack_rules: PackRules,
}

impl ConstraintEngine {
    /// Builds rules in repair order: maximum separation, minimum
    /// separation, range, close-to-boundary, proximity, then boundary.
    ///
    /// Minimum separation also widens packing, and fixed-boundary
    /// constraints lock rotation.
    pub fn new(set: &ConstraintSet) -> Self {
        let mut pack_rules = PackRules::new();
        for c in &set.min_separation {
            pack_rules.add_min_separation(c.module, c.distance);
        }
        for c in &set.boundary {
            if let Some(rotated) = c.rotated {
                pack_rules.lock_rotation(c.module, rotated);
            }
        }

        let mut rules: Vec<Box<dyn PlacementConstraint>> = Vec::new();
        rules.extend(set.max_separation.iter().cloned().map(|c| Box::new(MaxSeparationRule(c)) as _));
        rules.extend(set.min_separation.iter().cloned().map(|c| Box::new(MinSeparationRule(c)) as _));
        rules.extend(set.range.iter().cloned().map(|c| Box::new(RangeRule(c)) as _));
        rules.extend(set.close_to_boundary.iter().cloned().map(|c| Box::new(CloseToBoundaryRule(c)) as _));
        rules.extend(
            set.proximity
                .iter()
                .cloned()
                .filter_map(ProximityRule::new)
                .map(|c| Box::new(c) as _),
        );
        rules.extend(set.boundary.iter().cloned().map(|c| Box::new(BoundaryRule(c)) as _));
        Self { rules, pack_rules }
    }

    /// Packing adjustments implied by the constraints.
    pub fn pack_rules(&self) -> &PackRules {
        &self.pack_rules
    }

    /// The rules in repair order.
    pub fn rules(&self) -> &[Box<dyn PlacementConstraint>] {
        &self.rules
    }

    /// Checks every rule in order, repairing and repacking on failure.
    ///
    /// Returns the number of repairs made. A rule with no candidate move, or
    /// a minimum separation still violated after its repair, yields
    /// [`PlaceError::ConstraintInfeasible`]. The forest must be packed on entry.
    pub fn enforce(&self, forest: &mut Forest, design: &Design, rng: &mut dyn RngCore) -> PlaceResult<usize> {
        let mut repairs = 0;
        for rule in &self.rules {
            if rule.check(forest)? {
                continue;
            }
            let infeasible = PlaceError::ConstraintInfeasible {
                kind: rule.kind(),
                module: rule.module(),
            };
            if !rule.repair(forest, rng)? {
                return Err(infeasible);
            }
            repairs += 1;
            forest.pack(design, &self.pack_rules)?;
            if rule.kind() == ConstraintKind::MinSeparation && !rule.check(forest)? {
                return Err(infeasible);
            }
        }
        Ok(repairs)
    }

    /// Summed violation magnitude over every rule.
    pub fn violation(&self, forest: &Forest) -> PlaceResult<f64> {
        self.rules
            .iter()
            .map(|r| r.violation(forest))
            .sum()
    }

    /// Rules the current layout does not satisfy.
    pub fn unsatisfied(&self, forest: &Forest) -> PlaceResult<Vec<Unsatisfied>> {
        let mut out = Vec::new();
        for rule in &self.rules {
            if !rule.check(forest)? {
                out.push(Unsatisfied {
                    kind: rule.kind(),
                    module: rule.module(),
                    violation: rule.violation(forest)?,
                });
            }
        }
        Ok(out)
    }
}
