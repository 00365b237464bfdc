//! Quad-tree decomposition of the chip region.
//!
//! The root cell is a square sized from the total area. A cell holding a
//! pre-placed rectangle that touches its top or bottom edge is cut at that
//! rectangle's opposite horizontal edge and at one of its vertical edges,
//! producing four quadrants. Among all candidates the cut with the lowest
//! [`cut_cost`] wins. Splitting stops when no candidate exists or a cell
//! coincides with a pre-placed rectangle.
//!
//! Leaves without a pre-placed rectangle host placement trees. A tree packs
//! outward from the cut point it shares with its siblings, which is what
//! [`Orientation`] encodes.

use crate::data::Design;
use crate::error::{PlaceError, PlaceResult};
use qbplan_common::{CellId, Rect};
use qbplan_config::PartitionConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Position of a cell within its parent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Quadrant {
    /// Left of the vertical cut, above the horizontal cut.
    TopLeft,
    /// Right of the vertical cut, above the horizontal cut.
    TopRight,
    /// Left of the vertical cut, below the horizontal cut.
    BottomLeft,
    /// Right of the vertical cut, below the horizontal cut.
    BottomRight,
}

impl Quadrant {
    /// Child order used by [`QuadCell::children`].
    pub const ALL: [Quadrant; 4] = [
        Quadrant::TopLeft,
        Quadrant::TopRight,
        Quadrant::BottomLeft,
        Quadrant::BottomRight,
    ];
}

/// Maps tree-local packing coordinates into a cell.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Orientation {
    /// Absolute x of the local origin.
    pub origin_x: i64,
    /// Absolute y of the local origin.
    pub origin_y: i64,
    /// Local x grows leftward.
    pub mirror_x: bool,
    /// Local y grows downward.
    pub mirror_y: bool,
}

impl Orientation {
    /// Absolute position of a local point.
    pub fn point(&self, x: i64, y: i64) -> (i64, i64) {
        let x = if self.mirror_x { -x } else { x };
        let y = if self.mirror_y { -y } else { y };
        (self.origin_x + x, self.origin_y + y)
    }

    /// Absolute, normalized rectangle of a local rectangle.
    pub fn place(&self, local: Rect) -> Rect {
        let (x1, y1) = self.point(local.left, local.bottom);
        let (x2, y2) = self.point(local.right, local.top);
        Rect::from_corners(x1, y1, x2, y2)
    }
}

/// One node of the quad tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuadCell {
    /// This cell's id.
    pub id: CellId,
    /// Covered region.
    pub rect: Rect,
    /// Enclosing cell, `None` for the root.
    pub parent: Option<CellId>,
    /// Position within the parent, `None` for the root.
    pub quadrant: Option<Quadrant>,
    /// Sub-cells in [`Quadrant::ALL`] order, `None` for a leaf.
    pub children: Option<[CellId; 4]>,
    /// Index of the pre-placed rectangle filling this leaf.
    pub preplaced: Option<usize>,
}

impl QuadCell {
    /// Returns `true` if the cell has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Returns `true` if the cell may host a placement tree.
    pub fn hosts_tree(&self) -> bool {
        self.is_leaf() && self.preplaced.is_none()
    }

    /// Where a tree hosted here packs from.
    pub fn orientation(&self) -> Orientation {
        let r = &self.rect;
        let (origin_x, origin_y, mirror_x, mirror_y) = match self.quadrant {
            None | Some(Quadrant::TopRight) => (r.left, r.bottom, false, false),
            Some(Quadrant::TopLeft) => (r.right, r.bottom, true, false),
            Some(Quadrant::BottomLeft) => (r.right, r.top, true, true),
            Some(Quadrant::BottomRight) => (r.left, r.top, false, true),
        };
        Orientation {
            origin_x,
            origin_y,
            mirror_x,
            mirror_y,
        }
    }
}

/// Cost of a horizontal cut at `y` through `rects`, skipping `except`.
///
/// `crossing * N + offset * sum(|above - below|) + gap * D`, where `N` counts
/// rectangles the line crosses, each crossed rectangle contributes the
/// imbalance between its parts above and below the line, and `D` is the span
/// between the nearest rectangle bottom above the line and the nearest
/// rectangle top below it (zero unless both exist).
pub fn cut_cost(y: i64, rects: &[Rect], except: Option<usize>, config: &PartitionConfig) -> f64 {
    let mut crossing = 0u32;
    let mut offset = 0i64;
    let mut next_above: Option<i64> = None;
    let mut next_below: Option<i64> = None;
    for (i, r) in rects.iter().enumerate() {
        if Some(i) == except {
            continue;
        }
        if r.bottom < y && y < r.top {
            crossing += 1;
            offset += ((r.top - y) - (y - r.bottom)).abs();
        }
        if r.bottom > y {
            next_above = Some(next_above.map_or(r.bottom, |v| v.min(r.bottom)));
        }
        if r.top < y {
            next_below = Some(next_below.map_or(r.top, |v| v.max(r.top)));
        }
    }
    let gap = match (next_above, next_below) {
        (Some(a), Some(b)) => (a - b).abs(),
        _ => 0,
    };
    config.crossing * f64::from(crossing) + config.offset * offset as f64 + config.gap * gap as f64
}

/// The quad-tree partition of the chip region.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuadTree {
    cells: Vec<QuadCell>,
    preplaced: Vec<Rect>,
    anchored: bool,
}

impl QuadTree {
    /// Partitions `root` around the given pre-placed rectangles.
    pub fn build(root: Rect, preplaced: Vec<Rect>, config: &PartitionConfig) -> PlaceResult<Self> {
        if root.width() <= 0 || root.height() <= 0 {
            return Err(PlaceError::malformed(format!("root cell {root} is empty")));
        }
        let mut tree = Self {
            cells: vec![QuadCell {
                id: CellId::from_raw(0),
                rect: root,
                parent: None,
                quadrant: None,
                children: None,
                preplaced: None,
            }],
            preplaced,
            anchored: false,
        };

        let mut work = vec![CellId::from_raw(0)];
        while let Some(id) = work.pop() {
            let rect = tree.cells[id.index()].rect;
            match tree.choose_cut(rect, config) {
                Cut::Filled(index) => tree.cells[id.index()].preplaced = Some(index),
                Cut::None => {}
                Cut::At(x, y) => work.extend(tree.split(id, x, y)),
            }
        }
        Ok(tree)
    }

    /// Sizes the root cell for `design` and partitions it.
    ///
    /// The root side is `floor(ceil(sqrt(total area)) * root_scale)`, never
    /// smaller than the largest module or the pre-placed extents. Without
    /// pre-placed rectangles, and with `anchor` set, a bottom-left anchor the
    /// size of the widest by tallest module is added first.
    pub fn for_design(design: &Design, config: &PartitionConfig) -> PlaceResult<Self> {
        let mut preplaced = design.preplaced.clone();
        let mut total = design.total_area();
        let (max_w, max_h) = design.max_extent();
        let anchored = preplaced.is_empty() && config.anchor && design.module_count() > 0;
        if anchored {
            let anchor = Rect::with_size(0, 0, max_w, max_h);
            total += anchor.area();
            preplaced.push(anchor);
        }

        let scaled = (total.sqrt().ceil() * config.root_scale).floor();
        if !scaled.is_finite() || scaled > i64::MAX as f64 / 4.0 {
            return Err(PlaceError::malformed(format!(
                "total area {total} is too large to partition"
            )));
        }
        let reach = preplaced
            .iter()
            .fold(0, |acc, r| acc.max(r.right).max(r.top));
        // The anchor must leave room for a cut on both axes.
        let largest = max_w.max(max_h) + i64::from(anchored);
        let side = (scaled as i64).max(largest).max(reach).max(1);

        let mut tree = Self::build(Rect::with_size(0, 0, side, side), preplaced, config)?;
        tree.anchored = anchored;
        Ok(tree)
    }

    fn choose_cut(&self, cell: Rect, config: &PartitionConfig) -> Cut {
        let inside: Vec<(usize, Rect)> = self
            .preplaced
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, r)| cell.contains(r))
            .collect();
        let rects: Vec<Rect> = inside.iter().map(|(_, r)| *r).collect();

        let mut best: Option<(f64, i64, i64)> = None;
        for (k, &(index, r)) in inside.iter().enumerate() {
            if r == cell {
                return Cut::Filled(index);
            }
            let y = if r.top == cell.top && r.bottom > cell.bottom {
                r.bottom
            } else if r.bottom == cell.bottom && r.top < cell.top {
                r.top
            } else {
                continue;
            };
            let x = if r.left > cell.left {
                r.left
            } else if r.right < cell.right {
                r.right
            } else {
                continue;
            };
            let cost = cut_cost(y, &rects, Some(k), config);
            if best.map_or(true, |(c, _, _)| cost < c) {
                best = Some((cost, x, y));
            }
        }
        best.map_or(Cut::None, |(_, x, y)| Cut::At(x, y))
    }

    fn split(&mut self, parent: CellId, x: i64, y: i64) -> [CellId; 4] {
        let r = self.cells[parent.index()].rect;
        let rects = [
            Rect::from_corners(r.left, y, x, r.top),
            Rect::from_corners(x, y, r.right, r.top),
            Rect::from_corners(r.left, r.bottom, x, y),
            Rect::from_corners(x, r.bottom, r.right, y),
        ];
        let base = self.cells.len() as u32;
        let ids = [0, 1, 2, 3].map(|i| CellId::from_raw(base + i));
        for ((id, rect), quadrant) in ids.iter().zip(rects).zip(Quadrant::ALL) {
            self.cells.push(QuadCell {
                id: *id,
                rect,
                parent: Some(parent),
                quadrant: Some(quadrant),
                children: None,
                preplaced: None,
            });
        }
        self.cells[parent.index()].children = Some(ids);
        ids
    }

    /// The root cell.
    pub fn root(&self) -> &QuadCell {
        &self.cells[0]
    }

    /// The cell with the given id.
    pub fn cell(&self, id: CellId) -> Option<&QuadCell> {
        self.cells.get(id.index())
    }

    /// All cells in id order.
    pub fn cells(&self) -> &[QuadCell] {
        &self.cells
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Always `false`: a partition has at least its root.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Leaf cells.
    pub fn leaves(&self) -> impl Iterator<Item = &QuadCell> + '_ {
        self.cells.iter().filter(|c| c.is_leaf())
    }

    /// Leaves that may host a placement tree.
    pub fn hosting_leaves(&self) -> impl Iterator<Item = &QuadCell> + '_ {
        self.cells.iter().filter(|c| c.hosts_tree())
    }

    /// Pre-placed rectangles, including a synthesized anchor.
    pub fn preplaced(&self) -> &[Rect] {
        &self.preplaced
    }

    /// Returns `true` if the last pre-placed rectangle was synthesized.
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// Area counted for normalization: the design's total plus any anchor.
    pub fn normalized_area(&self, design: &Design) -> f64 {
        let anchor = if self.anchored {
            self.preplaced.last().map_or(0.0, Rect::area)
        } else {
            0.0
        };
        design.total_area() + anchor
    }

    /// The hosting leaf of largest area, ties broken uniformly at random.
    pub fn largest_leaf<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<CellId> {
        let max = self
            .hosting_leaves()
            .map(|c| c.rect.area())
            .fold(None, |acc: Option<f64>, a| Some(acc.map_or(a, |m| m.max(a))))?;
        let ties: Vec<CellId> = self
            .hosting_leaves()
            .filter(|c| c.rect.area() == max)
            .map(|c| c.id)
            .collect();
        Some(ties[rng.gen_range(0..ties.len())])
    }
}

enum Cut {
    None,
    Filled(usize),
    At(i64, i64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Module, RootModule};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn leaf_with(tree: &QuadTree, rect: Rect) -> &QuadCell {
        tree.leaves().find(|c| c.rect == rect).unwrap()
    }

    #[test]
    fn no_preplaced_is_single_leaf() {
        let tree = QuadTree::build(Rect::with_size(0, 0, 10, 10), vec![], &PartitionConfig::default()).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.root().hosts_tree());
        assert_eq!(tree.root().orientation().point(2, 3), (2, 3));
    }

    #[test]
    fn anchor_splits_into_quadrants() {
        let rects = vec![Rect::with_size(0, 0, 4, 3)];
        let tree = QuadTree::build(Rect::with_size(0, 0, 10, 10), rects, &PartitionConfig::default()).unwrap();
        assert_eq!(tree.len(), 5);
        let anchor = leaf_with(&tree, Rect::from_corners(0, 0, 4, 3));
        assert_eq!(anchor.preplaced, Some(0));
        assert_eq!(anchor.quadrant, Some(Quadrant::BottomLeft));
        assert_eq!(tree.hosting_leaves().count(), 3);

        let mut rng = StdRng::seed_from_u64(0);
        let largest = tree.largest_leaf(&mut rng).unwrap();
        let cell = tree.cell(largest).unwrap();
        assert_eq!(cell.rect, Rect::from_corners(4, 3, 10, 10));
        assert_eq!(cell.quadrant, Some(Quadrant::TopRight));
    }

    #[test]
    fn nested_split_picks_cheapest_cut() {
        let rects = vec![Rect::from_corners(0, 0, 5, 5), Rect::from_corners(15, 15, 20, 20)];
        let tree = QuadTree::build(Rect::with_size(0, 0, 20, 20), rects, &PartitionConfig::default()).unwrap();
        assert_eq!(tree.len(), 9);
        assert_eq!(tree.leaves().filter(|c| c.preplaced.is_some()).count(), 2);
        assert_eq!(tree.hosting_leaves().count(), 5);

        let mut rng = StdRng::seed_from_u64(0);
        let largest = tree.cell(tree.largest_leaf(&mut rng).unwrap()).unwrap();
        assert_eq!(largest.rect, Rect::from_corners(5, 5, 15, 15));
        assert_eq!(largest.quadrant, Some(Quadrant::BottomLeft));
    }

    #[test]
    fn floating_rect_leaves_cell_unsplit() {
        let rects = vec![Rect::from_corners(3, 3, 5, 5)];
        let tree = QuadTree::build(Rect::with_size(0, 0, 10, 10), rects, &PartitionConfig::default()).unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn cut_cost_terms() {
        let config = PartitionConfig::default();
        let rects = [Rect::from_corners(0, 0, 2, 6), Rect::from_corners(5, 0, 7, 3)];
        assert_eq!(cut_cost(3, &rects, Some(1), &config), 1.0);
        assert_eq!(cut_cost(2, &rects, Some(0), &config), 1.0 + 1.0);

        let stacked = [Rect::from_corners(0, 0, 2, 2), Rect::from_corners(0, 7, 2, 9)];
        assert_eq!(cut_cost(4, &stacked, None, &config), 5.0);
    }

    #[test]
    fn orientation_mirrors_per_quadrant() {
        let mut cell = QuadCell {
            id: CellId::from_raw(1),
            rect: Rect::from_corners(0, 5, 5, 10),
            parent: Some(CellId::from_raw(0)),
            quadrant: Some(Quadrant::TopLeft),
            children: None,
            preplaced: None,
        };
        let local = Rect::with_size(0, 0, 2, 3);
        assert_eq!(cell.orientation().place(local), Rect::from_corners(3, 5, 5, 8));

        cell.rect = Rect::from_corners(0, 0, 5, 5);
        cell.quadrant = Some(Quadrant::BottomLeft);
        assert_eq!(cell.orientation().place(local), Rect::from_corners(3, 2, 5, 5));

        cell.rect = Rect::from_corners(5, 0, 10, 5);
        cell.quadrant = Some(Quadrant::BottomRight);
        assert_eq!(cell.orientation().place(local), Rect::from_corners(5, 2, 7, 5));
    }

    #[test]
    fn design_root_is_sized_from_area() {
        let mut design = Design::new(RootModule::default());
        for i in 0..4 {
            design.add_module(Module::new(format!("b{i}"), 4, 4));
        }
        let tree = QuadTree::for_design(&design, &PartitionConfig::default()).unwrap();
        // 64 + 16 anchor -> ceil(sqrt(80)) = 9 -> 13.
        assert_eq!(tree.root().rect, Rect::with_size(0, 0, 13, 13));
        assert!(tree.is_anchored());
        assert_eq!(tree.normalized_area(&design), 80.0);
        assert_eq!(tree.hosting_leaves().count(), 3);
    }

    #[test]
    fn anchor_disabled_keeps_single_leaf() {
        let mut design = Design::new(RootModule::default());
        design.add_module(Module::new("a", 2, 2));
        let config = PartitionConfig {
            anchor: false,
            ..PartitionConfig::default()
        };
        let tree = QuadTree::for_design(&design, &config).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(!tree.is_anchored());
        assert_eq!(tree.root().rect.width(), 3);
    }

    #[test]
    fn elongated_anchor_still_splits() {
        let mut design = Design::new(RootModule::default());
        design.add_module(Module::new("wide", 100, 1));
        let tree = QuadTree::for_design(&design, &PartitionConfig::default()).unwrap();
        assert_eq!(tree.root().rect.width(), 101);
        assert_eq!(tree.len(), 5);
    }
}
