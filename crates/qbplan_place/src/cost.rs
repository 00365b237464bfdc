//! Weighted floorplan cost.
//!
//! `total = wirelength * WL + out_of_bound * O / A + area * B / A + violation * V`
//! where `A` is the normalization area, `B` the bounding area of every
//! placed and pre-placed rectangle (multiplied by `area_overflow_penalty`
//! when it escapes the root cell), and `O` the summed overflow of each
//! packed tree past its leaf.

use crate::data::{Design, Net, Terminal};
use crate::engine::ConstraintEngine;
use crate::error::{PlaceError, PlaceResult};
use crate::forest::{Forest, ModulePlacement};
use qbplan_common::Rect;
use qbplan_config::CostWeights;
use serde::{Deserialize, Serialize};

/// The individual cost terms and their weighted total.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Total half-perimeter wirelength.
    pub wirelength: f64,
    /// Bounding area, penalized when it escapes the root cell.
    pub area: f64,
    /// Area by which packed trees overflow their leaves.
    pub out_of_bound: f64,
    /// Summed constraint violation magnitude.
    pub violation: f64,
    /// Weighted total.
    pub total: f64,
}

/// Evaluates [`CostBreakdown`]s for one design.
#[derive(Clone, Debug)]
pub struct CostModel {
    weights: CostWeights,
    nets: Vec<Net>,
    normal_area: f64,
    pad_scale: (f64, f64),
}

impl CostModel {
    /// Prepares nets and scale factors for `design` partitioned as in `forest`.
    pub fn new(design: &Design, forest: &Forest, weights: CostWeights) -> Self {
        let root = forest.partition().root().rect;
        let scale = |cell: i64, outline: i64| {
            if outline > 0 {
                cell as f64 / outline as f64
            } else {
                1.0
            }
        };
        Self {
            weights,
            nets: design.nets(),
            normal_area: forest.partition().normalized_area(design).max(1.0),
            pad_scale: (
                scale(root.width(), design.root.width),
                scale(root.height(), design.root.height),
            ),
        }
    }

    /// The area every area-like term is divided by.
    pub fn normal_area(&self) -> f64 {
        self.normal_area
    }

    fn terminal_position(&self, design: &Design, forest: &Forest, terminal: Terminal) -> PlaceResult<(f64, f64)> {
        match terminal {
            Terminal::Pad(i) => {
                let pad = design
                    .root
                    .pads
                    .get(i)
                    .ok_or_else(|| PlaceError::malformed(format!("net references missing pad {i}")))?;
                Ok((
                    (pad.x as f64 * self.pad_scale.0).floor(),
                    (pad.y as f64 * self.pad_scale.1).floor(),
                ))
            }
            Terminal::Pin { module, pin } => {
                let placement = forest
                    .layout()
                    .placement(module)
                    .ok_or(PlaceError::ModuleNotFound { module })?;
                let m = design.module(module);
                let p = m.pins.get(pin).ok_or_else(|| {
                    PlaceError::malformed(format!("net references missing pin {pin} of m{module}"))
                })?;
                let (x, y) = pin_position(placement, m.width, p.x, p.y);
                Ok((x as f64, y as f64))
            }
        }
    }

    /// Half-perimeter wirelength summed over every net.
    pub fn wirelength(&self, design: &Design, forest: &Forest) -> PlaceResult<f64> {
        let mut total = 0.0;
        for net in &self.nets {
            let mut bounds: Option<(f64, f64, f64, f64)> = None;
            for &t in &net.terminals {
                let (x, y) = self.terminal_position(design, forest, t)?;
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((lx, ly, hx, hy)) => (lx.min(x), ly.min(y), hx.max(x), hy.max(y)),
                });
            }
            if let Some((lx, ly, hx, hy)) = bounds {
                total += (hx - lx) + (hy - ly);
            }
        }
        Ok(total)
    }

    /// Bounding area of modules and pre-placed rectangles.
    pub fn area(&self, forest: &Forest) -> f64 {
        let root = forest.partition().root().rect;
        let bbox = forest
            .layout()
            .placements()
            .map(|p| p.rect)
            .chain(forest.partition().preplaced().iter().copied())
            .reduce(|a, b| a.union(&b));
        match bbox {
            None => 0.0,
            Some(b) if root.contains(&b) => b.area(),
            Some(b) => b.area() * self.weights.area_overflow_penalty,
        }
    }

    /// Summed overflow of every packed tree past its leaf.
    pub fn out_of_bound(&self, forest: &Forest) -> f64 {
        forest
            .layout()
            .extents()
            .iter()
            .filter_map(|e| {
                let cell = forest.partition().cell(e.cell)?.rect;
                Some(overflow(e.width, e.height, cell))
            })
            .sum()
    }

    /// Evaluates every term of the current layout.
    pub fn evaluate(&self, design: &Design, forest: &Forest, engine: &ConstraintEngine) -> PlaceResult<CostBreakdown> {
        let wirelength = self.wirelength(design, forest)?;
        let area = self.area(forest);
        let out_of_bound = self.out_of_bound(forest);
        let violation = engine.violation(forest)?;
        let w = &self.weights;
        let total = w.wirelength * wirelength
            + w.out_of_bound * out_of_bound / self.normal_area
            + w.area * area / self.normal_area
            + w.violation * violation;
        Ok(CostBreakdown {
            wirelength,
            area,
            out_of_bound,
            violation,
            total,
        })
    }
}

/// Area by which a `width` x `height` packing overflows `cell`.
fn overflow(width: i64, height: i64, cell: Rect) -> f64 {
    let (w, h) = (width as f64, height as f64);
    let (bw, bh) = (cell.width() as f64, cell.height() as f64);
    let excess = match (w > bw, h > bh) {
        (true, true) => w * h - bw * bh,
        (true, false) => (w - bw) * h,
        (false, true) => (h - bh) * w,
        (false, false) => 0.0,
    };
    excess.max(0.0)
}

/// Absolute position of a pin at unrotated offset `(x, y)` on a module of
/// unrotated width `width`.
///
/// Rotation maps `(x, y)` to `(y, width - x)`, flip mirrors across the
/// placed footprint, and a mirrored hosting leaf measures from the far edge.
pub fn pin_position(placement: &ModulePlacement, width: i64, x: i64, y: i64) -> (i64, i64) {
    let rect = placement.rect;
    let (mut ox, oy) = if placement.rotate { (y, width - x) } else { (x, y) };
    if placement.flip {
        ox = rect.width() - ox;
    }
    let ax = if placement.orientation.mirror_x {
        rect.right - ox
    } else {
        rect.left + ox
    };
    let ay = if placement.orientation.mirror_y {
        rect.top - oy
    } else {
        rect.bottom + oy
    };
    (ax, ay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::Detached;
    use crate::constraint::ConstraintSet;
    use crate::data::{IoPad, Module, RootModule};
    use crate::partition::{Orientation, QuadTree};
    use qbplan_common::{CellId, ModuleId, NetId};
    use qbplan_config::PartitionConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn placement(rect: Rect, rotate: bool, flip: bool, mirror_x: bool, mirror_y: bool) -> ModulePlacement {
        ModulePlacement {
            module: ModuleId::from_raw(0),
            rect,
            rotate,
            flip,
            cell: CellId::from_raw(0),
            orientation: Orientation {
                origin_x: 0,
                origin_y: 0,
                mirror_x,
                mirror_y,
            },
        }
    }

    #[test]
    fn pin_follows_rotation_and_mirroring() {
        let plain = placement(Rect::with_size(10, 20, 4, 2), false, false, false, false);
        assert_eq!(pin_position(&plain, 4, 1, 2), (11, 22));

        let rotated = placement(Rect::with_size(10, 20, 2, 4), true, false, false, false);
        assert_eq!(pin_position(&rotated, 4, 1, 2), (12, 23));

        let flipped = placement(Rect::with_size(10, 20, 4, 2), false, true, false, false);
        assert_eq!(pin_position(&flipped, 4, 1, 2), (13, 22));

        let mirrored = placement(Rect::with_size(10, 20, 4, 2), false, false, true, true);
        assert_eq!(pin_position(&mirrored, 4, 1, 2), (13, 20));
    }

    #[test]
    fn overflow_cases() {
        let cell = Rect::with_size(0, 0, 10, 10);
        assert_eq!(overflow(8, 8, cell), 0.0);
        assert_eq!(overflow(12, 5, cell), 10.0);
        assert_eq!(overflow(5, 12, cell), 10.0);
        assert_eq!(overflow(12, 12, cell), 44.0);
    }

    fn two_module_design(pads: Vec<IoPad>) -> Design {
        let n = NetId::from_raw(0);
        let mut design = Design::new(RootModule {
            width: 0,
            height: 0,
            pads,
        });
        design.add_module(Module::new("a", 2, 2).with_pin(n, 0, 0));
        design.add_module(Module::new("b", 2, 2).with_pin(n, 2, 2));
        design
    }

    fn packed(design: &Design) -> (Forest, ConstraintEngine) {
        let mut rng = StdRng::seed_from_u64(0);
        let partition = QuadTree::for_design(design, &PartitionConfig::default()).unwrap();
        let nodes = (0..design.module_count() as u32)
            .map(|i| Detached::new(ModuleId::from_raw(i)))
            .collect();
        let mut forest = Forest::new(partition, nodes, &mut rng).unwrap();
        let engine = ConstraintEngine::new(&ConstraintSet::new());
        forest.pack(design, engine.pack_rules()).unwrap();
        (forest, engine)
    }

    #[test]
    fn wirelength_spans_connected_pins() {
        let design = two_module_design(vec![]);
        let (forest, engine) = packed(&design);
        let model = CostModel::new(&design, &forest, CostWeights::default());
        // b abuts a on the right: pins at a's origin and b's far corner.
        assert_eq!(model.wirelength(&design, &forest).unwrap(), 4.0 + 2.0);
        let cost = model.evaluate(&design, &forest, &engine).unwrap();
        assert_eq!(cost.out_of_bound, 0.0);
        assert_eq!(cost.violation, 0.0);
        assert!(cost.total > 0.0);
    }

    #[test]
    fn pads_scale_to_root_cell() {
        let pad = IoPad {
            net: NetId::from_raw(0),
            x: 1,
            y: 1,
        };
        let mut design = two_module_design(vec![pad]);
        design.root.width = 2;
        design.root.height = 2;
        let (forest, _) = packed(&design);
        let model = CostModel::new(&design, &forest, CostWeights::default());
        let side = forest.partition().root().rect.width() as f64;
        let (x, y) = model
            .terminal_position(&design, &forest, Terminal::Pad(0))
            .unwrap();
        assert_eq!((x, y), ((side / 2.0).floor(), (side / 2.0).floor()));
    }

    #[test]
    fn area_includes_preplaced_anchor() {
        let design = two_module_design(vec![]);
        let (forest, _) = packed(&design);
        let model = CostModel::new(&design, &forest, CostWeights::default());
        let anchor = forest.partition().preplaced()[0];
        let bbox = forest.layout().bounding_box().unwrap().union(&anchor);
        assert_eq!(model.area(&forest), bbox.area());
    }
}
