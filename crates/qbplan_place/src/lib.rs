//! Fixed-outline floorplanning over a quad-tree of B*-trees.
//!
//! This crate takes a [`Design`] (movable modules, nets, and pre-placed
//! rectangles) plus a [`ConstraintSet`] and searches for a non-overlapping
//! placement that keeps wirelength and bounding area low while satisfying
//! the constraints.
//!
//! # Pipeline
//!
//! 1. **Partition**: split the root cell around pre-placed rectangles into
//!    a [`QuadTree`]
//! 2. **Seed**: put every module into one [`PlacementTree`] hosted by the
//!    largest free leaf
//! 3. **Anneal**: perturb, pack, repair, evaluate, and accept or reject
//!    under an adaptive schedule ([`Annealer`])
//! 4. **Report**: restore the best state, emit constraint and outline
//!    diagnostics, and return a [`FloorplanResult`]
//!
//! # Usage
//!
//! ```ignore
//! use qbplan_place::floorplan;
//!
//! let result = floorplan(&design, &constraints, &config, &sink)?;
//! println!("{} ({})", result.cost.total, result.fingerprint()?);
//! ```

#![warn(missing_docs)]

pub mod anneal;
pub mod btree;
pub mod constraint;
pub mod cost;
pub mod data;
pub mod engine;
pub mod error;
pub mod forest;
pub mod partition;
pub mod perturb;
pub mod result;

pub use anneal::{Annealer, RunStats, Termination};
pub use btree::{Detached, PackRules, Packing, PlacementTree, TreeSnapshot};
pub use constraint::{ConstraintKind, ConstraintSet};
pub use cost::{CostBreakdown, CostModel};
pub use data::{Design, IoPad, Module, Net, Pin, RootModule, Terminal};
pub use engine::{ConstraintEngine, PlacementConstraint, Unsatisfied};
pub use error::{PlaceError, PlaceResult};
pub use forest::{Forest, ForestSnapshot, Layout, ModulePlacement};
pub use partition::{QuadCell, QuadTree, Quadrant};
pub use perturb::Perturbation;
pub use result::{CellView, FloorplanResult};

use qbplan_common::ModuleId;
use qbplan_config::{validate_config, FloorplanConfig};
use qbplan_diagnostics::{Category, Diagnostic, DiagnosticCode, DiagnosticSink, Label};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Floorplans `design` under `constraints`.
///
/// Inputs are validated before any placement work starts. The run is
/// reproducible when `config.anneal.seed` is set. Stage progress, the
/// termination reason, constraints the best solution still violates, and an
/// outline overflow are reported to `sink`.
pub fn floorplan(
    design: &Design,
    constraints: &ConstraintSet,
    config: &FloorplanConfig,
    sink: &DiagnosticSink,
) -> PlaceResult<FloorplanResult> {
    validate_config(config)?;
    design.validate()?;
    constraints.validate(design)?;

    let mut rng = match config.anneal.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let partition = QuadTree::for_design(design, &config.partition)?;
    let nodes = (0..design.module_count())
        .map(|i| {
            let module = ModuleId::from_raw(i as u32);
            let mut node = Detached::new(module);
            node.ratio = constraints
                .ratios(module)
                .and_then(|r| r.choose(&mut rng))
                .copied();
            node
        })
        .collect();
    let mut forest = Forest::new(partition, nodes, &mut rng)?;
    let engine = ConstraintEngine::new(constraints);
    let model = CostModel::new(design, &forest, config.cost.clone());

    let annealer = Annealer::new(design, &engine, &model, &config.anneal, &config.moves, sink);
    let (cost, mut stats) = annealer.run(&mut forest, &mut rng)?;
    stats.constraints = constraints.counts();

    report(&forest, &engine, sink)?;
    Ok(FloorplanResult::from_forest(&forest, cost, stats))
}

fn constraint_code(kind: ConstraintKind) -> DiagnosticCode {
    let number = match kind {
        ConstraintKind::MinSeparation => 201,
        ConstraintKind::MaxSeparation => 202,
        ConstraintKind::Proximity => 203,
        ConstraintKind::Range => 204,
        ConstraintKind::CloseToBoundary => 205,
        ConstraintKind::Boundary => 206,
        ConstraintKind::FixedBoundary => 207,
        ConstraintKind::Variant => 208,
        ConstraintKind::Symmetry => 209,
    };
    DiagnosticCode::new(Category::Constraint, number)
}

/// Warns about constraints left violated and an escaped outline.
fn report(forest: &Forest, engine: &ConstraintEngine, sink: &DiagnosticSink) -> PlaceResult<()> {
    for miss in engine.unsatisfied(forest)? {
        sink.emit(
            Diagnostic::warning(
                constraint_code(miss.kind),
                format!("{} constraint is not satisfied", miss.kind),
            )
            .with_module(miss.module)
            .with_label(Label::primary(miss.module, "constrained module"))
            .with_note(format!("violation magnitude {:.4}", miss.violation)),
        );
    }

    let root = forest.partition().root().rect;
    if let Some(bbox) = forest.layout().bounding_box() {
        if !root.contains(&bbox) {
            sink.emit(
                Diagnostic::warning(
                    DiagnosticCode::new(Category::Warning, 301),
                    format!("placement {bbox} exceeds the root cell {root}"),
                )
                .with_help("raise partition.root_scale or out_of_bound weight"),
            );
        }
    }
    Ok(())
}
