//! Random neighbourhood moves for the annealer.

use crate::error::PlaceResult;
use crate::forest::Forest;
use qbplan_common::{CellId, ModuleId};
use qbplan_config::MoveWeights;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One applied perturbation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Perturbation {
    /// Toggle rotation, and flip when set.
    Rotate {
        /// Rotated module.
        module: ModuleId,
        /// Whether the flip flag was toggled too.
        flip: bool,
    },
    /// Exchange two modules, possibly across trees.
    Swap {
        /// First module.
        a: ModuleId,
        /// Second module.
        b: ModuleId,
    },
    /// Move a module into a leaf that had no tree.
    MoveToLeaf {
        /// Moved module.
        module: ModuleId,
        /// Destination leaf.
        leaf: CellId,
    },
    /// Re-attach a module under another.
    MoveUnder {
        /// Moved module.
        module: ModuleId,
        /// New parent.
        parent: ModuleId,
    },
}

/// Draws a perturbation for the current forest.
///
/// With probability `rotate` a rotation; otherwise a swap with probability
/// `swap`; otherwise a structural move that targets an empty leaf with
/// probability `leaf` (when one exists) and re-attaches under another module
/// the rest of the time. A single module can only rotate. Returns `None`
/// for an empty forest.
pub fn propose<R: Rng + ?Sized>(forest: &Forest, weights: &MoveWeights, rng: &mut R) -> Option<Perturbation> {
    let module = forest.random_module(rng)?;
    if forest.modules().len() == 1 || rng.gen_bool(weights.rotate) {
        return Some(Perturbation::Rotate {
            module,
            flip: rng.gen_bool(0.5),
        });
    }
    let other = loop {
        let candidate = forest.random_module(rng)?;
        if candidate != module {
            break candidate;
        }
    };
    if rng.gen_bool(weights.swap) {
        return Some(Perturbation::Swap { a: module, b: other });
    }
    let empty = forest.empty_leaves();
    if !empty.is_empty() && rng.gen_bool(weights.leaf) {
        let leaf = empty[rng.gen_range(0..empty.len())];
        return Some(Perturbation::MoveToLeaf { module, leaf });
    }
    Some(Perturbation::MoveUnder {
        module,
        parent: other,
    })
}

/// Applies `step` to the forest.
pub fn apply<R: Rng + ?Sized>(forest: &mut Forest, step: Perturbation, rng: &mut R) -> PlaceResult<()> {
    match step {
        Perturbation::Rotate { module, flip } => forest.rotate(module, flip),
        Perturbation::Swap { a, b } => forest.swap(a, b, rng),
        Perturbation::MoveToLeaf { module, leaf } => forest.move_to_leaf(module, leaf, rng),
        Perturbation::MoveUnder { module, parent } => forest.move_under(module, parent, rng),
    }
}

/// Proposes and applies one perturbation.
pub fn perturb<R: Rng + ?Sized>(
    forest: &mut Forest,
    weights: &MoveWeights,
    rng: &mut R,
) -> PlaceResult<Option<Perturbation>> {
    let Some(step) = propose(forest, weights, rng) else {
        return Ok(None);
    };
    apply(forest, step, rng)?;
    Ok(Some(step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::Detached;
    use crate::data::{Design, Module, RootModule};
    use crate::partition::QuadTree;
    use qbplan_config::PartitionConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn forest(n: usize, rng: &mut StdRng) -> Forest {
        let mut design = Design::new(RootModule::default());
        for i in 0..n {
            design.add_module(Module::new(format!("b{i}"), 3, 2));
        }
        let partition = QuadTree::for_design(&design, &PartitionConfig::default()).unwrap();
        let nodes = (0..n as u32).map(|i| Detached::new(ModuleId::from_raw(i))).collect();
        Forest::new(partition, nodes, rng).unwrap()
    }

    #[test]
    fn empty_forest_has_no_move() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut f = forest(0, &mut rng);
        assert_eq!(perturb(&mut f, &MoveWeights::default(), &mut rng).unwrap(), None);
    }

    #[test]
    fn single_module_only_rotates() {
        let mut rng = StdRng::seed_from_u64(0);
        let f = forest(1, &mut rng);
        for _ in 0..20 {
            let p = propose(&f, &MoveWeights::default(), &mut rng).unwrap();
            assert!(matches!(p, Perturbation::Rotate { .. }));
        }
    }

    #[test]
    fn weights_select_move_family() {
        let mut rng = StdRng::seed_from_u64(2);
        let f = forest(4, &mut rng);
        let only_swap = MoveWeights {
            rotate: 0.0,
            swap: 1.0,
            leaf: 0.0,
        };
        for _ in 0..20 {
            assert!(matches!(
                propose(&f, &only_swap, &mut rng),
                Some(Perturbation::Swap { a, b }) if a != b
            ));
        }
        let only_leaf = MoveWeights {
            rotate: 0.0,
            swap: 0.0,
            leaf: 1.0,
        };
        assert!(matches!(
            propose(&f, &only_leaf, &mut rng),
            Some(Perturbation::MoveToLeaf { .. })
        ));
    }

    #[test]
    fn random_walk_keeps_forest_consistent() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut f = forest(10, &mut rng);
        let weights = MoveWeights::default();
        for _ in 0..3000 {
            perturb(&mut f, &weights, &mut rng).unwrap();
            f.check_invariants().unwrap();
        }
    }
}
