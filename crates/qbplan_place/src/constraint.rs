//! Geometric constraint records.
//!
//! These are read-only after load. The constraint engine turns them into
//! check/repair rules; the packer reads separation, rotation locks, and
//! aspect-ratio variants directly.

use crate::error::{PlaceError, PlaceResult};
use crate::data::Design;
use qbplan_common::ModuleId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// The kinds of placement constraint the engine knows about.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Keep a module at least some distance from every other module.
    MinSeparation,
    /// Keep two module centers within some distance.
    MaxSeparation,
    /// Keep a group of modules packed together.
    Proximity,
    /// Keep a named module edge within some distance of its leaf edge.
    Range,
    /// Keep a module inside the boundary band of its leaf.
    CloseToBoundary,
    /// Keep a module edge on its leaf edge.
    Boundary,
    /// Boundary constraint with the rotation locked.
    FixedBoundary,
    /// Force height as a multiple of width.
    Variant,
    /// Mirror two modules about an axis (carried, not enforced).
    Symmetry,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MinSeparation => "minimum separation",
            Self::MaxSeparation => "maximum separation",
            Self::Proximity => "proximity",
            Self::Range => "range",
            Self::CloseToBoundary => "close-to-boundary",
            Self::Boundary => "boundary",
            Self::FixedBoundary => "fixed boundary",
            Self::Variant => "variant",
            Self::Symmetry => "symmetry",
        };
        f.write_str(name)
    }
}

/// A side of a rectangle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Edge {
    /// Maximum y.
    Top,
    /// Minimum y.
    Bottom,
    /// Minimum x.
    Left,
    /// Maximum x.
    Right,
}

/// `module` keeps at least `distance` clearance from every other module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinSeparation {
    /// Constrained module.
    pub module: ModuleId,
    /// Required clearance.
    pub distance: i64,
}

/// The centers of `a` and `b` stay within `distance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxSeparation {
    /// Anchor module.
    pub a: ModuleId,
    /// Module relocated toward `a` on repair.
    pub b: ModuleId,
    /// Maximum center distance.
    pub distance: i64,
}

/// `members` are kept in a tight cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proximity {
    /// Group members.
    pub members: Vec<ModuleId>,
}

/// `edge` of `module` stays within `range` of the same edge of its leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    /// Constrained module.
    pub module: ModuleId,
    /// Which edge is measured.
    pub edge: Edge,
    /// Allowed distance.
    pub range: i64,
}

/// `module` lies in the band of width `distance` along its leaf's boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseToBoundary {
    /// Constrained module.
    pub module: ModuleId,
    /// Band width.
    pub distance: i64,
}

/// `module` has an edge on its leaf's boundary; `rotated` locks the rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    /// Constrained module.
    pub module: ModuleId,
    /// `Some(r)` for a fixed-boundary constraint locking rotation to `r`.
    pub rotated: Option<bool>,
}

/// `module` takes one of the given height-to-width ratios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Constrained module.
    pub module: ModuleId,
    /// Candidate ratios; one is drawn when the module's node is created.
    pub ratios: Vec<f64>,
}

/// `a` and `b` are mirror images of each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symmetry {
    /// First module.
    pub a: ModuleId,
    /// Second module.
    pub b: ModuleId,
}

/// All constraints of a design, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    /// Minimum separation constraints.
    pub min_separation: Vec<MinSeparation>,
    /// Maximum separation constraints.
    pub max_separation: Vec<MaxSeparation>,
    /// Proximity groups.
    pub proximity: Vec<Proximity>,
    /// Range-from-boundary constraints.
    pub range: Vec<Range>,
    /// Close-to-boundary constraints.
    pub close_to_boundary: Vec<CloseToBoundary>,
    /// Boundary and fixed-boundary constraints.
    pub boundary: Vec<Boundary>,
    /// Aspect-ratio variants.
    pub variant: Vec<Variant>,
    /// Symmetry pairs.
    pub symmetry: Vec<Symmetry>,
}

impl ConstraintSet {
    /// Creates an empty constraint set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no constraint of any kind is present.
    pub fn is_empty(&self) -> bool {
        self.counts().iter().all(|(_, n)| *n == 0)
    }

    /// Number of records per kind, in a fixed order.
    pub fn counts(&self) -> Vec<(ConstraintKind, usize)> {
        let fixed = self.boundary.iter().filter(|b| b.rotated.is_some()).count();
        vec![
            (ConstraintKind::MinSeparation, self.min_separation.len()),
            (ConstraintKind::MaxSeparation, self.max_separation.len()),
            (ConstraintKind::Proximity, self.proximity.len()),
            (ConstraintKind::Range, self.range.len()),
            (ConstraintKind::CloseToBoundary, self.close_to_boundary.len()),
            (ConstraintKind::Boundary, self.boundary.len() - fixed),
            (ConstraintKind::FixedBoundary, fixed),
            (ConstraintKind::Variant, self.variant.len()),
            (ConstraintKind::Symmetry, self.symmetry.len()),
        ]
    }

    /// Ratios allowed for `module`, if it has a variant constraint.
    pub fn ratios(&self, module: ModuleId) -> Option<&[f64]> {
        self.variant
            .iter()
            .find(|v| v.module == module)
            .map(|v| v.ratios.as_slice())
    }

    /// Rejects references to unknown modules and ill-formed values.
    pub fn validate(&self, design: &Design) -> PlaceResult<()> {
        let known = |kind: ConstraintKind, module: ModuleId| -> PlaceResult<()> {
            if design.contains(module) {
                Ok(())
            } else {
                Err(PlaceError::malformed(format!(
                    "{kind} constraint references unknown module m{module}"
                )))
            }
        };
        let distance = |kind: ConstraintKind, value: i64| -> PlaceResult<()> {
            if value < 0 {
                Err(PlaceError::malformed(format!(
                    "{kind} distance must not be negative, got {value}"
                )))
            } else {
                Ok(())
            }
        };

        for c in &self.min_separation {
            known(ConstraintKind::MinSeparation, c.module)?;
            distance(ConstraintKind::MinSeparation, c.distance)?;
        }
        for c in &self.max_separation {
            known(ConstraintKind::MaxSeparation, c.a)?;
            known(ConstraintKind::MaxSeparation, c.b)?;
            distance(ConstraintKind::MaxSeparation, c.distance)?;
            if c.a == c.b {
                return Err(PlaceError::malformed(format!(
                    "maximum separation pairs m{} with itself",
                    c.a
                )));
            }
        }
        for c in &self.proximity {
            let mut seen = HashSet::new();
            for &m in &c.members {
                known(ConstraintKind::Proximity, m)?;
                if !seen.insert(m) {
                    return Err(PlaceError::malformed(format!(
                        "proximity group lists m{m} twice"
                    )));
                }
            }
            if c.members.len() < 2 {
                return Err(PlaceError::malformed(
                    "proximity group needs at least two members",
                ));
            }
        }
        for c in &self.range {
            known(ConstraintKind::Range, c.module)?;
            distance(ConstraintKind::Range, c.range)?;
        }
        for c in &self.close_to_boundary {
            known(ConstraintKind::CloseToBoundary, c.module)?;
            distance(ConstraintKind::CloseToBoundary, c.distance)?;
        }
        for c in &self.boundary {
            known(ConstraintKind::Boundary, c.module)?;
        }
        let mut varied = HashSet::new();
        for c in &self.variant {
            known(ConstraintKind::Variant, c.module)?;
            if !varied.insert(c.module) {
                return Err(PlaceError::malformed(format!(
                    "m{} has more than one variant constraint",
                    c.module
                )));
            }
            if c.ratios.is_empty() || c.ratios.iter().any(|r| !(r.is_finite() && *r > 0.0)) {
                return Err(PlaceError::malformed(format!(
                    "variant ratios of m{} must be positive and non-empty",
                    c.module
                )));
            }
        }
        for c in &self.symmetry {
            known(ConstraintKind::Symmetry, c.a)?;
            known(ConstraintKind::Symmetry, c.b)?;
            if c.a == c.b {
                return Err(PlaceError::malformed(format!(
                    "symmetry pairs m{} with itself",
                    c.a
                )));
            }
        }
        Ok(())
    }
}
