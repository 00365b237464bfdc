//! Serializable floorplan output.

use crate::anneal::RunStats;
use crate::btree::TreeSnapshot;
use crate::cost::CostBreakdown;
use crate::error::{PlaceError, PlaceResult};
use crate::forest::{Forest, ModulePlacement};
use crate::partition::Quadrant;
use qbplan_common::{CellId, ContentHash, ModuleId, Rect};
use serde::{Deserialize, Serialize};

/// One quad cell with the tree it hosts, for visualization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellView {
    /// Cell id.
    pub id: CellId,
    /// Covered region.
    pub rect: Rect,
    /// Position within the parent cell.
    pub quadrant: Option<Quadrant>,
    /// Sub-cells, `None` for a leaf.
    pub children: Option<[CellId; 4]>,
    /// Index of the pre-placed rectangle filling the cell.
    pub preplaced: Option<usize>,
    /// Hosted placement tree.
    pub tree: Option<TreeSnapshot>,
}

/// The best floorplan found by a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FloorplanResult {
    /// Absolute placements, ordered by module id.
    pub placements: Vec<ModulePlacement>,
    /// Cost of the placement.
    pub cost: CostBreakdown,
    /// Run counters.
    pub stats: RunStats,
    /// Partition cells in id order.
    pub cells: Vec<CellView>,
    /// Pre-placed rectangles, the synthesized anchor included.
    pub preplaced: Vec<Rect>,
}

impl FloorplanResult {
    /// Captures the packed state of `forest`.
    pub fn from_forest(forest: &Forest, cost: CostBreakdown, stats: RunStats) -> Self {
        let placements = forest.layout().placements().copied().collect();
        let cells = forest
            .partition()
            .cells()
            .iter()
            .map(|cell| CellView {
                id: cell.id,
                rect: cell.rect,
                quadrant: cell.quadrant,
                children: cell.children,
                preplaced: cell.preplaced,
                tree: forest.tree(cell.id).map(|t| t.snapshot(cost.total)),
            })
            .collect();
        Self {
            placements,
            cost,
            stats,
            cells,
            preplaced: forest.partition().preplaced().to_vec(),
        }
    }

    /// Placement of `module`, if it was placed.
    pub fn placement(&self, module: ModuleId) -> Option<&ModulePlacement> {
        self.placements.iter().find(|p| p.module == module)
    }

    /// Smallest rectangle enclosing every placed module.
    pub fn bounding_box(&self) -> Option<Rect> {
        self.placements.iter().map(|p| p.rect).reduce(|a, b| a.union(&b))
    }

    /// Fingerprint of the placements, equal across runs that reproduce
    /// the same floorplan.
    pub fn fingerprint(&self) -> PlaceResult<ContentHash> {
        let bytes = bincode::serde::encode_to_vec(&self.placements, bincode::config::standard())
            .map_err(|e| PlaceError::Serialization {
                reason: e.to_string(),
            })?;
        Ok(ContentHash::from_bytes(&bytes))
    }
}
