//! Configuration types deserialized from `qbplan.toml`.

use serde::{Deserialize, Serialize};

/// The top-level floorplanner configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FloorplanConfig {
    /// Simulated-annealing schedule.
    pub anneal: AnnealConfig,
    /// Cost function coefficients.
    pub cost: CostWeights,
    /// Perturbation move-selection weights.
    pub moves: MoveWeights,
    /// Quad-tree partitioning parameters.
    pub partition: PartitionConfig,
}

/// Adaptive simulated-annealing schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealConfig {
    /// Moves per stage as a multiple of the module count (default 30).
    pub times: usize,
    /// Number of hill-climbing stages before the normal schedule (default 7).
    pub local: usize,
    /// Stop once the normalized temperature falls to this value (default 0.1).
    pub term_temp: f64,
    /// Acceptance probability used to derive the starting temperature (default 0.9).
    pub init_prob: f64,
    /// Average uphill cost delta assumed during hill climbing (default 1e-5).
    pub init_avg: f64,
    /// Divisor of the estimated average delta, `0.08 / avg_ratio` (default 150).
    pub avg_ratio: f64,
    /// Cooling aggressiveness in `exp(-lambda * T / stddev)` (default 1.3).
    pub lambda: f64,
    /// Reject rate treated as converged after hill climbing (default 0.87).
    pub conv_rate: f64,
    /// Consecutive infeasible perturbations tolerated before giving up (default 1000).
    pub max_retries: usize,
    /// Perturbations sampled to seed the best and last solutions (default 10).
    pub normalize_samples: usize,
    /// Total perturbation budget across all stages; 0 means unlimited.
    pub max_iterations: usize,
    /// Random seed; `None` draws one from the operating system.
    pub seed: Option<u64>,
}

impl Default for AnnealConfig {
    fn default() -> Self {
        Self {
            times: 30,
            local: 7,
            term_temp: 0.1,
            init_prob: 0.9,
            init_avg: 0.00001,
            avg_ratio: 150.0,
            lambda: 1.3,
            conv_rate: 0.87,
            max_retries: 1000,
            normalize_samples: 10,
            max_iterations: 0,
            seed: None,
        }
    }
}

/// Coefficients of the weighted floorplan cost.
///
/// `cost = wirelength * WL + out_of_bound * O / A_total + area * A / A_total
/// + violation * V`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    /// Weight of the total half-perimeter wirelength.
    pub wirelength: f64,
    /// Weight of the out-of-bound area ratio.
    pub out_of_bound: f64,
    /// Weight of the normalized bounding-area ratio.
    pub area: f64,
    /// Weight of the summed constraint violation magnitude.
    pub violation: f64,
    /// Multiplier applied to the bounding area when it escapes the root cell.
    pub area_overflow_penalty: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            wirelength: 1e-8,
            out_of_bound: 1.0,
            area: 0.25,
            violation: 1.0,
            area_overflow_penalty: 100.0,
        }
    }
}

/// Coin-flip weights used to pick a perturbation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveWeights {
    /// Probability of a rotation move.
    pub rotate: f64,
    /// Probability of a swap among the remaining (non-rotate) moves.
    pub swap: f64,
    /// Probability that a structural move targets an empty leaf.
    pub leaf: f64,
}

impl Default for MoveWeights {
    fn default() -> Self {
        Self {
            rotate: 0.3,
            swap: 0.5,
            leaf: 0.3,
        }
    }
}

/// Quad-tree partitioner parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Root cell side as a multiple of the square root of total area.
    pub root_scale: f64,
    /// Weight of the number of rectangles a cut crosses.
    pub crossing: f64,
    /// Weight of the summed vertical offsets of crossed rectangles.
    pub offset: f64,
    /// Weight of the distance to the next rectangle beyond the cut.
    pub gap: f64,
    /// Synthesize a bottom-left pre-placed anchor when the design has none.
    pub anchor: bool,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            root_scale: 1.5,
            crossing: 1.0,
            offset: 1.0,
            gap: 1.0,
            anchor: true,
        }
    }
}
