//! Adaptive simulated annealing over the forest.
//!
//! Each stage proposes up to `2 * times * n` perturbations, stopping early
//! after `times * n` uphill acceptances. A perturbation is packed and run
//! through the constraint engine; an infeasible repair restores the last
//! accepted state and draws again, up to `max_retries` times in a row.
//!
//! The first `local` stages run at the tiny temperature derived from
//! `init_avg`, which amounts to hill climbing. After that the temperature is
//! reseeded from `0.08 / avg_ratio` and cooled adaptively by
//! `exp(-lambda * T / sigma)`, where `sigma` is the standard deviation of the
//! stage's costs.

use crate::constraint::ConstraintKind;
use crate::cost::{CostBreakdown, CostModel};
use crate::data::Design;
use crate::engine::ConstraintEngine;
use crate::error::{PlaceError, PlaceResult};
use crate::forest::{Forest, ForestSnapshot};
use crate::perturb;
use qbplan_config::{AnnealConfig, MoveWeights};
use qbplan_diagnostics::{Category, Diagnostic, DiagnosticCode, DiagnosticSink};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fallback cooling multiplier when a stage's cost spread is degenerate.
const FALLBACK_COOLING: f64 = 0.9;

/// Why the annealer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The reject rate reached the convergence rate.
    Converged,
    /// The normalized temperature fell to `term_temp`.
    Cooled,
    /// `max_iterations` perturbations were spent.
    Budget,
    /// Zero or one module; nothing to search.
    Trivial,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Converged => "converged",
            Self::Cooled => "cooled enough",
            Self::Budget => "iteration budget exhausted",
            Self::Trivial => "trivial instance",
        })
    }
}

/// Counters collected during a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Accepted moves that lowered the cost.
    pub downhill: usize,
    /// Accepted moves that raised the cost.
    pub uphill: usize,
    /// Rejected moves.
    pub rejected: usize,
    /// Perturbations discarded because repair failed.
    pub infeasible: usize,
    /// Completed stages.
    pub stages: usize,
    /// Why the run stopped.
    pub termination: Termination,
    /// Mean cost over the normalization samples.
    pub normalization_mean: f64,
    /// Constraint records per kind.
    pub constraints: Vec<(ConstraintKind, usize)>,
}

impl RunStats {
    pub(crate) fn new(termination: Termination) -> Self {
        Self {
            downhill: 0,
            uphill: 0,
            rejected: 0,
            infeasible: 0,
            stages: 0,
            termination,
            normalization_mean: 0.0,
            constraints: Vec::new(),
        }
    }
}

/// Sample standard deviation; `NaN` for fewer than two samples.
fn std_dev(chain: &[f64]) -> f64 {
    let n = chain.len() as f64;
    let mean = chain.iter().sum::<f64>() / n;
    let sum: f64 = chain.iter().map(|c| (c - mean) * (c - mean)).sum();
    (sum / (n - 1.0)).sqrt()
}

/// The annealing driver for one design.
pub struct Annealer<'a> {
    design: &'a Design,
    engine: &'a ConstraintEngine,
    cost: &'a CostModel,
    config: &'a AnnealConfig,
    moves: &'a MoveWeights,
    sink: &'a DiagnosticSink,
}

impl<'a> Annealer<'a> {
    /// Creates a driver borrowing every collaborator for the run.
    pub fn new(
        design: &'a Design,
        engine: &'a ConstraintEngine,
        cost: &'a CostModel,
        config: &'a AnnealConfig,
        moves: &'a MoveWeights,
        sink: &'a DiagnosticSink,
    ) -> Self {
        Self {
            design,
            engine,
            cost,
            config,
            moves,
            sink,
        }
    }

    fn evaluate(&self, forest: &Forest) -> PlaceResult<CostBreakdown> {
        self.cost.evaluate(self.design, forest, self.engine)
    }

    fn repack(&self, forest: &mut Forest) -> PlaceResult<()> {
        forest.pack(self.design, self.engine.pack_rules())
    }

    /// Perturbs, packs, and repairs until a feasible neighbour is found.
    fn neighbour<R: Rng>(
        &self,
        forest: &mut Forest,
        last: &ForestSnapshot,
        stats: &mut RunStats,
        rng: &mut R,
    ) -> PlaceResult<CostBreakdown> {
        let mut attempts = 0;
        loop {
            perturb::perturb(forest, self.moves, rng)?;
            self.repack(forest)?;
            match self.engine.enforce(forest, self.design, rng) {
                Ok(_) => return self.evaluate(forest),
                Err(err) if err.is_recoverable() => {
                    attempts += 1;
                    stats.infeasible += 1;
                    forest.restore(last)?;
                    self.repack(forest)?;
                    if attempts >= self.config.max_retries {
                        return Err(PlaceError::RetryCeiling { attempts });
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Brings a freshly built forest into a feasible packed state.
    fn settle<R: Rng>(&self, forest: &mut Forest, rng: &mut R) -> PlaceResult<()> {
        self.repack(forest)?;
        let mut attempts = 0;
        loop {
            match self.engine.enforce(forest, self.design, rng) {
                Ok(_) => return Ok(()),
                Err(err) if err.is_recoverable() => {
                    attempts += 1;
                    if attempts >= self.config.max_retries {
                        return Err(PlaceError::RetryCeiling { attempts });
                    }
                    perturb::perturb(forest, self.moves, rng)?;
                    self.repack(forest)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Anneals `forest` and leaves it holding the best placement found.
    pub fn run<R: Rng>(&self, forest: &mut Forest, rng: &mut R) -> PlaceResult<(CostBreakdown, RunStats)> {
        let n = forest.modules().len();
        if n < 2 {
            self.repack(forest)?;
            let cost = self.evaluate(forest)?;
            return Ok((cost, RunStats::new(Termination::Trivial)));
        }
        let cfg = self.config;
        let mut stats = RunStats::new(Termination::Converged);

        // Normalization: the cheapest sample seeds both solution slots.
        self.settle(forest, rng)?;
        let initial = self.evaluate(forest)?;
        let mut best = forest.snapshot(initial.total);
        let mut last = best.clone();
        let mut sum = 0.0;
        for _ in 0..cfg.normalize_samples {
            let cost = self.neighbour(forest, &last, &mut stats, rng)?;
            sum += cost.total;
            if cost.total < best.cost {
                best = forest.snapshot(cost.total);
            }
            last = forest.snapshot(cost.total);
        }
        if cfg.normalize_samples > 0 {
            stats.normalization_mean = sum / cfg.normalize_samples as f64;
        }
        last = best.clone();
        forest.restore(&last)?;
        self.repack(forest)?;

        let moves_per_stage = cfg.times.saturating_mul(n).max(1);
        let ln_p = cfg.init_prob.ln();
        let estimate_avg = 0.08 / cfg.avg_ratio;
        let avg = if cfg.local == 0 { estimate_avg } else { cfg.init_avg };
        let mut temperature = -avg / ln_p;
        let mut normalized_t = 1.0;
        let mut conv_rate = 1.0;
        let mut spent = 0usize;
        let budget = (cfg.max_iterations > 0).then_some(cfg.max_iterations);
        let mut previous = last.cost;

        loop {
            stats.stages += 1;
            let stage = stats.stages;
            let (mut tried, mut uphill, mut rejected) = (0usize, 0usize, 0usize);
            let mut chain = Vec::with_capacity(moves_per_stage);

            while uphill < moves_per_stage && tried < 2 * moves_per_stage {
                if budget.is_some_and(|b| spent >= b) {
                    break;
                }
                tried += 1;
                spent += 1;
                let cost = self.neighbour(forest, &last, &mut stats, rng)?;
                let delta = cost.total - previous;
                chain.push(cost.total);

                let accept = delta <= 0.0 || rng.gen::<f64>() < (-delta / temperature).exp();
                if accept {
                    last = forest.snapshot(cost.total);
                    previous = cost.total;
                    if delta > 0.0 {
                        uphill += 1;
                        stats.uphill += 1;
                    } else if delta < 0.0 {
                        stats.downhill += 1;
                    }
                    if cost.total < best.cost {
                        best = last.clone();
                    }
                } else {
                    rejected += 1;
                    stats.rejected += 1;
                    forest.restore(&last)?;
                    self.repack(forest)?;
                }
            }

            let sigma = std_dev(&chain);
            let ratio = if sigma.is_finite() && sigma > 0.0 {
                (-cfg.lambda * temperature / sigma).exp()
            } else {
                FALLBACK_COOLING
            };
            temperature *= ratio;
            if stage == cfg.local {
                temperature = -estimate_avg / ln_p * FALLBACK_COOLING.powi(cfg.local as i32);
            }
            if stage >= cfg.local {
                normalized_t = (-estimate_avg / temperature).exp();
            }
            if stage > cfg.local {
                conv_rate = cfg.conv_rate;
            }
            let reject_rate = if tried > 0 {
                rejected as f64 / tried as f64
            } else {
                1.0
            };
            self.sink.emit(Diagnostic::note(
                DiagnosticCode::new(Category::Anneal, 101),
                format!(
                    "stage {stage}: T = {normalized_t:.4}, r = {ratio:.4}, reject rate = {reject_rate:.2}, best = {:.6}",
                    best.cost
                ),
            ));

            let exhausted = budget.is_some_and(|b| spent >= b) || tried == 0;
            if exhausted {
                stats.termination = Termination::Budget;
                break;
            }
            if reject_rate >= conv_rate {
                stats.termination = Termination::Converged;
                break;
            }
            if normalized_t <= cfg.term_temp || !(temperature.is_finite() && temperature > 0.0) {
                stats.termination = Termination::Cooled;
                break;
            }
        }

        self.sink.emit(Diagnostic::note(
            DiagnosticCode::new(Category::Anneal, 102),
            format!(
                "annealing stopped after {} stages: {}",
                stats.stages, stats.termination
            ),
        )
        .with_note(format!(
            "{} downhill, {} uphill, {} rejected, {} infeasible",
            stats.downhill, stats.uphill, stats.rejected, stats.infeasible
        )));

        forest.restore(&best)?;
        self.repack(forest)?;
        let cost = self.evaluate(forest)?;
        Ok((cost, stats))
    }
}
