// Hyper-parameter Search
// Random and grid search over weight adaptation parameters

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::adjuster::{AdjustmentContext, WeightAdjuster, WeightPolicy};
use crate::aggregator::DecisionAggregator;
use crate::policy::{LayerPolicy, LayerPolicyOverride};
use crate::registry::ParticipantRecord;
use crate::tracker::ErrorTracker;
use common::{EngineError, Layer, Result};

/// One candidate parameter set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuningParams {
    pub adjust_speed: f64,
    pub error_window_size: usize,
    pub min_weight: f64,
    pub max_weight: f64,
}

impl TuningParams {
    /// Policy for `layer` with these parameters applied
    pub fn apply_to(&self, layer: Layer) -> LayerPolicy {
        LayerPolicy {
            adjust_speed: self.adjust_speed,
            min_weight: self.min_weight,
            max_weight: self.max_weight,
            ..LayerPolicy::builtin(layer)
        }
    }

    /// Usable as a policy: speed in (0, 1], non-empty window, 0 < min < max
    pub fn is_coherent(&self) -> bool {
        self.adjust_speed > 0.0
            && self.adjust_speed <= 1.0
            && self.error_window_size > 0
            && self.min_weight > 0.0
            && self.min_weight < self.max_weight
    }
}

/// Sampling ranges for random search (inclusive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    pub adjust_speed: (f64, f64),
    pub error_window_size: (usize, usize),
    pub min_weight: (f64, f64),
    pub max_weight: (f64, f64),
}

impl Default for ParamBounds {
    fn default() -> Self {
        Self {
            adjust_speed: (0.01, 0.5),
            error_window_size: (5, 50),
            min_weight: (0.05, 0.3),
            max_weight: (2.0, 8.0),
        }
    }
}

/// Values tried by grid search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    pub adjust_speed: Vec<f64>,
    pub error_window_size: Vec<usize>,
    pub min_weight: Vec<f64>,
    pub max_weight: Vec<f64>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            adjust_speed: vec![0.05, 0.1, 0.2, 0.3],
            error_window_size: vec![10, 20, 30],
            min_weight: vec![0.1, 0.2, 0.3],
            max_weight: vec![3.0, 4.0, 5.0],
        }
    }
}

impl ParamGrid {
    fn combinations(&self) -> Vec<TuningParams> {
        let mut out = Vec::new();
        for &adjust_speed in &self.adjust_speed {
            for &error_window_size in &self.error_window_size {
                for &min_weight in &self.min_weight {
                    for &max_weight in &self.max_weight {
                        out.push(TuningParams {
                            adjust_speed,
                            error_window_size,
                            min_weight,
                            max_weight,
                        });
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub iteration: usize,
    pub params: TuningParams,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub best_params: TuningParams,
    pub best_score: f64,
    pub history: Vec<Trial>,
    /// Iteration at which the best score was last improved
    pub convergence_iteration: usize,
}

/// One replay step: what each participant predicted and what happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayStep {
    pub predictions: BTreeMap<String, f64>,
    pub actual: f64,
}

#[derive(Debug, Clone, Default)]
pub struct WeightOptimizer {
    bounds: ParamBounds,
}

impl WeightOptimizer {
    pub fn new(bounds: ParamBounds) -> Self {
        Self { bounds }
    }

    /// Score uniformly sampled parameter sets; higher scores win
    pub fn random_search<F>(&self, mut evaluate: F, iterations: usize, seed: u64) -> Result<OptimizationResult>
    where
        F: FnMut(&TuningParams) -> f64,
    {
        let mut rng = fastrand::Rng::with_seed(seed);
        let b = &self.bounds;
        let uniform = |rng: &mut fastrand::Rng, (low, high): (f64, f64)| low + rng.f64() * (high - low);

        let mut candidates = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let (lo, hi) = b.error_window_size;
            candidates.push(TuningParams {
                adjust_speed: uniform(&mut rng, b.adjust_speed),
                error_window_size: rng.usize(lo.min(hi)..=hi.max(lo)),
                min_weight: uniform(&mut rng, b.min_weight),
                max_weight: uniform(&mut rng, b.max_weight),
            });
        }
        search(candidates, &mut evaluate)
    }

    /// Score every coherent combination in `grid`
    pub fn grid_search<F>(&self, mut evaluate: F, grid: &ParamGrid) -> Result<OptimizationResult>
    where
        F: FnMut(&TuningParams) -> f64,
    {
        search(grid.combinations(), &mut evaluate)
    }
}

fn search<F>(candidates: Vec<TuningParams>, evaluate: &mut F) -> Result<OptimizationResult>
where
    F: FnMut(&TuningParams) -> f64,
{
    let mut best: Option<(TuningParams, f64, usize)> = None;
    let mut history = Vec::new();

    for params in candidates.into_iter().filter(TuningParams::is_coherent) {
        let iteration = history.len();
        let score = evaluate(&params);
        debug!(iteration, score, ?params, "Trial evaluated");
        history.push(Trial {
            iteration,
            params,
            score,
        });

        let improved = score.is_finite() && best.map_or(true, |(_, s, _)| score > s);
        if improved {
            best = Some((params, score, iteration));
        }
    }

    let (best_params, best_score, convergence_iteration) =
        best.ok_or(EngineError::EmptyInput("scored parameter sets"))?;
    info!(
        trials = history.len(),
        best_score,
        convergence_iteration,
        "Parameter search finished"
    );
    Ok(OptimizationResult {
        best_params,
        best_score,
        history,
        convergence_iteration,
    })
}

/// Evaluator that replays recorded steps for participants of one layer.
///
/// Each step blends the predictions with the current weights, then records
/// the actual and updates every participant's weight under the trial
/// parameters. The score is the negated mean absolute error of the blended
/// decisions, so more accurate parameter sets score higher. Incoherent
/// parameters score negative infinity.
pub fn replay_evaluator(layer: Layer, steps: &[ReplayStep]) -> impl Fn(&TuningParams) -> f64 + '_ {
    move |params: &TuningParams| {
        if !params.is_coherent() {
            debug!(?params, "Skipping incoherent parameters");
            return f64::NEG_INFINITY;
        }
        let policy = params.apply_to(layer);
        let adjuster = WeightAdjuster::new(ErrorTracker::new(params.error_window_size), 1e-3);
        let aggregator = DecisionAggregator::new();
        let mut records: BTreeMap<String, ParticipantRecord> = BTreeMap::new();
        let mut misses = Vec::with_capacity(steps.len());

        for step in steps {
            for name in step.predictions.keys() {
                records
                    .entry(name.clone())
                    .or_insert_with(|| ParticipantRecord::new(name.clone(), layer, policy.clamp(1.0)));
            }
            let weights: BTreeMap<String, f64> = records
                .iter()
                .map(|(name, record)| (name.clone(), record.current_weight))
                .collect();
            if let Ok((decision, _)) = aggregator.blend(&step.predictions, &weights) {
                misses.push((decision - step.actual).abs());
            }

            for (name, prediction) in &step.predictions {
                let Some(record) = records.get_mut(name) else { continue };
                record.predictions.push(*prediction);
                record.actuals.push(step.actual);
                record
                    .errors
                    .push((prediction - step.actual).abs() / step.actual.abs().max(1e-9));
                let update = adjuster.compute(record, &policy, &AdjustmentContext::default());
                record.weight_history.push(record.current_weight);
                record.current_weight = update.weight;
            }
        }

        if misses.is_empty() {
            f64::NEG_INFINITY
        } else {
            -misses.iter().mean()
        }
    }
}

/// Policy overrides suggested by each layer's realised performance scores
pub fn suggest_layer_overrides(
    performance: &BTreeMap<Layer, Vec<f64>>,
) -> BTreeMap<String, LayerPolicyOverride> {
    performance
        .iter()
        .filter(|(_, scores)| !scores.is_empty())
        .map(|(layer, scores)| {
            let mean = scores.iter().mean();
            let spread = if scores.len() > 1 {
                scores.iter().population_std_dev()
            } else {
                0.0
            };

            let (adjust_speed, min_weight, max_weight, mut tolerance) = if mean > 0.5 {
                (0.4, 0.3, 3.0, 1.0)
            } else if mean > 0.0 {
                (0.6, 0.2, 2.5, 0.8)
            } else {
                (0.2, 0.1, 2.0, 1.2)
            };
            if spread > 0.3 {
                tolerance *= 1.5;
            }

            (
                layer.to_string(),
                LayerPolicyOverride {
                    adjust_speed: Some(adjust_speed),
                    min_weight: Some(min_weight),
                    max_weight: Some(max_weight),
                    error_metric: None,
                    volatility_tolerance: Some(tolerance),
                },
            )
        })
        .collect()
}
