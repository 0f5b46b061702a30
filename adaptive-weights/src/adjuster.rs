//! Bounded weight adaptation
//!
//! A participant's rolling error becomes a candidate weight according to its
//! layer's error metric. The candidate is blended with the current weight at
//! the layer's adjust speed, biased by the regime multiplier, damped by market
//! volatility and finally clamped into the layer's bounds.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::policy::{ErrorMetric, LayerPolicy};
use crate::registry::ParticipantRecord;
use crate::tracker::ErrorTracker;
use common::MarketRegime;

/// Inputs to one weight update beyond the record and its policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentContext {
    pub regime_multiplier: f64,
    /// Regime used for regime-conditioned errors
    pub regime: Option<MarketRegime>,
    pub market_volatility: Option<f64>,
}

impl Default for AdjustmentContext {
    fn default() -> Self {
        Self {
            regime_multiplier: 1.0,
            regime: None,
            market_volatility: None,
        }
    }
}

/// Every intermediate of one weight update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightComputation {
    pub average_error: f64,
    pub candidate: f64,
    pub blended: f64,
    pub multiplier: f64,
    /// `volatility / tolerance` when volatility damping applied
    pub volatility_divisor: Option<f64>,
    pub weight: f64,
    /// Whether the bounds changed the value
    pub clamped: bool,
}

/// Seam for alternative weighting schemes
pub trait WeightPolicy: Send + Sync {
    fn compute(
        &self,
        record: &ParticipantRecord,
        policy: &LayerPolicy,
        context: &AdjustmentContext,
    ) -> WeightComputation;
}

#[derive(Debug, Clone, Copy)]
pub struct WeightAdjuster {
    tracker: ErrorTracker,
    /// Substitute for a zero or non-finite rolling error
    error_floor: f64,
    regime_conditioned: bool,
}

impl Default for WeightAdjuster {
    fn default() -> Self {
        Self::new(ErrorTracker::default(), 1e-3)
    }
}

impl WeightAdjuster {
    pub fn new(tracker: ErrorTracker, error_floor: f64) -> Self {
        Self {
            tracker,
            error_floor,
            regime_conditioned: false,
        }
    }

    /// Use errors observed under the current regime when available
    pub fn with_regime_conditioning(mut self, enabled: bool) -> Self {
        self.regime_conditioned = enabled;
        self
    }

    pub fn tracker(&self) -> &ErrorTracker {
        &self.tracker
    }

    /// New clamped weight for `record` under `policy`
    pub fn compute_weight(
        &self,
        record: &ParticipantRecord,
        policy: &LayerPolicy,
        regime_multiplier: f64,
    ) -> f64 {
        let context = AdjustmentContext {
            regime_multiplier,
            ..Default::default()
        };
        self.compute(record, policy, &context).weight
    }

    fn rolling_error(&self, record: &ParticipantRecord, regime: Option<MarketRegime>) -> f64 {
        let error = match regime {
            Some(regime) if self.regime_conditioned => self.tracker.error_for_regime(record, regime),
            _ => self.tracker.average_error(record),
        };
        if error.is_finite() && error > 0.0 {
            error
        } else {
            self.error_floor
        }
    }
}

fn candidate_weight(metric: ErrorMetric, error: f64) -> f64 {
    match metric {
        ErrorMetric::RatioError => 1.0 / error,
        ErrorMetric::BinaryCorrectness => {
            if error < 0.5 {
                2.0
            } else {
                0.5
            }
        }
        ErrorMetric::PnlBased => 1.0 + (1.0 - error) * 2.0,
    }
}

impl WeightPolicy for WeightAdjuster {
    fn compute(
        &self,
        record: &ParticipantRecord,
        policy: &LayerPolicy,
        context: &AdjustmentContext,
    ) -> WeightComputation {
        let average_error = self.rolling_error(record, context.regime);
        let candidate = candidate_weight(policy.error_metric, average_error);
        let blended =
            record.current_weight * (1.0 - policy.adjust_speed) + candidate * policy.adjust_speed;

        let multiplier = if context.regime_multiplier.is_finite() && context.regime_multiplier > 0.0 {
            context.regime_multiplier
        } else {
            1.0
        };
        let mut raw = blended * multiplier;

        let volatility_divisor = context
            .market_volatility
            .filter(|v| v.is_finite() && *v > 0.0)
            .map(|v| v / policy.volatility_tolerance);
        if let Some(divisor) = volatility_divisor {
            raw /= divisor;
        }

        // NaN would survive clamp
        let weight = if raw.is_finite() {
            policy.clamp(raw)
        } else {
            policy.clamp(record.current_weight)
        };

        debug!(
            agent = %record.name,
            layer = %policy.layer,
            average_error,
            candidate,
            multiplier,
            weight,
            "Weight computed"
        );

        WeightComputation {
            average_error,
            candidate,
            blended,
            multiplier,
            volatility_divisor,
            weight,
            clamped: weight != raw,
        }
    }
}
