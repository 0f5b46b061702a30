//! Per-layer weight adjustment policies

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use common::{EngineError, Layer, Result};

/// How a participant's rolling error turns into a candidate weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMetric {
    /// Candidate is the inverse of the relative error
    RatioError,
    /// Rolling error read as an error rate against 0.5
    BinaryCorrectness,
    /// Lower error maps linearly onto a higher payoff weight
    PnlBased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerPolicy {
    pub layer: Layer,
    /// Fraction of the candidate weight blended in per update
    pub adjust_speed: f64,
    pub min_weight: f64,
    pub max_weight: f64,
    pub error_metric: ErrorMetric,
    pub volatility_tolerance: f64,
}

impl LayerPolicy {
    /// Built-in defaults per layer
    pub fn builtin(layer: Layer) -> Self {
        let (adjust_speed, min_weight, max_weight, error_metric, volatility_tolerance) = match layer {
            Layer::Analyst => (0.3, 0.2, 3.0, ErrorMetric::RatioError, 0.8),
            Layer::Researcher => (0.5, 0.1, 2.5, ErrorMetric::BinaryCorrectness, 1.2),
            Layer::Debator => (0.2, 0.3, 2.0, ErrorMetric::RatioError, 0.5),
            Layer::Trader => (0.1, 0.5, 4.0, ErrorMetric::PnlBased, 1.0),
            Layer::Manager => (0.4, 0.8, 2.0, ErrorMetric::RatioError, 1.0),
        };
        Self {
            layer,
            adjust_speed,
            min_weight,
            max_weight,
            error_metric,
            volatility_tolerance,
        }
    }

    /// Pull `weight` into `[min_weight, max_weight]`. Inverted bounds
    /// resolve to `min_weight`.
    pub fn clamp(&self, weight: f64) -> f64 {
        weight.min(self.max_weight).max(self.min_weight)
    }

    pub fn contains(&self, weight: f64) -> bool {
        weight >= self.min_weight && weight <= self.max_weight
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(EngineError::InvalidConfig(msg));
        if !(self.adjust_speed > 0.0 && self.adjust_speed <= 1.0) {
            return fail(format!(
                "{}: adjust_speed must be in (0, 1], got {}",
                self.layer, self.adjust_speed
            ));
        }
        if !(self.min_weight.is_finite() && self.max_weight.is_finite())
            || self.min_weight <= 0.0
            || self.min_weight > self.max_weight
        {
            return fail(format!(
                "{}: weight bounds must satisfy 0 < min <= max, got [{}, {}]",
                self.layer, self.min_weight, self.max_weight
            ));
        }
        if !(self.volatility_tolerance.is_finite() && self.volatility_tolerance > 0.0) {
            return fail(format!(
                "{}: volatility_tolerance must be positive, got {}",
                self.layer, self.volatility_tolerance
            ));
        }
        Ok(())
    }

    fn apply(&mut self, overrides: &LayerPolicyOverride) {
        if let Some(v) = overrides.adjust_speed {
            self.adjust_speed = v;
        }
        if let Some(v) = overrides.min_weight {
            self.min_weight = v;
        }
        if let Some(v) = overrides.max_weight {
            self.max_weight = v;
        }
        if let Some(v) = overrides.error_metric {
            self.error_metric = v;
        }
        if let Some(v) = overrides.volatility_tolerance {
            self.volatility_tolerance = v;
        }
    }
}

/// Partial policy read from configuration; unset fields keep the built-in value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerPolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_metric: Option<ErrorMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility_tolerance: Option<f64>,
}

/// Policy lookup with an observable analyst fallback
#[derive(Debug)]
pub struct LayerPolicyTable {
    /// Indexed by layer declaration order
    policies: [LayerPolicy; 5],
    fallbacks: AtomicU64,
}

impl Default for LayerPolicyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LayerPolicyTable {
    pub fn builtin() -> Self {
        Self {
            policies: Layer::ALL.map(LayerPolicy::builtin),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Built-in table with configured overrides applied and validated
    pub fn with_overrides(overrides: &BTreeMap<String, LayerPolicyOverride>) -> Result<Self> {
        let mut table = Self::builtin();
        for (name, layer_override) in overrides {
            let layer: Layer = name
                .parse()
                .map_err(|_| EngineError::InvalidConfig(format!("unknown layer in policy overrides: {}", name)))?;
            table.policies[layer as usize].apply(layer_override);
        }
        for policy in &table.policies {
            policy.validate()?;
        }
        Ok(table)
    }

    pub fn get(&self, layer: Layer) -> &LayerPolicy {
        &self.policies[layer as usize]
    }

    /// Parse a layer name, falling back to the analyst layer on unknown names
    pub fn resolve(&self, name: &str) -> (Layer, &LayerPolicy) {
        let layer = match name.parse::<Layer>() {
            Ok(layer) => layer,
            Err(e) => {
                let total = self.fallbacks.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(requested = %name, error = %e, fallbacks = total, "Falling back to analyst policy");
                Layer::Analyst
            }
        };
        (layer, self.get(layer))
    }

    /// Number of lookups that fell back to the analyst policy
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerPolicy> {
        self.policies.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        let table = LayerPolicyTable::builtin();

        let analyst = table.get(Layer::Analyst);
        assert_eq!(analyst.adjust_speed, 0.3);
        assert_eq!((analyst.min_weight, analyst.max_weight), (0.2, 3.0));
        assert_eq!(analyst.error_metric, ErrorMetric::RatioError);

        let trader = table.get(Layer::Trader);
        assert_eq!(trader.error_metric, ErrorMetric::PnlBased);
        assert_eq!(trader.max_weight, 4.0);

        assert_eq!(table.get(Layer::Researcher).error_metric, ErrorMetric::BinaryCorrectness);
        assert!(table.iter().all(|p| p.validate().is_ok()));
    }

    #[test]
    fn test_unknown_layer_falls_back_observably() {
        let table = LayerPolicyTable::builtin();
        assert_eq!(table.fallback_count(), 0);

        let (layer, policy) = table.resolve("Trader");
        assert_eq!(layer, Layer::Trader);
        assert_eq!(policy.layer, Layer::Trader);
        assert_eq!(table.fallback_count(), 0);

        let (layer, policy) = table.resolve("quant");
        assert_eq!(layer, Layer::Analyst);
        assert_eq!(policy.adjust_speed, 0.3);
        assert_eq!(table.fallback_count(), 1);
    }

    #[test]
    fn test_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "trader".to_string(),
            LayerPolicyOverride {
                adjust_speed: Some(0.25),
                ..Default::default()
            },
        );
        let table = LayerPolicyTable::with_overrides(&overrides).unwrap();
        assert_eq!(table.get(Layer::Trader).adjust_speed, 0.25);
        assert_eq!(table.get(Layer::Trader).max_weight, 4.0);

        overrides.insert(
            "analyst".to_string(),
            LayerPolicyOverride {
                min_weight: Some(5.0),
                ..Default::default()
            },
        );
        assert!(LayerPolicyTable::with_overrides(&overrides).is_err());

        let mut unknown = BTreeMap::new();
        unknown.insert("quant".to_string(), LayerPolicyOverride::default());
        assert!(matches!(
            LayerPolicyTable::with_overrides(&unknown),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_clamp() {
        let policy = LayerPolicy::builtin(Layer::Manager);
        assert_eq!(policy.clamp(0.1), 0.8);
        assert_eq!(policy.clamp(5.0), 2.0);
        assert!(policy.contains(1.5));

        let inverted = LayerPolicy {
            min_weight: 3.0,
            max_weight: 2.0,
            ..policy
        };
        assert_eq!(inverted.clamp(2.5), 3.0);
    }
}
