// Decision Aggregation
// Normalized weights and weighted blending of participant predictions

use std::collections::BTreeMap;
use tracing::warn;

use common::{EngineError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionAggregator;

impl DecisionAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Divide each weight by the total; uniform when the total is not a positive number
    pub fn normalize(&self, weights: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        if weights.is_empty() {
            return BTreeMap::new();
        }

        let total: f64 = weights.values().sum();
        if !total.is_finite() || total <= 0.0 {
            let uniform = 1.0 / weights.len() as f64;
            return weights.keys().map(|k| (k.clone(), uniform)).collect();
        }

        weights
            .iter()
            .map(|(name, weight)| (name.clone(), weight / total))
            .collect()
    }

    /// Weighted sum of predictions, with weights normalized over the predicting participants.
    ///
    /// Returns the blended value and the normalized weights used.
    pub fn blend(
        &self,
        predictions: &BTreeMap<String, f64>,
        weights: &BTreeMap<String, f64>,
    ) -> Result<(f64, BTreeMap<String, f64>)> {
        if predictions.is_empty() {
            warn!("Blend requested with no predictions");
            return Err(EngineError::EmptyInput("predictions"));
        }
        if let Some((name, value)) = predictions.iter().find(|(_, v)| !v.is_finite()) {
            warn!(agent = %name, value, "Non-finite prediction in blend");
            return Err(EngineError::InvalidValue {
                field: "prediction",
                value: *value,
            });
        }

        let active: BTreeMap<String, f64> = predictions
            .keys()
            .map(|name| {
                let weight = match weights.get(name) {
                    Some(w) if w.is_finite() => *w,
                    _ => {
                        warn!(agent = %name, "No weight for prediction, counting it as zero");
                        0.0
                    }
                };
                (name.clone(), weight)
            })
            .collect();

        if !predictions
            .keys()
            .any(|name| weights.get(name).is_some_and(|w| w.is_finite()))
        {
            let first = predictions.keys().next().cloned().unwrap_or_default();
            warn!(agent = %first, "No prediction has a weight, refusing to blend");
            return Err(EngineError::UnknownAgent(first));
        }

        let normalized = self.normalize(&active);
        let blended: f64 = predictions
            .iter()
            .map(|(name, prediction)| prediction * normalized.get(name).copied().unwrap_or(0.0))
            .sum();

        Ok((blended, normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_normalize_sums_to_one() {
        let agg = DecisionAggregator::new();
        let normalized = agg.normalize(&map(&[("a", 2.0), ("b", 1.0), ("c", 1.0)]));

        let total: f64 = normalized.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((normalized["a"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_degenerate_is_uniform() {
        let agg = DecisionAggregator::new();
        for weights in [
            map(&[("a", 0.0), ("b", 0.0)]),
            map(&[("a", -1.0), ("b", 0.5)]),
            map(&[("a", f64::INFINITY), ("b", 1.0)]),
        ] {
            let normalized = agg.normalize(&weights);
            assert!(normalized.values().all(|w| (w - 0.5).abs() < 1e-12));
        }
        assert!(agg.normalize(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_equal_weight_blend() {
        let agg = DecisionAggregator::new();
        let predictions = map(&[("A", 0.7), ("B", -0.2), ("C", 0.3)]);
        let weights = map(&[("A", 1.0), ("B", 1.0), ("C", 1.0)]);

        let (decision, used) = agg.blend(&predictions, &weights).unwrap();
        assert!((decision - 0.8 / 3.0).abs() < 1e-9);
        assert!((decision - 0.2667).abs() < 1e-4);
        assert!(used.values().all(|w| (w - 1.0 / 3.0).abs() < 1e-9));
    }

    #[test]
    fn test_missing_and_extra_weights() {
        let agg = DecisionAggregator::new();
        let predictions = map(&[("A", 1.0), ("B", 3.0)]);
        let weights = map(&[("A", 2.0), ("Z", 100.0)]);

        let (decision, used) = agg.blend(&predictions, &weights).unwrap();
        assert!((decision - 1.0).abs() < 1e-12);
        assert_eq!(used.len(), 2);
        assert_eq!(used["B"], 0.0);
        assert!(!used.contains_key("Z"));
    }

    #[test]
    fn test_blend_without_any_known_weight() {
        let agg = DecisionAggregator::new();
        let predictions = map(&[("ghost1", 5.0), ("ghost2", 7.0)]);
        let weights = map(&[("A", 1.0)]);

        assert_eq!(
            agg.blend(&predictions, &weights),
            Err(EngineError::UnknownAgent("ghost1".to_string()))
        );
        assert!(agg
            .blend(&predictions, &map(&[("ghost1", f64::NAN)]))
            .is_err());
    }

    #[test]
    fn test_blend_errors() {
        let agg = DecisionAggregator::new();
        assert_eq!(
            agg.blend(&BTreeMap::new(), &BTreeMap::new()),
            Err(EngineError::EmptyInput("predictions"))
        );
        assert!(matches!(
            agg.blend(&map(&[("A", f64::NAN)]), &map(&[("A", 1.0)])),
            Err(EngineError::InvalidValue { .. })
        ));
    }
}
