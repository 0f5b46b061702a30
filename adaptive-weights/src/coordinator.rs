//! Coordinator - facade over classification, weighting and aggregation
//!
//! The Coordinator owns:
//! - the participant registry and its policy table
//! - the regime classifier and a bounded history of its results
//! - the weight adjuster, regime multipliers and decision aggregator
//!
//! All operations are synchronous and safe to call from many threads at once.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::adjuster::{AdjustmentContext, WeightAdjuster, WeightPolicy};
use crate::aggregator::DecisionAggregator;
use crate::config::EngineConfig;
use crate::multipliers::RegimeMultiplierTable;
use crate::policy::LayerPolicyTable;
use crate::registry::{AgentRegistry, ParticipantRecord};
use crate::tracker::{ErrorTracker, RegimePerformance};
use common::{EngineError, IndicatorSnapshot, Layer, Result};
use market_analysis::{
    MarketClassifier, MarketPhase, RegimeHistory, RegimeResult, RegimeStatistics, RegimeTransition,
};

/// Outcome of one full classify, adjust and blend pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationReport {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub regime: RegimeResult,
    /// New raw weights of the participants that predicted
    pub updated_weights: BTreeMap<String, f64>,
    /// Normalized weights across every registered participant
    pub normalized_weights: BTreeMap<String, f64>,
    pub decision: f64,
    pub summary: String,
}

pub struct Coordinator {
    config: EngineConfig,
    registry: AgentRegistry,
    policies: LayerPolicyTable,
    multipliers: RegimeMultiplierTable,
    adjuster: WeightAdjuster,
    aggregator: DecisionAggregator,
    classifier: MarketClassifier,

    // Latest classification, used to tag errors
    current_regime: RwLock<Option<RegimeResult>>,
    history: Mutex<RegimeHistory>,
}

impl Default for Coordinator {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self::from_parts(config, LayerPolicyTable::builtin(), RegimeMultiplierTable::builtin())
    }
}

impl Coordinator {
    /// Build from a validated configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let policies = LayerPolicyTable::with_overrides(&config.layers)?;
        let multipliers = RegimeMultiplierTable::from_config(&config.regime_multipliers)?;
        Ok(Self::from_parts(config, policies, multipliers))
    }

    fn from_parts(
        config: EngineConfig,
        policies: LayerPolicyTable,
        multipliers: RegimeMultiplierTable,
    ) -> Self {
        let weights = &config.weights;
        let adjuster = WeightAdjuster::new(ErrorTracker::new(weights.error_window_size), weights.error_floor)
            .with_regime_conditioning(weights.regime_conditioned_errors);

        info!(
            window = weights.error_window_size,
            regime_conditioned = weights.regime_conditioned_errors,
            "Coordinator initialized"
        );

        Self {
            registry: AgentRegistry::new(weights.error_epsilon),
            history: Mutex::new(RegimeHistory::new(weights.regime_history_capacity)),
            classifier: MarketClassifier::new(config.market.clone()),
            current_regime: RwLock::new(None),
            aggregator: DecisionAggregator::new(),
            policies,
            multipliers,
            adjuster,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ==================== Registry ====================

    /// Register by layer name; unknown names fall back to the analyst layer
    pub fn register(&self, name: &str, layer: &str) -> Layer {
        let (layer, policy) = self.policies.resolve(layer);
        self.registry
            .register(name, policy, self.config.weights.initial_weight);
        layer
    }

    /// Returns `true` when the participant is new
    pub fn register_layer(&self, name: &str, layer: Layer) -> bool {
        self.registry.register(
            name,
            self.policies.get(layer),
            self.config.weights.initial_weight,
        )
    }

    pub fn record_prediction(&self, name: &str, value: f64) -> Result<()> {
        self.registry.record_prediction(name, value)
    }

    /// Record an outcome; the error is tagged with the current regime
    pub fn record_actual(&self, name: &str, value: f64) -> Result<Option<f64>> {
        let regime = self.current_regime.read().as_ref().map(|r| r.regime);
        self.registry.record_actual(name, value, regime)
    }

    /// Recompute and store one participant's weight
    pub fn update_weight(
        &self,
        name: &str,
        regime: Option<&RegimeResult>,
        market_volatility: Option<f64>,
    ) -> Result<f64> {
        let handle = self.registry.handle(name)?;
        let mut record = handle.lock();

        let policy = self.policies.get(record.layer);
        let context = AdjustmentContext {
            regime_multiplier: self.multipliers.multiplier(name, record.layer, regime),
            regime: regime.map(|r| r.regime),
            market_volatility,
        };
        let update = self.adjuster.compute(&record, policy, &context);

        let old = record.current_weight;
        record.weight_history.push(old);
        record.current_weight = update.weight;

        debug!(
            agent = %name,
            layer = %record.layer,
            old,
            new = update.weight,
            error = update.average_error,
            multiplier = update.multiplier,
            "Weight updated"
        );
        Ok(update.weight)
    }

    /// Update every registered participant
    pub fn update_all_weights(
        &self,
        regime: Option<&RegimeResult>,
        market_volatility: Option<f64>,
    ) -> Result<BTreeMap<String, f64>> {
        self.registry
            .names()
            .into_iter()
            .map(|name| {
                let weight = self.update_weight(&name, regime, market_volatility)?;
                Ok((name, weight))
            })
            .collect()
    }

    pub fn get_weight(&self, name: &str) -> Result<f64> {
        self.registry.get_weight(name)
    }

    /// Raw weights ordered by name
    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.registry.weights()
    }

    pub fn get_normalized_weights(&self) -> BTreeMap<String, f64> {
        self.aggregator.normalize(&self.registry.weights())
    }

    pub fn participant(&self, name: &str) -> Result<ParticipantRecord> {
        self.registry.snapshot(name)
    }

    pub fn participants(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Fresh record with the configured initial weight; the layer is kept
    pub fn reset(&self, name: &str) -> Result<()> {
        let layer = self.registry.snapshot(name)?.layer;
        self.registry.reset(
            name,
            self.policies.get(layer),
            self.config.weights.initial_weight,
        )
    }

    /// Registrations that fell back to the analyst layer
    pub fn layer_fallbacks(&self) -> u64 {
        self.policies.fallback_count()
    }

    pub fn regime_performance(&self, name: &str) -> Result<RegimePerformance> {
        let record = self.registry.snapshot(name)?;
        Ok(self.adjuster.tracker().regime_performance(&record))
    }

    // ==================== Regimes ====================

    /// Classify and remember the result as the current regime
    pub fn classify(&self, snapshot: &IndicatorSnapshot) -> RegimeResult {
        let result = self.classifier.classify(snapshot);

        let previous = self
            .current_regime
            .write()
            .replace(result.clone())
            .map(|r| r.regime);
        self.history.lock().record(&snapshot.symbol, &result);

        if previous != Some(result.regime) {
            info!(
                symbol = %snapshot.symbol,
                regime = %result.regime,
                confidence = result.confidence,
                "Regime changed"
            );
        }
        result
    }

    pub fn current_regime(&self) -> Option<RegimeResult> {
        self.current_regime.read().clone()
    }

    pub fn regime_transitions(&self, lookback: usize) -> Vec<RegimeTransition> {
        self.history.lock().transitions(lookback)
    }

    pub fn market_phase(&self) -> MarketPhase {
        self.history.lock().market_phase()
    }

    pub fn regime_statistics(&self) -> RegimeStatistics {
        self.history.lock().statistics()
    }

    // ==================== Decisions ====================

    /// Blend predictions with the current weights
    pub fn blended_decision(
        &self,
        predictions: &BTreeMap<String, f64>,
    ) -> Result<(f64, BTreeMap<String, f64>)> {
        self.aggregator.blend(predictions, &self.registry.weights())
    }

    /// Classify, record predictions, update their weights and blend.
    ///
    /// Every prediction is validated before anything is mutated.
    pub fn analyze_and_adjust(
        &self,
        snapshot: &IndicatorSnapshot,
        predictions: &BTreeMap<String, f64>,
    ) -> Result<CoordinationReport> {
        if predictions.is_empty() {
            warn!(symbol = %snapshot.symbol, "Pipeline called without predictions");
            return Err(EngineError::EmptyInput("predictions"));
        }
        for (name, value) in predictions {
            if !self.registry.contains(name) {
                warn!(agent = %name, "Unknown participant in pipeline");
                return Err(EngineError::UnknownAgent(name.clone()));
            }
            EngineError::check_finite("prediction", *value)?;
        }

        let regime = self.classify(snapshot);
        for (name, value) in predictions {
            self.registry.record_prediction(name, *value)?;
        }
        let mut updated_weights = BTreeMap::new();
        for name in predictions.keys() {
            let weight = self.update_weight(name, Some(&regime), None)?;
            updated_weights.insert(name.clone(), weight);
        }

        let (decision, _) = self.blended_decision(predictions)?;
        let raw = self.registry.weights();
        let normalized_weights = self.aggregator.normalize(&raw);
        let summary = summarize(&regime, &raw, &normalized_weights, decision);

        info!(
            symbol = %snapshot.symbol,
            regime = %regime.regime,
            decision,
            participants = updated_weights.len(),
            "Pipeline complete"
        );

        Ok(CoordinationReport {
            symbol: snapshot.symbol.clone(),
            timestamp: Utc::now(),
            regime,
            updated_weights,
            normalized_weights,
            decision,
            summary,
        })
    }
}

fn summarize(
    regime: &RegimeResult,
    raw: &BTreeMap<String, f64>,
    normalized: &BTreeMap<String, f64>,
    decision: f64,
) -> String {
    let top = normalized.iter().max_by(|a, b| a.1.total_cmp(b.1));

    let mean = raw.values().mean();
    let spread = if raw.len() > 1 {
        raw.values().std_dev()
    } else {
        0.0
    };

    match top {
        Some((name, share)) => format!(
            "{} ({:.0}% confidence), decision {:.4}; top participant {} at {:.1}%; weights {:.3} ± {:.3}",
            regime.regime,
            regime.confidence * 100.0,
            decision,
            name,
            *share * 100.0,
            mean,
            spread
        ),
        None => format!("{}, decision {:.4}", regime.regime, decision),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Indicators, MarketRegime};
    use market_analysis::VolumeProfile;

    fn predictions(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn assert_bounds(coordinator: &Coordinator) {
        for name in coordinator.participants() {
            let record = coordinator.participant(&name).unwrap();
            let policy = LayerPolicyTable::builtin().get(record.layer).clone();
            assert!(
                policy.contains(record.current_weight),
                "{} weight {} outside [{}, {}]",
                name,
                record.current_weight,
                policy.min_weight,
                policy.max_weight
            );
        }
    }

    fn volatile_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot::new("BTC", 100.0)
            .with_price_change(0.04)
            .with_indicators(Indicators {
                rsi: Some(75.0),
                atr: Some(2.5),
                ..Default::default()
            })
    }

    #[test]
    fn test_equal_weight_scenario() {
        let coordinator = Coordinator::default();
        for name in ["A", "B", "C"] {
            assert_eq!(coordinator.register(name, "analyst"), Layer::Analyst);
        }
        let preds = predictions(&[("A", 0.7), ("B", -0.2), ("C", 0.3)]);
        for (name, value) in &preds {
            coordinator.record_prediction(name, *value).unwrap();
        }

        let (decision, weights) = coordinator.blended_decision(&preds).unwrap();
        assert!((decision - 0.2667).abs() < 1e-4);
        for weight in weights.values() {
            assert!((weight - 0.333).abs() < 1e-3);
        }
    }

    #[test]
    fn test_blend_of_unregistered_participants_fails() {
        let coordinator = Coordinator::default();
        coordinator.register("A", "analyst");

        let ghosts = predictions(&[("ghost1", 5.0), ("ghost2", 7.0)]);
        assert_eq!(
            coordinator.blended_decision(&ghosts),
            Err(EngineError::UnknownAgent("ghost1".to_string()))
        );

        let mixed = predictions(&[("A", 0.4), ("ghost1", 5.0)]);
        let (decision, weights) = coordinator.blended_decision(&mixed).unwrap();
        assert!((decision - 0.4).abs() < 1e-12);
        assert_eq!(weights["ghost1"], 0.0);
    }

    #[test]
    fn test_update_weight_blends_and_clamps() {
        let coordinator = Coordinator::default();
        coordinator.register("alpha", "analyst");
        for _ in 0..3 {
            coordinator.record_prediction("alpha", 1.1).unwrap();
            coordinator.record_actual("alpha", 1.0).unwrap();
        }
        let record = coordinator.participant("alpha").unwrap();
        assert!(record.errors.iter().all(|e| (e - 0.1).abs() < 1e-9));

        // 1.0 * 0.7 + 10 * 0.3 = 3.7, clamped to 3.0
        let weight = coordinator.update_weight("alpha", None, None).unwrap();
        assert_eq!(weight, 3.0);
        assert_eq!(coordinator.participant("alpha").unwrap().weight_history, vec![1.0]);
    }

    #[test]
    fn test_round_trip_error() {
        let coordinator = Coordinator::default();
        coordinator.register("alpha", "analyst");
        coordinator.record_prediction("alpha", 1.20).unwrap();
        let error = coordinator.record_actual("alpha", 1.00).unwrap();
        assert!((error.unwrap() - 0.20).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_layer_falls_back_to_analyst() {
        let coordinator = Coordinator::default();
        assert_eq!(coordinator.register("quant", "quantitative"), Layer::Analyst);
        assert_eq!(coordinator.layer_fallbacks(), 1);
        assert_eq!(coordinator.participant("quant").unwrap().layer, Layer::Analyst);
    }

    #[test]
    fn test_errors_surface() {
        let coordinator = Coordinator::default();
        assert!(matches!(
            coordinator.update_weight("ghost", None, None),
            Err(EngineError::UnknownAgent(_))
        ));
        assert!(matches!(
            coordinator.blended_decision(&BTreeMap::new()),
            Err(EngineError::EmptyInput(_))
        ));
        coordinator.register("alpha", "analyst");
        assert!(coordinator.record_prediction("alpha", f64::NAN).is_err());
    }

    #[test]
    fn test_normalized_weights_idempotent() {
        let coordinator = Coordinator::default();
        coordinator.register("a", "analyst");
        coordinator.register("t", "trader");
        coordinator.record_prediction("a", 1.5).unwrap();
        coordinator.record_actual("a", 1.0).unwrap();
        coordinator.update_all_weights(None, None).unwrap();

        let first = coordinator.get_normalized_weights();
        let second = coordinator.get_normalized_weights();
        assert_eq!(first, second);
        assert!((first.values().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_hold_after_random_updates() {
        let coordinator = Coordinator::default();
        let layers = ["analyst", "researcher", "debator", "trader", "manager"];
        for (i, layer) in layers.iter().enumerate() {
            coordinator.register(&format!("p{}", i), layer);
        }
        let regime = coordinator.classify(&volatile_snapshot());

        let mut rng = fastrand::Rng::with_seed(7);
        for step in 0..200 {
            let name = format!("p{}", rng.usize(0..layers.len()));
            coordinator.record_prediction(&name, rng.f64() * 4.0 - 2.0).unwrap();
            coordinator.record_actual(&name, rng.f64() * 4.0 - 2.0).unwrap();

            let regime_arg = if step % 2 == 0 { Some(&regime) } else { None };
            let volatility = if step % 3 == 0 { Some(rng.f64() * 3.0) } else { None };
            coordinator.update_weight(&name, regime_arg, volatility).unwrap();
            assert_bounds(&coordinator);
        }
    }

    #[test]
    fn test_lower_error_gets_higher_weight() {
        let coordinator = Coordinator::default();
        coordinator.register("good", "researcher");
        coordinator.register("bad", "researcher");
        for _ in 0..5 {
            coordinator.record_prediction("good", 1.05).unwrap();
            coordinator.record_actual("good", 1.0).unwrap();
            coordinator.record_prediction("bad", 1.9).unwrap();
            coordinator.record_actual("bad", 1.0).unwrap();
        }
        let good = coordinator.update_weight("good", None, None).unwrap();
        let bad = coordinator.update_weight("bad", None, None).unwrap();
        assert!(good >= bad);
    }

    #[test]
    fn test_regime_multiplier_applies_by_name() {
        let coordinator = Coordinator::default();
        coordinator.register("news_analyst", "analyst");
        coordinator.register("other", "analyst");
        let regime = coordinator.classify(&volatile_snapshot());
        assert_eq!(regime.regime, MarketRegime::Volatile);

        // no errors yet: candidate 1.0, so only the multiplier moves the weight
        let news = coordinator.update_weight("news_analyst", Some(&regime), None).unwrap();
        let other = coordinator.update_weight("other", Some(&regime), None).unwrap();
        assert!((news - 1.4).abs() < 1e-9);
        assert!((other - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_errors_tagged_with_current_regime() {
        let coordinator = Coordinator::default();
        coordinator.register("alpha", "analyst");
        coordinator.classify(&volatile_snapshot());
        coordinator.record_prediction("alpha", 1.2).unwrap();
        coordinator.record_actual("alpha", 1.0).unwrap();

        let report = coordinator.regime_performance("alpha").unwrap();
        assert_eq!(report.best, Some(MarketRegime::Volatile));
        assert_eq!(report.by_regime[&MarketRegime::Volatile].samples, 1);
    }

    #[test]
    fn test_reset() {
        let coordinator = Coordinator::default();
        coordinator.register("alpha", "manager");
        coordinator.record_prediction("alpha", 1.0).unwrap();
        coordinator.reset("alpha").unwrap();

        let record = coordinator.participant("alpha").unwrap();
        assert_eq!(record.layer, Layer::Manager);
        assert!(record.predictions.is_empty());
        assert_eq!(record.current_weight, 1.0);
        assert!(coordinator.reset("ghost").is_err());
    }

    #[test]
    fn test_regime_history_tracking() {
        let coordinator = Coordinator::default();
        let quiet = IndicatorSnapshot::new("BTC", 100.0)
            .with_price_change(0.008)
            .with_indicators(Indicators {
                atr: Some(1.0),
                ..Default::default()
            });

        coordinator.classify(&quiet);
        coordinator.classify(&volatile_snapshot());
        coordinator.classify(&volatile_snapshot());

        let transitions = coordinator.regime_transitions(10);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, MarketRegime::Ranging);
        assert_eq!(transitions[0].to, MarketRegime::Volatile);
        assert_eq!(coordinator.market_phase(), MarketPhase::Volatile);
        assert_eq!(coordinator.regime_statistics().total_observations, 3);
        assert_eq!(coordinator.current_regime().unwrap().regime, MarketRegime::Volatile);
    }

    #[test]
    fn test_pipeline_validates_before_mutating() {
        let coordinator = Coordinator::default();
        coordinator.register("alpha", "analyst");

        let bad = predictions(&[("alpha", 0.5), ("ghost", 0.1)]);
        assert!(matches!(
            coordinator.analyze_and_adjust(&volatile_snapshot(), &bad),
            Err(EngineError::UnknownAgent(_))
        ));
        let nan = predictions(&[("alpha", f64::NAN)]);
        assert!(coordinator.analyze_and_adjust(&volatile_snapshot(), &nan).is_err());

        assert!(coordinator.participant("alpha").unwrap().predictions.is_empty());
        assert!(coordinator.current_regime().is_none());
    }

    #[test]
    fn test_pipeline_report() {
        let coordinator = Coordinator::default();
        coordinator.register("technical_analyst", "analyst");
        coordinator.register("desk", "trader");

        let mut snapshot = volatile_snapshot();
        snapshot.indicators.volume = Some(500.0);
        snapshot.indicators.volume_ma_20 = Some(1000.0);
        let preds = predictions(&[("technical_analyst", 0.4), ("desk", -0.1)]);
        let report = coordinator.analyze_and_adjust(&snapshot, &preds).unwrap();

        assert_eq!(report.symbol, "BTC");
        assert_eq!(report.regime.regime, MarketRegime::Volatile);
        assert_eq!(report.regime.volume.profile, VolumeProfile::Low);
        assert_eq!(report.updated_weights.len(), 2);
        assert!((report.normalized_weights.values().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(report.summary.contains("top participant"));
        assert_eq!(coordinator.participant("desk").unwrap().predictions, vec![-0.1]);
    }

    #[test]
    fn test_concurrent_updates() {
        let coordinator = Coordinator::default();
        let names: Vec<String> = (0..8).map(|i| format!("agent-{}", i)).collect();
        for (i, name) in names.iter().enumerate() {
            coordinator.register(name, Layer::ALL[i % Layer::ALL.len()].as_str());
        }

        std::thread::scope(|scope| {
            for name in &names {
                let coordinator = &coordinator;
                scope.spawn(move || {
                    for i in 0..100 {
                        let actual = 1.0 + (i % 7) as f64 * 0.1;
                        coordinator.record_prediction(name, actual * 1.1).unwrap();
                        coordinator.record_actual(name, actual).unwrap();
                        coordinator.update_weight(name, None, Some(0.5)).unwrap();
                    }
                });
            }
            // a shared participant hammered from two threads
            for _ in 0..2 {
                let coordinator = &coordinator;
                scope.spawn(move || {
                    for _ in 0..50 {
                        coordinator.update_weight("agent-0", None, None).unwrap();
                    }
                });
            }
        });

        for name in &names {
            let record = coordinator.participant(name).unwrap();
            assert_eq!(record.predictions.len(), 100);
            assert_eq!(record.errors.len(), 100);
        }
        assert_eq!(coordinator.participant("agent-0").unwrap().weight_history.len(), 200);
        assert_bounds(&coordinator);
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let mut config = EngineConfig::default();
        config.weights.error_window_size = 0;
        assert!(Coordinator::new(config).is_err());
        assert!(Coordinator::new(EngineConfig::default()).is_ok());
    }
}
