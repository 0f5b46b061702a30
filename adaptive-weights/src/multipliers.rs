// Regime Multipliers
// Per-participant and per-layer weight bias under each market regime

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use common::{EngineError, Layer, MarketRegime, Result};
use market_analysis::RegimeResult;

fn default_global_multiplier() -> f64 {
    1.0
}

fn default_include_builtin() -> bool {
    true
}

/// Multiplier settings as read from configuration.
///
/// Keys are plain strings (participant names, layer names, regime names) so
/// the section reads the same from TOML and from environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeMultiplierConfig {
    /// Applied when neither the participant nor its layer has an entry
    #[serde(default = "default_global_multiplier")]
    pub global_default: f64,

    /// Blend multipliers toward 1.0 by classification confidence
    #[serde(default)]
    pub scale_by_confidence: bool,

    /// Seed the table with the built-in analyst rules
    #[serde(default = "default_include_builtin")]
    pub include_builtin: bool,

    #[serde(default)]
    pub agents: BTreeMap<String, BTreeMap<String, f64>>,

    #[serde(default)]
    pub layers: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Default for RegimeMultiplierConfig {
    fn default() -> Self {
        Self {
            global_default: 1.0,
            scale_by_confidence: false,
            include_builtin: true,
            agents: BTreeMap::new(),
            layers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegimeMultiplierTable {
    agents: HashMap<String, HashMap<MarketRegime, f64>>,
    layers: HashMap<Layer, HashMap<MarketRegime, f64>>,
    global_default: f64,
    scale_by_confidence: bool,
}

impl Default for RegimeMultiplierTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RegimeMultiplierTable {
    /// Table with no entries: every lookup yields 1.0
    pub fn neutral() -> Self {
        Self {
            agents: HashMap::new(),
            layers: HashMap::new(),
            global_default: 1.0,
            scale_by_confidence: false,
        }
    }

    /// Analyst specialisations: macro and technical reads pay off in trends,
    /// news and quantitative reads in volatile markets
    pub fn builtin() -> Self {
        use MarketRegime::*;

        let mut table = Self::neutral();
        let rules: [(&str, &[(MarketRegime, f64)]); 4] = [
            ("macro_analyst", &[(TrendingBull, 1.3), (TrendingBear, 1.3)]),
            ("news_analyst", &[(Volatile, 1.4)]),
            (
                "technical_analyst",
                &[(TrendingBull, 1.6), (TrendingBear, 1.6), (Breakout, 1.7), (Ranging, 1.4)],
            ),
            ("quantitative_analyst", &[(Volatile, 1.6), (Ranging, 1.3)]),
        ];
        for (agent, entries) in rules {
            table
                .agents
                .insert(agent.to_string(), entries.iter().copied().collect());
        }
        table
    }

    pub fn from_config(config: &RegimeMultiplierConfig) -> Result<Self> {
        let mut table = if config.include_builtin {
            Self::builtin()
        } else {
            Self::neutral()
        };
        table.global_default = check_multiplier("global_default", config.global_default)?;
        table.scale_by_confidence = config.scale_by_confidence;

        for (agent, entries) in &config.agents {
            let parsed = parse_entries(agent, entries)?;
            table.agents.entry(agent.clone()).or_default().extend(parsed);
        }
        for (layer_name, entries) in &config.layers {
            let layer: Layer = layer_name.parse().map_err(|_| {
                EngineError::InvalidConfig(format!("unknown layer in regime multipliers: {}", layer_name))
            })?;
            let parsed = parse_entries(layer_name, entries)?;
            table.layers.entry(layer).or_default().extend(parsed);
        }
        Ok(table)
    }

    pub fn set_agent(&mut self, agent: &str, regime: MarketRegime, multiplier: f64) {
        self.agents
            .entry(agent.to_string())
            .or_default()
            .insert(regime, multiplier);
    }

    pub fn set_layer(&mut self, layer: Layer, regime: MarketRegime, multiplier: f64) {
        self.layers.entry(layer).or_default().insert(regime, multiplier);
    }

    /// Exact participant name, then layer, then the global default
    pub fn lookup(&self, agent: &str, layer: Layer, regime: MarketRegime) -> f64 {
        self.agents
            .get(agent)
            .and_then(|entries| entries.get(&regime))
            .or_else(|| self.layers.get(&layer).and_then(|entries| entries.get(&regime)))
            .copied()
            .unwrap_or(self.global_default)
    }

    /// Multiplier for an update; 1.0 without regime context
    pub fn multiplier(&self, agent: &str, layer: Layer, regime: Option<&RegimeResult>) -> f64 {
        let Some(result) = regime else {
            return 1.0;
        };
        let raw = self.lookup(agent, layer, result.regime);
        if self.scale_by_confidence {
            1.0 + (raw - 1.0) * result.confidence.clamp(0.0, 1.0)
        } else {
            raw
        }
    }
}

fn parse_entries(owner: &str, entries: &BTreeMap<String, f64>) -> Result<HashMap<MarketRegime, f64>> {
    entries
        .iter()
        .map(|(name, value)| {
            let regime: MarketRegime = name.parse()?;
            let value = check_multiplier(owner, *value)?;
            Ok((regime, value))
        })
        .collect()
}

fn check_multiplier(owner: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(EngineError::InvalidConfig(format!(
            "{}: regime multiplier must be positive, got {}",
            owner, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::IndicatorSnapshot;
    use market_analysis::MarketClassifier;

    #[test]
    fn test_builtin_rules() {
        let table = RegimeMultiplierTable::builtin();
        assert_eq!(table.lookup("technical_analyst", Layer::Analyst, MarketRegime::Breakout), 1.7);
        assert_eq!(table.lookup("news_analyst", Layer::Analyst, MarketRegime::Volatile), 1.4);
        assert_eq!(table.lookup("news_analyst", Layer::Analyst, MarketRegime::Ranging), 1.0);
        // no substring matching on names
        assert_eq!(table.lookup("my_news_analyst_v2", Layer::Analyst, MarketRegime::Volatile), 1.0);
    }

    #[test]
    fn test_lookup_precedence() {
        let mut table = RegimeMultiplierTable::neutral();
        table.set_layer(Layer::Trader, MarketRegime::Volatile, 0.8);
        table.set_agent("desk_a", MarketRegime::Volatile, 1.2);

        assert_eq!(table.lookup("desk_a", Layer::Trader, MarketRegime::Volatile), 1.2);
        assert_eq!(table.lookup("desk_b", Layer::Trader, MarketRegime::Volatile), 0.8);
        assert_eq!(table.lookup("desk_b", Layer::Analyst, MarketRegime::Volatile), 1.0);
    }

    #[test]
    fn test_no_regime_means_no_bias() {
        let table = RegimeMultiplierTable::builtin();
        assert_eq!(table.multiplier("technical_analyst", Layer::Analyst, None), 1.0);
    }

    #[test]
    fn test_confidence_scaling() {
        let config = RegimeMultiplierConfig {
            scale_by_confidence: true,
            ..Default::default()
        };
        let table = RegimeMultiplierTable::from_config(&config).unwrap();

        let snapshot = IndicatorSnapshot::new("TEST", 100.0).with_price_change(0.0001);
        let result = MarketClassifier::default().classify(&snapshot);
        assert_eq!(result.regime, MarketRegime::Uncertain);

        let mut ranging = result.clone();
        ranging.regime = MarketRegime::Ranging;
        ranging.confidence = 0.5;
        let m = table.multiplier("technical_analyst", Layer::Analyst, Some(&ranging));
        assert!((m - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_from_config() {
        let mut config = RegimeMultiplierConfig {
            include_builtin: false,
            global_default: 0.9,
            ..Default::default()
        };
        config
            .layers
            .insert("researcher".to_string(), BTreeMap::from([("breakout".to_string(), 1.5)]));
        let table = RegimeMultiplierTable::from_config(&config).unwrap();

        assert_eq!(table.lookup("technical_analyst", Layer::Analyst, MarketRegime::Breakout), 0.9);
        assert_eq!(table.lookup("r1", Layer::Researcher, MarketRegime::Breakout), 1.5);

        config
            .agents
            .insert("x".to_string(), BTreeMap::from([("sideways".to_string(), 1.5)]));
        assert!(RegimeMultiplierTable::from_config(&config).is_err());

        let bad = RegimeMultiplierConfig {
            global_default: -1.0,
            ..Default::default()
        };
        assert!(RegimeMultiplierTable::from_config(&bad).is_err());
    }
}
