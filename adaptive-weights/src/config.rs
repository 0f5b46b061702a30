//! Engine configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::multipliers::RegimeMultiplierConfig;
use crate::policy::LayerPolicyOverride;
use common::{EngineError, Result};
use market_analysis::MarketAnalysisConfig;

/// Environment prefix for layered overrides, e.g. `ADAPTIVE__WEIGHTS__ERROR_WINDOW_SIZE=50`
pub const ENV_PREFIX: &str = "ADAPTIVE";

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Weight tracking settings
    #[serde(default)]
    pub weights: WeightSettings,

    /// Per-layer policy overrides keyed by layer name
    #[serde(default)]
    pub layers: BTreeMap<String, LayerPolicyOverride>,

    /// Regime bias applied on weight updates
    #[serde(default)]
    pub regime_multipliers: RegimeMultiplierConfig,

    /// Classifier thresholds
    #[serde(default)]
    pub market: MarketAnalysisConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.market.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSettings {
    /// Weight given to a newly registered participant (before clamping)
    #[serde(default = "default_initial_weight")]
    pub initial_weight: f64,

    /// Number of recent errors in the rolling average
    #[serde(default = "default_error_window_size")]
    pub error_window_size: usize,

    /// Denominator floor for relative errors
    #[serde(default = "default_error_epsilon")]
    pub error_epsilon: f64,

    /// Substitute for a zero or non-finite rolling error
    #[serde(default = "default_error_floor")]
    pub error_floor: f64,

    /// Prefer errors observed under the current regime
    #[serde(default)]
    pub regime_conditioned_errors: bool,

    /// Classifications kept for transition queries
    #[serde(default = "default_regime_history_capacity")]
    pub regime_history_capacity: usize,
}

impl Default for WeightSettings {
    fn default() -> Self {
        Self {
            initial_weight: 1.0,
            error_window_size: 20,
            error_epsilon: 1e-9,
            error_floor: 1e-3,
            regime_conditioned_errors: false,
            regime_history_capacity: 1000,
        }
    }
}

impl WeightSettings {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(EngineError::InvalidConfig(msg.to_string()));
        if !(self.initial_weight.is_finite() && self.initial_weight > 0.0) {
            return fail("initial_weight must be positive");
        }
        if self.error_window_size == 0 {
            return fail("error_window_size must be at least 1");
        }
        if !(self.error_epsilon.is_finite() && self.error_epsilon > 0.0) {
            return fail("error_epsilon must be positive");
        }
        if !(self.error_floor.is_finite() && self.error_floor > 0.0) {
            return fail("error_floor must be positive");
        }
        if self.regime_history_capacity == 0 {
            return fail("regime_history_capacity must be at least 1");
        }
        Ok(())
    }
}

fn default_initial_weight() -> f64 {
    1.0
}

fn default_error_window_size() -> usize {
    20
}

fn default_error_epsilon() -> f64 {
    1e-9
}

fn default_error_floor() -> f64 {
    1e-3
}

fn default_regime_history_capacity() -> usize {
    1000
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<EngineConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: EngineConfig =
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &EngineConfig, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let path = path.as_ref();
    let content = toml::to_string_pretty(config).context("serializing config")?;
    std::fs::write(path, content).with_context(|| format!("writing config {}", path.display()))?;
    Ok(())
}

/// File (optional) overlaid with `ADAPTIVE__`-prefixed environment variables
pub fn load_layered(path: impl AsRef<Path>) -> anyhow::Result<EngineConfig> {
    let path = path.as_ref();
    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("building layered config")?;
    let config: EngineConfig = settings
        .try_deserialize()
        .context("deserializing layered config")?;
    config.validate()?;
    Ok(config)
}

/// Create a default configuration file template
pub fn create_config_template(path: impl AsRef<Path>) -> anyhow::Result<()> {
    let template = "# Adaptive Weight Engine Configuration
# Every key is optional; omitted keys take the defaults shown here

[weights]
# Weight of a newly registered participant (clamped to its layer bounds)
initial_weight = 1.0

# Number of recent errors averaged into the rolling error
error_window_size = 20

# Denominator floor for relative errors |prediction - actual| / max(|actual|, eps)
error_epsilon = 1e-9

# Substitute for a zero rolling error
error_floor = 0.001

# Use errors observed under the current regime when available
regime_conditioned_errors = false

# Classifications kept for regime transition queries
regime_history_capacity = 1000

# Per-layer overrides (analyst, researcher, debator, trader, manager)
# error_metric: ratio_error | binary_correctness | pnl_based
[layers.trader]
adjust_speed = 0.1
min_weight = 0.5
max_weight = 4.0
error_metric = \"pnl_based\"
volatility_tolerance = 1.0

[regime_multipliers]
# Used when neither the participant nor its layer has an entry
global_default = 1.0

# Blend multipliers toward 1.0 by classification confidence
scale_by_confidence = false

# Seed with the built-in analyst rules
include_builtin = true

# Exact participant name -> regime -> multiplier
[regime_multipliers.agents.technical_analyst]
breakout = 1.7

# Layer -> regime -> multiplier
[regime_multipliers.layers.trader]
volatile = 0.8

[market]
# Price change thresholds (0.015 = 1.5%)
trending_threshold = 0.015
strong_trend_threshold = 0.03
ranging_threshold = 0.01

# Distance to a key level counted as near (fraction of price)
key_level_proximity = 0.02

# Volume over its 20-period average flagged as a spike
volume_spike_ratio = 1.5
";

    let path = path.as_ref();
    std::fs::write(path, template).with_context(|| format!("writing template {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipliers::RegimeMultiplierTable;
    use crate::policy::LayerPolicyTable;
    use common::{Layer, MarketRegime};

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("adaptive-weights-{}-{}.toml", name, std::process::id()))
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.weights.error_window_size, 20);
        assert_eq!(config.weights.initial_weight, 1.0);
        assert!(config.regime_multipliers.include_builtin);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = EngineConfig::default();
        config.weights.error_window_size = 50;
        config.layers.insert(
            "researcher".to_string(),
            LayerPolicyOverride {
                adjust_speed: Some(0.4),
                ..Default::default()
            },
        );

        let serialized = toml::to_string(&config).unwrap();
        let deserialized: EngineConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: EngineConfig = toml::from_str("[weights]\nerror_window_size = 5\n").unwrap();
        assert_eq!(config.weights.error_window_size, 5);
        assert_eq!(config.weights.error_floor, 1e-3);
        assert_eq!(config.market, MarketAnalysisConfig::default());
    }

    #[test]
    fn test_template_loads() {
        let path = temp_path("template");
        create_config_template(&path).unwrap();
        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let policies = LayerPolicyTable::with_overrides(&config.layers).unwrap();
        assert_eq!(policies.get(Layer::Trader).max_weight, 4.0);

        let multipliers = RegimeMultiplierTable::from_config(&config.regime_multipliers).unwrap();
        assert_eq!(multipliers.lookup("desk", Layer::Trader, MarketRegime::Volatile), 0.8);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip");
        let mut config = EngineConfig::default();
        config.weights.regime_conditioned_errors = true;

        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let path = temp_path("invalid");
        std::fs::write(&path, "[weights]\nerror_window_size = 0\n").unwrap();
        assert!(load_config(&path).is_err());
        std::fs::remove_file(&path).ok();

        assert!(load_config(temp_path("missing-file")).is_err());
    }

    #[test]
    fn test_layered_without_file() {
        let config = load_layered(temp_path("absent")).unwrap();
        assert_eq!(config.weights.error_window_size, 20);
    }
}
