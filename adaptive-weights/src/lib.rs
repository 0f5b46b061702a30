//! Adaptive Weight Engine
//!
//! Learns how much to trust each participant of a layered decision pipeline
//! from its recent prediction errors, biases those weights by the market
//! regime and blends participant predictions into one decision.

pub mod adjuster;
pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod multipliers;
pub mod optimization;
pub mod policy;
pub mod registry;
pub mod tracker;

pub use adjuster::{AdjustmentContext, WeightAdjuster, WeightComputation, WeightPolicy};
pub use aggregator::DecisionAggregator;
pub use coordinator::{CoordinationReport, Coordinator};
pub use multipliers::{RegimeMultiplierConfig, RegimeMultiplierTable};
pub use optimization::{
    replay_evaluator, suggest_layer_overrides, OptimizationResult, ParamBounds, ParamGrid,
    ReplayStep, Trial, TuningParams, WeightOptimizer,
};
pub use policy::{ErrorMetric, LayerPolicy, LayerPolicyOverride, LayerPolicyTable};
pub use registry::{AgentRegistry, ParticipantRecord, RecordHandle};
pub use self::config::{
    create_config_template, load_config, load_layered, save_config, EngineConfig, WeightSettings,
    ENV_PREFIX,
};
pub use tracker::{ErrorTracker, RegimeErrorStats, RegimePerformance, PESSIMISTIC_ERROR};

pub use common::{EngineError, IndicatorSnapshot, Indicators, Layer, MarketRegime, Result};
pub use market_analysis::{MarketClassifier, RegimeResult};
