// Market Analysis
// Pure regime classification from indicator snapshots

pub mod classifier;
pub mod config;
pub mod history;
pub mod trend;
pub mod volatility;

pub use classifier::{
    AdvisoryKind, Classifier, MarketClassifier, Priority, RegimeResult, SignalAction,
    SupportResistance, TradingSignal, VolumeAnalysis, VolumeProfile,
};
pub use config::MarketAnalysisConfig;
pub use history::{MarketPhase, RegimeEntry, RegimeHistory, RegimeStatistics, RegimeTransition};
pub use trend::{TrendAnalysis, TrendComponent, TrendDetector};
pub use volatility::{VolatilityAnalysis, VolatilityAnalyzer};
