// Market Regime Classification
// Fuses trend, volatility, key-level proximity and volume into one regime

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::MarketAnalysisConfig;
use crate::trend::{TrendAnalysis, TrendDetector};
use crate::volatility::{VolatilityAnalysis, VolatilityAnalyzer};
use common::{IndicatorSnapshot, MarketRegime, TrendDirection, VolatilityLevel};

/// Anything that can turn a snapshot into a regime
pub trait Classifier: Send + Sync {
    fn classify(&self, snapshot: &IndicatorSnapshot) -> RegimeResult;
}

/// Proximity of the price to caller-supplied key levels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportResistance {
    pub near_support: bool,
    pub near_resistance: bool,
    pub nearest_level: Option<f64>,
    /// Distance to `nearest_level` as a fraction of price
    pub distance_pct: Option<f64>,
    pub breakout_potential: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeProfile {
    Spike,
    AboveAverage,
    Normal,
    Low,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeAnalysis {
    pub profile: VolumeProfile,
    /// Current volume over its 20-period average
    pub ratio: Option<f64>,
}

impl VolumeAnalysis {
    pub fn is_spike(&self) -> bool {
        self.profile == VolumeProfile::Spike
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
    RangeTrade,
    WaitForConfirmation,
    ReducePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    RiskWarning,
    RangeStrategy,
    BreakoutWatch,
    RiskManagement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
}

/// Actionable output attached to a classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradingSignal {
    Primary {
        action: SignalAction,
        strength: f64,
        reason: String,
    },
    Advisory {
        kind: AdvisoryKind,
        message: String,
        priority: Priority,
    },
}

impl fmt::Display for TradingSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingSignal::Primary { action, strength, reason } => {
                write!(f, "{:?} ({:.2}): {}", action, strength, reason)
            }
            TradingSignal::Advisory { kind, message, .. } => write!(f, "{:?}: {}", kind, message),
        }
    }
}

/// One classification. Carries no timestamp so identical input gives identical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeResult {
    pub regime: MarketRegime,
    pub confidence: f64,
    /// Trend confidence used as trend strength by the decision table
    pub trend_score: f64,
    pub volatility_score: f64,
    pub trend_direction: TrendDirection,
    pub volatility_level: VolatilityLevel,
    pub conditions: Vec<String>,
    pub recommendation: String,
    pub summary: String,
    pub signals: Vec<TradingSignal>,
    pub support_resistance: SupportResistance,
    pub volume: VolumeAnalysis,
}

impl RegimeResult {
    /// Primary action, always the first signal
    pub fn primary_action(&self) -> SignalAction {
        match self.signals.first() {
            Some(TradingSignal::Primary { action, .. }) => *action,
            _ => SignalAction::Hold,
        }
    }
}

/// Rule-table classifier over [`TrendDetector`] and [`VolatilityAnalyzer`]
#[derive(Debug, Clone, Default)]
pub struct MarketClassifier {
    config: MarketAnalysisConfig,
    trend: TrendDetector,
    volatility: VolatilityAnalyzer,
}

impl MarketClassifier {
    pub fn new(config: MarketAnalysisConfig) -> Self {
        Self {
            trend: TrendDetector::new(config.clone()),
            volatility: VolatilityAnalyzer::new(config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &MarketAnalysisConfig {
        &self.config
    }

    pub fn classify(&self, snapshot: &IndicatorSnapshot) -> RegimeResult {
        let trend = self.trend.detect(snapshot);
        let vol = self.volatility.analyze(snapshot);
        let levels = self.support_resistance(snapshot);
        let volume = self.volume(snapshot);

        let decision = if snapshot.is_insufficient() {
            Decision {
                regime: MarketRegime::Uncertain,
                confidence: 0.3,
                conditions: vec!["insufficient indicator data".to_string()],
                recommendation: "stand aside until indicator data is available".to_string(),
            }
        } else {
            self.decide(snapshot, &trend, &vol, &levels, &volume)
        };

        let Decision {
            regime,
            confidence,
            conditions,
            recommendation,
        } = decision;
        let confidence = confidence.clamp(0.0, 1.0);
        let signals = trading_signals(regime, confidence, vol.level);
        let summary = summarize(regime, confidence, &conditions);

        debug!(
            symbol = %snapshot.symbol,
            regime = %regime,
            confidence,
            trend = %trend.direction,
            volatility = %vol.level,
            "Market classified"
        );

        RegimeResult {
            regime,
            confidence,
            trend_score: trend.confidence,
            volatility_score: vol.score,
            trend_direction: trend.direction,
            volatility_level: vol.level,
            conditions,
            recommendation,
            summary,
            signals,
            support_resistance: levels,
            volume,
        }
    }

    /// First matching rule wins
    fn decide(
        &self,
        snapshot: &IndicatorSnapshot,
        trend: &TrendAnalysis,
        vol: &VolatilityAnalysis,
        levels: &SupportResistance,
        volume: &VolumeAnalysis,
    ) -> Decision {
        let cfg = &self.config;
        let strength = trend.confidence;
        let vol_score = vol.score;
        let bullish = trend.direction == TrendDirection::Bullish;
        let directional = trend.direction != TrendDirection::Neutral;
        let neutral = !directional;

        let mut decision = if directional && strength > cfg.strong_trend_cut {
            let regime = if bullish {
                MarketRegime::TrendingBull
            } else {
                MarketRegime::TrendingBear
            };
            if vol_score > cfg.trend_high_vol_cut {
                let (condition, recommendation) = if bullish {
                    ("strong uptrend", "follow the trend, mind the volatility")
                } else {
                    ("strong downtrend", "short with caution, keep stops tight")
                };
                Decision::new(regime, (strength * 0.8 + vol_score * 0.2).min(0.9))
                    .condition(condition)
                    .condition("high volatility")
                    .recommend(recommendation)
            } else {
                let (condition, recommendation) = if bullish {
                    ("steady uptrend", "buy on dips")
                } else {
                    ("steady downtrend", "sell into rallies")
                };
                Decision::new(regime, (strength * 0.9 + vol_score * 0.1).min(0.95))
                    .condition(condition)
                    .recommend(recommendation)
            }
        } else if neutral && vol_score > cfg.high_vol_cut {
            Decision::new(MarketRegime::Volatile, vol_score * 0.8)
                .condition("no clear direction")
                .condition("high volatility chop")
                .recommend("trade the range, sell strength and buy weakness")
        } else if neutral && vol_score < cfg.low_vol_cut {
            if levels.breakout_potential {
                Decision::new(MarketRegime::Consolidation, 0.6)
                    .condition("low volatility consolidation")
                    .condition("near key level")
                    .recommend("wait for the breakout direction")
            } else {
                Decision::new(MarketRegime::LowVolatility, 0.5)
                    .condition("sideways drift")
                    .condition("low volatility")
                    .recommend("stand aside or trade the range with small size")
            }
        } else if levels.near_support || levels.near_resistance {
            if vol_score < cfg.consolidation_vol_cut {
                let (condition, recommendation) = if levels.near_support {
                    ("consolidating near support", "watch support hold, prepare to buy")
                } else {
                    ("consolidating near resistance", "watch resistance hold, prepare to sell")
                };
                Decision::new(MarketRegime::Consolidation, 0.7)
                    .condition(condition)
                    .recommend(recommendation)
            } else {
                Decision::new(MarketRegime::Breakout, 0.6)
                    .condition("testing key level")
                    .condition("volatility rising")
                    .recommend("wait for breakout confirmation")
            }
        } else if snapshot.price_change_pct.abs() < cfg.ranging_threshold {
            Decision::new(MarketRegime::Ranging, 0.7 - vol_score * 0.2)
                .condition("range bound")
                .recommend("range trading strategy")
        } else {
            Decision::new(MarketRegime::Uncertain, 0.4)
                .condition("conflicting signals")
                .recommend("stand aside until signals agree")
        };

        if volume.is_spike() {
            if decision.regime.is_trending() {
                decision.confidence = (decision.confidence * 1.1).min(0.95);
                decision.conditions.push("volume confirms trend".to_string());
            } else if decision.regime == MarketRegime::Breakout {
                decision.confidence = (decision.confidence * 1.2).min(0.95);
                decision.conditions.push("breakout on heavy volume".to_string());
                decision.recommendation = "breakout confirmed, follow the move".to_string();
            }
        }

        decision
    }

    fn support_resistance(&self, snapshot: &IndicatorSnapshot) -> SupportResistance {
        let mut result = SupportResistance::default();
        if !snapshot.has_valid_price() {
            return result;
        }

        let price = snapshot.current_price;
        for level in snapshot.key_levels.iter().filter(|l| l.is_finite() && **l > 0.0) {
            let distance = (price - level).abs() / price;
            if distance < self.config.key_level_proximity {
                if price > *level {
                    result.near_support = true;
                } else {
                    result.near_resistance = true;
                }
            }
            if result.distance_pct.map_or(true, |best| distance < best) {
                result.distance_pct = Some(distance);
                result.nearest_level = Some(*level);
            }
        }
        result.breakout_potential = result.near_support || result.near_resistance;
        result
    }

    fn volume(&self, snapshot: &IndicatorSnapshot) -> VolumeAnalysis {
        let ind = &snapshot.indicators;
        let ratio = ind
            .volume
            .zip(ind.volume_ma_20)
            .filter(|(v, ma)| v.is_finite() && ma.is_finite() && *ma > 0.0)
            .map(|(v, ma)| v / ma);

        let profile = match ratio {
            None => VolumeProfile::Unknown,
            Some(r) if r > self.config.volume_spike_ratio => VolumeProfile::Spike,
            Some(r) if r > self.config.volume_above_average_ratio => VolumeProfile::AboveAverage,
            Some(r) if r < self.config.volume_low_ratio => VolumeProfile::Low,
            Some(_) => VolumeProfile::Normal,
        };
        VolumeAnalysis { profile, ratio }
    }
}

impl Classifier for MarketClassifier {
    fn classify(&self, snapshot: &IndicatorSnapshot) -> RegimeResult {
        MarketClassifier::classify(self, snapshot)
    }
}

struct Decision {
    regime: MarketRegime,
    confidence: f64,
    conditions: Vec<String>,
    recommendation: String,
}

impl Decision {
    fn new(regime: MarketRegime, confidence: f64) -> Self {
        Self {
            regime,
            confidence,
            conditions: Vec::new(),
            recommendation: String::new(),
        }
    }

    fn condition(mut self, condition: &str) -> Self {
        self.conditions.push(condition.to_string());
        self
    }

    fn recommend(mut self, recommendation: &str) -> Self {
        self.recommendation = recommendation.to_string();
        self
    }
}

fn trading_signals(
    regime: MarketRegime,
    confidence: f64,
    level: VolatilityLevel,
) -> Vec<TradingSignal> {
    let primary = |action, strength, reason: &str| TradingSignal::Primary {
        action,
        strength,
        reason: reason.to_string(),
    };
    let advisory = |kind, message: &str, priority| TradingSignal::Advisory {
        kind,
        message: message.to_string(),
        priority,
    };
    let hold = || primary(SignalAction::Hold, 0.0, "no actionable regime");

    let mut signals = Vec::new();
    match regime {
        MarketRegime::TrendingBull if confidence > 0.7 => {
            signals.push(primary(SignalAction::Buy, confidence, "strong uptrend"));
            if level == VolatilityLevel::High {
                signals.push(advisory(
                    AdvisoryKind::RiskWarning,
                    "high volatility, trade light or tighten stops",
                    Priority::High,
                ));
            }
        }
        MarketRegime::TrendingBear if confidence > 0.7 => {
            signals.push(primary(SignalAction::Sell, confidence, "strong downtrend"));
        }
        MarketRegime::Ranging => {
            signals.push(primary(SignalAction::RangeTrade, 0.0, "range-bound market"));
            signals.push(advisory(
                AdvisoryKind::RangeStrategy,
                "buy near support, sell near resistance",
                Priority::Medium,
            ));
        }
        MarketRegime::Breakout => {
            signals.push(primary(
                SignalAction::WaitForConfirmation,
                0.0,
                "awaiting breakout confirmation",
            ));
            signals.push(advisory(
                AdvisoryKind::BreakoutWatch,
                "wait for price to confirm through the key level",
                Priority::High,
            ));
        }
        MarketRegime::Volatile => {
            signals.push(primary(SignalAction::ReducePosition, 0.0, "high volatility market"));
            signals.push(advisory(
                AdvisoryKind::RiskManagement,
                "cut position size and widen stops",
                Priority::High,
            ));
        }
        _ => signals.push(hold()),
    }
    signals
}

fn summarize(regime: MarketRegime, confidence: f64, conditions: &[String]) -> String {
    if conditions.is_empty() {
        format!("{} (confidence {:.0}%)", regime, confidence * 100.0)
    } else {
        format!(
            "{} (confidence {:.0}%): {}",
            regime,
            confidence * 100.0,
            conditions.join(", ")
        )
    }
}
