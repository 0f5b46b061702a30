//! Classifier thresholds

use common::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Every threshold the trend, volatility and regime stages consult
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketAnalysisConfig {
    /// Price change treated as a moderate trend (0.015 = 1.5%)
    pub trending_threshold: f64,
    /// Price change treated as a strong trend
    pub strong_trend_threshold: f64,
    /// Price change below which a directionless market is ranging
    pub ranging_threshold: f64,

    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub rsi_neutral_upper: f64,
    pub rsi_neutral_lower: f64,
    pub stoch_overbought: f64,
    pub stoch_oversold: f64,

    /// Fraction of MAs above price needed for a bullish reading
    pub ma_bullish_ratio: f64,
    /// Fraction of MAs above price below which the reading is bearish
    pub ma_bearish_ratio: f64,
    /// Winning side must beat the other by this factor
    pub dominance_margin: f64,
    pub ma_weight: f64,
    pub price_action_weight: f64,
    pub momentum_weight: f64,

    /// ATR as a fraction of price
    pub atr_medium_threshold: f64,
    pub atr_high_threshold: f64,
    pub bb_squeeze_width: f64,
    pub bb_expansion_width: f64,
    pub range_narrow_threshold: f64,
    pub range_medium_threshold: f64,
    pub range_high_threshold: f64,
    pub atr_weight: f64,
    pub bands_weight: f64,
    pub range_weight: f64,

    /// Distance to a key level, as a fraction of price, counted as "near"
    pub key_level_proximity: f64,
    pub volume_spike_ratio: f64,
    pub volume_above_average_ratio: f64,
    pub volume_low_ratio: f64,

    /// Trend confidence above which a market is trending
    pub strong_trend_cut: f64,
    /// Volatility score above which a trend is a high-volatility trend
    pub trend_high_vol_cut: f64,
    pub high_vol_cut: f64,
    pub low_vol_cut: f64,
    /// Volatility score below which a key-level test is consolidation
    pub consolidation_vol_cut: f64,
}

impl Default for MarketAnalysisConfig {
    fn default() -> Self {
        Self {
            trending_threshold: 0.015,
            strong_trend_threshold: 0.03,
            ranging_threshold: 0.01,

            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            rsi_neutral_upper: 60.0,
            rsi_neutral_lower: 40.0,
            stoch_overbought: 80.0,
            stoch_oversold: 20.0,

            ma_bullish_ratio: 0.7,
            ma_bearish_ratio: 0.3,
            dominance_margin: 1.5,
            ma_weight: 0.4,
            price_action_weight: 0.3,
            momentum_weight: 0.3,

            atr_medium_threshold: 0.008,
            atr_high_threshold: 0.015,
            bb_squeeze_width: 0.02,
            bb_expansion_width: 0.05,
            range_narrow_threshold: 0.005,
            range_medium_threshold: 0.015,
            range_high_threshold: 0.03,
            atr_weight: 0.4,
            bands_weight: 0.3,
            range_weight: 0.3,

            key_level_proximity: 0.02,
            volume_spike_ratio: 1.5,
            volume_above_average_ratio: 1.2,
            volume_low_ratio: 0.8,

            strong_trend_cut: 0.6,
            trend_high_vol_cut: 0.6,
            high_vol_cut: 0.7,
            low_vol_cut: 0.3,
            consolidation_vol_cut: 0.4,
        }
    }
}

impl MarketAnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(EngineError::InvalidConfig(msg.to_string()));

        if self.trending_threshold <= 0.0 || self.strong_trend_threshold <= self.trending_threshold {
            return invalid("trend thresholds must satisfy 0 < trending < strong_trend");
        }
        if self.ranging_threshold <= 0.0 {
            return invalid("ranging_threshold must be positive");
        }
        if !(self.rsi_oversold < self.rsi_neutral_lower
            && self.rsi_neutral_lower <= self.rsi_neutral_upper
            && self.rsi_neutral_upper < self.rsi_overbought)
        {
            return invalid("RSI zones must be ordered oversold < neutral band < overbought");
        }
        if self.ma_bearish_ratio >= self.ma_bullish_ratio {
            return invalid("ma_bearish_ratio must be below ma_bullish_ratio");
        }
        if self.dominance_margin < 1.0 {
            return invalid("dominance_margin must be at least 1.0");
        }
        if self.atr_medium_threshold >= self.atr_high_threshold
            || self.bb_squeeze_width >= self.bb_expansion_width
            || self.range_medium_threshold >= self.range_high_threshold
        {
            return invalid("volatility thresholds must be increasing");
        }
        let weights = [
            self.ma_weight,
            self.price_action_weight,
            self.momentum_weight,
            self.atr_weight,
            self.bands_weight,
            self.range_weight,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return invalid("component weights must be finite and non-negative");
        }
        if self.low_vol_cut >= self.high_vol_cut {
            return invalid("low_vol_cut must be below high_vol_cut");
        }
        Ok(())
    }
}
