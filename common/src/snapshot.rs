//! Indicator snapshot handed in by a technical-indicator provider
//!
//! Every indicator is optional. Absent values are skipped by the analyzers,
//! never read as zero.

use serde::{Deserialize, Serialize};

/// Latest value of each supported indicator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Indicators {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,

    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_5: Option<f64>,
    pub ema_10: Option<f64>,
    pub ema_20: Option<f64>,
    pub ema_50: Option<f64>,
    pub ema_200: Option<f64>,

    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    /// Band width as a fraction of the middle band (0.02 = 2%)
    pub bb_width: Option<f64>,
    /// Price position inside the band, 0.0 = lower, 1.0 = upper
    pub bb_position: Option<f64>,

    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,

    pub atr: Option<f64>,
    pub volume: Option<f64>,
    pub volume_ma_20: Option<f64>,
}

impl Indicators {
    /// Moving averages the price can be compared against, in a fixed order
    pub fn moving_averages(&self) -> Vec<(&'static str, f64)> {
        [
            ("SMA_20", self.sma_20),
            ("SMA_50", self.sma_50),
            ("SMA_200", self.sma_200),
            ("EMA_20", self.ema_20),
            ("EMA_50", self.ema_50),
            ("EMA_200", self.ema_200),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.filter(|v| v.is_finite()).map(|v| (name, v)))
        .collect()
    }

    /// EMA 5/10/20/50/200 ladder, only when every rung is present
    pub fn ema_ladder(&self) -> Option<[f64; 5]> {
        Some([
            self.ema_5?,
            self.ema_10?,
            self.ema_20?,
            self.ema_50?,
            self.ema_200?,
        ])
    }

    /// Band width, derived from the bands when the provider omits it
    pub fn band_width(&self) -> Option<f64> {
        self.bb_width.or_else(|| match (self.bb_upper, self.bb_middle, self.bb_lower) {
            (Some(upper), Some(middle), Some(lower)) if middle > 0.0 => {
                Some((upper - lower) / middle)
            }
            _ => None,
        })
    }

    /// Price position inside the band, derived from the bands when omitted
    pub fn band_position(&self, price: f64) -> Option<f64> {
        self.bb_position.or_else(|| match (self.bb_upper, self.bb_lower) {
            (Some(upper), Some(lower)) if upper > lower => Some((price - lower) / (upper - lower)),
            _ => None,
        })
    }

    fn values(&self) -> [Option<f64>; 21] {
        [
            self.rsi,
            self.macd,
            self.macd_signal,
            self.sma_20,
            self.sma_50,
            self.sma_200,
            self.ema_5,
            self.ema_10,
            self.ema_20,
            self.ema_50,
            self.ema_200,
            self.bb_upper,
            self.bb_middle,
            self.bb_lower,
            self.bb_width,
            self.bb_position,
            self.stoch_k,
            self.stoch_d,
            self.atr,
            self.volume,
            self.volume_ma_20,
        ]
    }

    /// Number of indicators carrying a finite value
    pub fn present_count(&self) -> usize {
        self.values()
            .iter()
            .filter(|v| v.map_or(false, f64::is_finite))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.present_count() == 0
    }
}

/// Point-in-time market snapshot for one symbol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    #[serde(default)]
    pub symbol: String,
    pub current_price: f64,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub indicators: Indicators,
    /// Fractional price change over the lookback window (0.01 = 1%)
    #[serde(default)]
    pub price_change_pct: f64,
    /// Support/resistance levels supplied by the provider
    #[serde(default)]
    pub key_levels: Vec<f64>,
}

impl IndicatorSnapshot {
    pub fn new(symbol: impl Into<String>, current_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            current_price,
            ..Default::default()
        }
    }

    pub fn with_price_change(mut self, price_change_pct: f64) -> Self {
        self.price_change_pct = price_change_pct;
        self
    }

    pub fn with_indicators(mut self, indicators: Indicators) -> Self {
        self.indicators = indicators;
        self
    }

    pub fn with_key_levels(mut self, levels: Vec<f64>) -> Self {
        self.key_levels = levels;
        self
    }

    pub fn has_valid_price(&self) -> bool {
        self.current_price.is_finite() && self.current_price > 0.0
    }

    /// True when there is nothing to classify beyond the price change
    pub fn is_insufficient(&self) -> bool {
        !self.has_valid_price() || (self.indicators.is_empty() && self.key_levels.is_empty())
    }
}
