//! Participant layers and market regimes

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse role of a forecasting participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Analyst,
    Researcher,
    Debator,
    Trader,
    Manager,
}

impl Layer {
    pub const ALL: [Layer; 5] = [
        Layer::Analyst,
        Layer::Researcher,
        Layer::Debator,
        Layer::Trader,
        Layer::Manager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Analyst => "analyst",
            Layer::Researcher => "researcher",
            Layer::Debator => "debator",
            Layer::Trader => "trader",
            Layer::Manager => "manager",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "analyst" => Ok(Layer::Analyst),
            "researcher" => Ok(Layer::Researcher),
            "debator" => Ok(Layer::Debator),
            "trader" => Ok(Layer::Trader),
            "manager" => Ok(Layer::Manager),
            _ => Err(EngineError::UnknownLayer(s.to_string())),
        }
    }
}

/// Classified market condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketRegime {
    TrendingBull,
    TrendingBear,
    Ranging,
    Volatile,
    Breakout,
    LowVolatility,
    Consolidation,
    Uncertain,
}

impl MarketRegime {
    pub const ALL: [MarketRegime; 8] = [
        MarketRegime::TrendingBull,
        MarketRegime::TrendingBear,
        MarketRegime::Ranging,
        MarketRegime::Volatile,
        MarketRegime::Breakout,
        MarketRegime::LowVolatility,
        MarketRegime::Consolidation,
        MarketRegime::Uncertain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::TrendingBull => "trending-bull",
            MarketRegime::TrendingBear => "trending-bear",
            MarketRegime::Ranging => "ranging",
            MarketRegime::Volatile => "volatile",
            MarketRegime::Breakout => "breakout",
            MarketRegime::LowVolatility => "low-volatility",
            MarketRegime::Consolidation => "consolidation",
            MarketRegime::Uncertain => "uncertain",
        }
    }

    pub fn is_trending(&self) -> bool {
        matches!(self, MarketRegime::TrendingBull | MarketRegime::TrendingBear)
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketRegime {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        MarketRegime::ALL
            .iter()
            .copied()
            .find(|regime| regime.as_str() == normalized)
            .ok_or_else(|| EngineError::InvalidConfig(format!("unknown regime: {}", s)))
    }
}

/// Directional bias reported by trend detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Bullish => "bullish",
            TrendDirection::Bearish => "bearish",
            TrendDirection::Neutral => "neutral",
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five-step dispersion scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolatilityLevel {
    VeryLow,
    Low,
    Medium,
    MediumHigh,
    High,
}

impl VolatilityLevel {
    /// Maps a 0-1 score onto the scale using the cut points 0.7, 0.5, 0.3, 0.2
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            VolatilityLevel::High
        } else if score > 0.5 {
            VolatilityLevel::MediumHigh
        } else if score > 0.3 {
            VolatilityLevel::Medium
        } else if score > 0.2 {
            VolatilityLevel::Low
        } else {
            VolatilityLevel::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityLevel::VeryLow => "very-low",
            VolatilityLevel::Low => "low",
            VolatilityLevel::Medium => "medium",
            VolatilityLevel::MediumHigh => "medium-high",
            VolatilityLevel::High => "high",
        }
    }
}

impl fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
