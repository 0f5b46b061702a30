// Volatility Analysis
// ATR, Bollinger band and price-range dispersion fused into one score

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MarketAnalysisConfig;
use common::{IndicatorSnapshot, VolatilityLevel};

/// Output of [`VolatilityAnalyzer::analyze`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityAnalysis {
    pub level: VolatilityLevel,
    pub score: f64,
    /// ATR sub-score, `None` without an ATR reading
    pub atr_score: Option<f64>,
    /// Band sub-score, `None` without a band width
    pub band_score: Option<f64>,
    pub range_score: f64,
    pub band_squeeze: bool,
    pub band_expansion: bool,
    pub signals: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VolatilityAnalyzer {
    config: MarketAnalysisConfig,
}

impl VolatilityAnalyzer {
    pub fn new(config: MarketAnalysisConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, snapshot: &IndicatorSnapshot) -> VolatilityAnalysis {
        let cfg = &self.config;
        let mut signals = Vec::new();

        let atr_score = snapshot
            .indicators
            .atr
            .filter(|atr| atr.is_finite() && snapshot.has_valid_price())
            .map(|atr| {
                let ratio = atr / snapshot.current_price;
                if ratio > cfg.atr_high_threshold {
                    signals.push("high_atr".to_string());
                    0.9
                } else if ratio > cfg.atr_medium_threshold {
                    signals.push("medium_atr".to_string());
                    0.5
                } else {
                    signals.push("low_atr".to_string());
                    0.3
                }
            });

        let width = snapshot.indicators.band_width().filter(|w| w.is_finite());
        let band_squeeze = width.is_some_and(|w| w < cfg.bb_squeeze_width);
        let band_expansion = width.is_some_and(|w| w > cfg.bb_expansion_width);
        let band_score = width.map(|_| {
            let mut score = if band_squeeze {
                signals.push("band_squeeze".to_string());
                0.2
            } else if band_expansion {
                signals.push("band_expansion".to_string());
                0.8
            } else {
                0.5
            };
            if let Some(position) = snapshot.indicators.band_position(snapshot.current_price) {
                if !(0.2..=0.8).contains(&position) {
                    signals.push("price_at_band_edge".to_string());
                    score = (score + 0.1_f64).min(1.0);
                }
            }
            score
        });

        let range = if snapshot.price_change_pct.is_finite() {
            snapshot.price_change_pct.abs()
        } else {
            0.0
        };
        let range_score = if range > cfg.range_high_threshold {
            signals.push("wide_range".to_string());
            0.9
        } else if range > cfg.range_medium_threshold {
            0.5
        } else if range < cfg.range_narrow_threshold {
            signals.push("narrow_range".to_string());
            0.3
        } else {
            0.5
        };

        let parts = [
            (atr_score, cfg.atr_weight),
            (band_score, cfg.bands_weight),
            (Some(range_score), cfg.range_weight),
        ];
        let (weighted, total_weight) = parts
            .iter()
            .filter_map(|(score, weight)| score.map(|s| (s * weight, *weight)))
            .fold((0.0, 0.0), |(acc, tw), (ws, w)| (acc + ws, tw + w));
        let score = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            range_score
        };

        let level = VolatilityLevel::from_score(score);
        debug!(symbol = %snapshot.symbol, level = %level, score, "Volatility analyzed");

        VolatilityAnalysis {
            level,
            score,
            atr_score,
            band_score,
            range_score,
            band_squeeze,
            band_expansion,
            signals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Indicators;

    #[test]
    fn test_high_volatility() {
        let snapshot = IndicatorSnapshot::new("TEST", 100.0)
            .with_price_change(0.05)
            .with_indicators(Indicators {
                atr: Some(2.5),
                bb_upper: Some(106.0),
                bb_middle: Some(100.0),
                bb_lower: Some(94.0),
                ..Default::default()
            });
        let vol = VolatilityAnalyzer::default().analyze(&snapshot);

        // 0.4 * 0.9 + 0.3 * 0.8 + 0.3 * 0.9
        assert!((vol.score - 0.87).abs() < 1e-9);
        assert_eq!(vol.level, VolatilityLevel::High);
        assert!(vol.band_expansion);
        assert!(!vol.band_squeeze);
    }

    #[test]
    fn test_squeeze_reads_low() {
        let snapshot = IndicatorSnapshot::new("TEST", 100.0)
            .with_price_change(0.002)
            .with_indicators(Indicators {
                atr: Some(0.5),
                bb_width: Some(0.01),
                ..Default::default()
            });
        let vol = VolatilityAnalyzer::default().analyze(&snapshot);

        assert!(vol.band_squeeze);
        assert_eq!(vol.band_score, Some(0.2));
        // 0.4 * 0.3 + 0.3 * 0.2 + 0.3 * 0.3
        assert!((vol.score - 0.27).abs() < 1e-9);
        assert_eq!(vol.level, VolatilityLevel::Low);
    }

    #[test]
    fn test_missing_components_renormalize() {
        let snapshot = IndicatorSnapshot::new("TEST", 100.0).with_price_change(0.04);
        let vol = VolatilityAnalyzer::default().analyze(&snapshot);

        assert!(vol.atr_score.is_none());
        assert!(vol.band_score.is_none());
        assert!((vol.score - 0.9).abs() < 1e-9);
        assert_eq!(vol.level, VolatilityLevel::High);
    }

    #[test]
    fn test_band_edge_adds_to_score() {
        let snapshot = IndicatorSnapshot::new("TEST", 100.0).with_indicators(Indicators {
            bb_width: Some(0.03),
            bb_position: Some(0.95),
            ..Default::default()
        });
        let vol = VolatilityAnalyzer::default().analyze(&snapshot);

        assert!((vol.band_score.unwrap() - 0.6).abs() < 1e-9);
        assert!(vol.signals.contains(&"price_at_band_edge".to_string()));
    }
}
