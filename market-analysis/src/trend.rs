// Trend Detection
// Weighted vote over moving-average positioning, price action and momentum

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MarketAnalysisConfig;
use common::{IndicatorSnapshot, TrendDirection};

/// One sub-score of the trend vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendComponent {
    pub direction: TrendDirection,
    pub strength: f64,
    /// Short labels of what fired, e.g. "rsi_overbought"
    pub signals: Vec<String>,
}

impl TrendComponent {
    fn new(direction: TrendDirection, strength: f64) -> Self {
        Self {
            direction,
            strength: strength.clamp(0.0, 1.0),
            signals: Vec::new(),
        }
    }
}

/// Output of [`TrendDetector::detect`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    pub strength: f64,
    pub confidence: f64,
    /// `None` when no moving averages were supplied
    pub moving_averages: Option<TrendComponent>,
    pub price_action: TrendComponent,
    /// `None` when neither RSI nor MACD was supplied
    pub momentum: Option<TrendComponent>,
    pub summary: String,
}

/// Directional bias detector
#[derive(Debug, Clone, Default)]
pub struct TrendDetector {
    config: MarketAnalysisConfig,
}

impl TrendDetector {
    pub fn new(config: MarketAnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MarketAnalysisConfig {
        &self.config
    }

    pub fn detect(&self, snapshot: &IndicatorSnapshot) -> TrendAnalysis {
        let moving_averages = self.moving_average_component(snapshot);
        let price_action = self.price_action_component(snapshot.price_change_pct);
        let momentum = self.momentum_component(snapshot);

        let votes = [
            (moving_averages.as_ref(), self.config.ma_weight),
            (Some(&price_action), self.config.price_action_weight),
            (momentum.as_ref(), self.config.momentum_weight),
        ];
        let (direction, strength, confidence) = self.combine(&votes);

        let summary = describe(direction, strength, confidence);
        debug!(
            symbol = %snapshot.symbol,
            direction = %direction,
            strength,
            confidence,
            "Trend detected"
        );

        TrendAnalysis {
            direction,
            strength,
            confidence,
            moving_averages,
            price_action,
            momentum,
            summary,
        }
    }

    /// Share of available moving averages the price sits above
    fn moving_average_component(&self, snapshot: &IndicatorSnapshot) -> Option<TrendComponent> {
        let averages = snapshot.indicators.moving_averages();
        if averages.is_empty() || !snapshot.has_valid_price() {
            return None;
        }

        let price = snapshot.current_price;
        let above = averages.iter().filter(|(_, value)| price > *value).count();
        let ratio = above as f64 / averages.len() as f64;

        let mut component = if ratio > self.config.ma_bullish_ratio {
            TrendComponent::new(TrendDirection::Bullish, ratio)
        } else if ratio < self.config.ma_bearish_ratio {
            TrendComponent::new(TrendDirection::Bearish, 1.0 - ratio)
        } else {
            TrendComponent::new(TrendDirection::Neutral, 0.5)
        };
        component.signals = averages
            .iter()
            .map(|(name, value)| {
                let side = if price > *value { "above" } else { "below" };
                format!("price_{}_{}", side, name.to_ascii_lowercase())
            })
            .collect();

        if let Some(ladder) = snapshot.indicators.ema_ladder() {
            let rising = ladder.windows(2).all(|pair| pair[0] > pair[1]);
            let falling = ladder.windows(2).all(|pair| pair[0] < pair[1]);
            let aligned = match component.direction {
                TrendDirection::Bullish => rising,
                TrendDirection::Bearish => falling,
                TrendDirection::Neutral => false,
            };
            if aligned {
                component.strength = component.strength.max(0.9);
                component.signals.push("perfect_ema_alignment".to_string());
            }
        }

        Some(component)
    }

    fn price_action_component(&self, change: f64) -> TrendComponent {
        if !change.is_finite() {
            return TrendComponent::new(TrendDirection::Neutral, 0.3);
        }

        let magnitude = change.abs();
        let direction = if change > 0.0 {
            TrendDirection::Bullish
        } else {
            TrendDirection::Bearish
        };

        let mut component = if magnitude > self.config.strong_trend_threshold {
            let mut c = TrendComponent::new(direction, magnitude / 0.05);
            c.signals.push(format!("strong_{}_move", direction));
            c
        } else if magnitude > self.config.trending_threshold {
            let mut c = TrendComponent::new(direction, magnitude / self.config.strong_trend_threshold);
            c.signals.push(format!("moderate_{}_move", direction));
            c
        } else {
            TrendComponent::new(TrendDirection::Neutral, 0.3)
        };
        if component.direction == TrendDirection::Neutral {
            component.signals.push("flat_price_action".to_string());
        }
        component
    }

    /// RSI zone, then MACD crossover; stochastic only labels
    fn momentum_component(&self, snapshot: &IndicatorSnapshot) -> Option<TrendComponent> {
        let ind = &snapshot.indicators;
        let rsi = ind.rsi.filter(|v| v.is_finite());
        let macd = ind
            .macd
            .zip(ind.macd_signal)
            .filter(|(line, signal)| line.is_finite() && signal.is_finite());
        if rsi.is_none() && macd.is_none() {
            return None;
        }

        let cfg = &self.config;
        let mut component = TrendComponent::new(TrendDirection::Neutral, 0.3);

        if let Some(rsi) = rsi {
            if rsi > cfg.rsi_overbought {
                component = TrendComponent::new(TrendDirection::Bearish, 0.7);
                component.signals.push("rsi_overbought".to_string());
            } else if rsi > cfg.rsi_neutral_upper {
                component = TrendComponent::new(TrendDirection::Bullish, 0.5);
                component.signals.push("rsi_bullish".to_string());
            } else if rsi < cfg.rsi_oversold {
                component = TrendComponent::new(TrendDirection::Bullish, 0.7);
                component.signals.push("rsi_oversold".to_string());
            } else if rsi < cfg.rsi_neutral_lower {
                component = TrendComponent::new(TrendDirection::Bearish, 0.5);
                component.signals.push("rsi_bearish".to_string());
            } else {
                component.signals.push("rsi_neutral".to_string());
            }
        }

        if let Some((line, signal)) = macd {
            if line > signal {
                component.signals.push("macd_bullish".to_string());
                if component.direction != TrendDirection::Bearish {
                    component.direction = TrendDirection::Bullish;
                    component.strength = component.strength.max(0.6);
                }
            } else {
                component.signals.push("macd_bearish".to_string());
                if component.direction != TrendDirection::Bullish {
                    component.direction = TrendDirection::Bearish;
                    component.strength = component.strength.max(0.6);
                }
            }
        }

        let stoch = ind
            .stoch_k
            .zip(ind.stoch_d)
            .filter(|(k, d)| k.is_finite() && d.is_finite());
        if let Some((k, d)) = stoch {
            let label = if k > cfg.stoch_overbought && d > cfg.stoch_overbought {
                "stoch_overbought"
            } else if k < cfg.stoch_oversold && d < cfg.stoch_oversold {
                "stoch_oversold"
            } else if k > d {
                "stoch_bullish"
            } else {
                "stoch_bearish"
            };
            component.signals.push(label.to_string());
        }

        Some(component)
    }

    fn combine(&self, votes: &[(Option<&TrendComponent>, f64)]) -> (TrendDirection, f64, f64) {
        let mut bull = 0.0;
        let mut bear = 0.0;
        for (component, weight) in votes {
            let Some(component) = component else { continue };
            match component.direction {
                TrendDirection::Bullish => bull += weight * component.strength,
                TrendDirection::Bearish => bear += weight * component.strength,
                TrendDirection::Neutral => {}
            }
        }

        let total = bull + bear;
        if total <= 0.0 || !total.is_finite() {
            return (TrendDirection::Neutral, 0.0, 0.3);
        }

        let margin = self.config.dominance_margin;
        let (direction, strength) = if bull > bear * margin {
            (TrendDirection::Bullish, bull / total)
        } else if bear > bull * margin {
            (TrendDirection::Bearish, bear / total)
        } else {
            (TrendDirection::Neutral, 0.5)
        };

        (direction, strength, (strength * 1.5).min(0.95))
    }
}

fn describe(direction: TrendDirection, strength: f64, confidence: f64) -> String {
    if direction == TrendDirection::Neutral {
        return format!("no clear trend (confidence {:.2})", confidence);
    }
    let level = if strength > 0.7 {
        "strong"
    } else if strength > 0.4 {
        "moderate"
    } else {
        "weak"
    };
    format!(
        "{} {} trend (strength {:.2}, confidence {:.2})",
        level, direction, strength, confidence
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Indicators;

    fn bullish_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot::new("TEST", 110.0)
            .with_price_change(0.04)
            .with_indicators(Indicators {
                rsi: Some(65.0),
                macd: Some(1.2),
                macd_signal: Some(0.8),
                sma_20: Some(100.0),
                sma_50: Some(95.0),
                sma_200: Some(90.0),
                ema_5: Some(108.0),
                ema_10: Some(106.0),
                ema_20: Some(104.0),
                ema_50: Some(100.0),
                ema_200: Some(95.0),
                ..Default::default()
            })
    }

    #[test]
    fn test_strong_bullish_trend() {
        let detector = TrendDetector::default();
        let trend = detector.detect(&bullish_snapshot());

        assert_eq!(trend.direction, TrendDirection::Bullish);
        assert!((trend.strength - 1.0).abs() < 1e-9);
        assert!((trend.confidence - 0.95).abs() < 1e-9);

        let ma = trend.moving_averages.unwrap();
        assert!(ma.signals.contains(&"perfect_ema_alignment".to_string()));
        assert!((trend.price_action.strength - 0.8).abs() < 1e-9);
        assert!((trend.momentum.unwrap().strength - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_bearish_moving_averages_dominate() {
        let snapshot = IndicatorSnapshot::new("TEST", 80.0)
            .with_price_change(0.04)
            .with_indicators(Indicators {
                sma_20: Some(90.0),
                sma_50: Some(95.0),
                ..Default::default()
            });
        let trend = TrendDetector::default().detect(&snapshot);

        // bear 0.4 vs bull 0.24: 0.4 > 0.36
        assert_eq!(trend.direction, TrendDirection::Bearish);
        assert!((trend.strength - 0.4 / 0.64).abs() < 1e-9);
    }

    #[test]
    fn test_marginal_vote_is_neutral() {
        // price action bullish 0.24 against overbought RSI 0.21
        let snapshot = IndicatorSnapshot::new("TEST", 100.0)
            .with_price_change(0.04)
            .with_indicators(Indicators {
                rsi: Some(75.0),
                ..Default::default()
            });
        let trend = TrendDetector::default().detect(&snapshot);

        assert_eq!(trend.direction, TrendDirection::Neutral);
        assert_eq!(trend.strength, 0.5);
        assert!(trend.moving_averages.is_none());
    }

    #[test]
    fn test_no_votes_is_neutral_low_confidence() {
        let snapshot = IndicatorSnapshot::new("TEST", 100.0).with_price_change(0.0001);
        let trend = TrendDetector::default().detect(&snapshot);

        assert_eq!(trend.direction, TrendDirection::Neutral);
        assert_eq!(trend.strength, 0.0);
        assert_eq!(trend.confidence, 0.3);
        assert!(trend.momentum.is_none());
        assert!(trend.summary.starts_with("no clear trend"));
    }

    #[test]
    fn test_macd_does_not_override_rsi_reversal() {
        let snapshot = IndicatorSnapshot::new("TEST", 100.0).with_indicators(Indicators {
            rsi: Some(25.0),
            macd: Some(-1.0),
            macd_signal: Some(0.0),
            stoch_k: Some(10.0),
            stoch_d: Some(15.0),
            ..Default::default()
        });
        let momentum = TrendDetector::default().detect(&snapshot).momentum.unwrap();

        assert_eq!(momentum.direction, TrendDirection::Bullish);
        assert_eq!(momentum.strength, 0.7);
        assert!(momentum.signals.contains(&"macd_bearish".to_string()));
        assert!(momentum.signals.contains(&"stoch_oversold".to_string()));
    }

    #[test]
    fn test_moderate_price_move() {
        let detector = TrendDetector::default();
        let component = detector.price_action_component(-0.02);
        assert_eq!(component.direction, TrendDirection::Bearish);
        assert!((component.strength - 0.02 / 0.03).abs() < 1e-9);
    }
}
