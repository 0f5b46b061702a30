//! Rolling error metrics over participant records

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use tracing::warn;

use crate::registry::ParticipantRecord;
use common::MarketRegime;

/// Error assumed before any evidence arrives
pub const PESSIMISTIC_ERROR: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeErrorStats {
    pub samples: usize,
    pub mean_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePerformance {
    pub by_regime: BTreeMap<MarketRegime, RegimeErrorStats>,
    /// Regime with the lowest mean error
    pub best: Option<MarketRegime>,
    pub worst: Option<MarketRegime>,
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorTracker {
    window_size: usize,
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(20)
    }
}

impl ErrorTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Mean of the last `window_size` errors, or 1.0 with no usable history
    pub fn average_error(&self, record: &ParticipantRecord) -> f64 {
        windowed_mean(&record.errors, self.window_size).unwrap_or(PESSIMISTIC_ERROR)
    }

    /// Rolling error restricted to samples taken under `regime`
    pub fn error_for_regime(&self, record: &ParticipantRecord, regime: MarketRegime) -> f64 {
        match record
            .regime_errors
            .get(&regime)
            .and_then(|errors| windowed_mean(errors, self.window_size))
        {
            Some(error) => error,
            None => {
                warn!(agent = %record.name, regime = %regime, "No regime samples, using overall error");
                self.average_error(record)
            }
        }
    }

    pub fn regime_performance(&self, record: &ParticipantRecord) -> RegimePerformance {
        let by_regime: BTreeMap<MarketRegime, RegimeErrorStats> = record
            .regime_errors
            .iter()
            .filter_map(|(regime, errors)| {
                let mean_error = windowed_mean(errors, errors.len())?;
                Some((
                    *regime,
                    RegimeErrorStats {
                        samples: errors.len(),
                        mean_error,
                    },
                ))
            })
            .collect();

        let ranked = |pick_lower: bool| {
            by_regime
                .iter()
                .fold(None, |best: Option<(MarketRegime, f64)>, (regime, stats)| match best {
                    Some((_, e)) if (pick_lower && e <= stats.mean_error)
                        || (!pick_lower && e >= stats.mean_error) => best,
                    _ => Some((*regime, stats.mean_error)),
                })
                .map(|(regime, _)| regime)
        };

        RegimePerformance {
            best: ranked(true),
            worst: ranked(false),
            by_regime,
        }
    }
}

fn windowed_mean(errors: &[f64], window: usize) -> Option<f64> {
    let start = errors.len().saturating_sub(window);
    let tail = &errors[start..];
    if tail.is_empty() {
        return None;
    }
    let mean = tail.iter().mean();
    mean.is_finite().then_some(mean)
}
