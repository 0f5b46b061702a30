// Regime History
// Bounded record of classifications for transition and phase queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::classifier::RegimeResult;
use common::MarketRegime;

/// Number of recent entries that decide the market phase
const PHASE_WINDOW: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeEntry {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub regime: MarketRegime,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeTransition {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub from: MarketRegime,
    pub to: MarketRegime,
    /// Confidence of the new regime minus that of the old one
    pub confidence_change: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketPhase {
    Trending,
    Ranging,
    Volatile,
    Transitional,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeStatistics {
    pub total_observations: usize,
    pub distribution: BTreeMap<MarketRegime, usize>,
    pub most_common: Option<MarketRegime>,
    pub average_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct RegimeHistory {
    entries: VecDeque<RegimeEntry>,
    capacity: usize,
}

impl Default for RegimeHistory {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl RegimeHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a classification, evicting the oldest entry when full
    pub fn record(&mut self, symbol: &str, result: &RegimeResult) {
        self.push(RegimeEntry {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            regime: result.regime,
            confidence: result.confidence,
        });
    }

    pub fn push(&mut self, entry: RegimeEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&RegimeEntry> {
        self.entries.back()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegimeEntry> {
        self.entries.iter()
    }

    /// Regime changes among the last `lookback` entries, oldest first
    pub fn transitions(&self, lookback: usize) -> Vec<RegimeTransition> {
        let start = self.entries.len().saturating_sub(lookback);
        let recent: Vec<&RegimeEntry> = self.entries.iter().skip(start).collect();

        recent
            .windows(2)
            .filter(|pair| pair[0].regime != pair[1].regime)
            .map(|pair| RegimeTransition {
                timestamp: pair[1].timestamp,
                symbol: pair[1].symbol.clone(),
                from: pair[0].regime,
                to: pair[1].regime,
                confidence_change: pair[1].confidence - pair[0].confidence,
            })
            .collect()
    }

    /// Dominant regime family over the recent window
    pub fn market_phase(&self) -> MarketPhase {
        if self.entries.is_empty() {
            return MarketPhase::Unknown;
        }

        let start = self.entries.len().saturating_sub(PHASE_WINDOW);
        let mut counts: BTreeMap<MarketRegime, usize> = BTreeMap::new();
        for entry in self.entries.iter().skip(start) {
            *counts.entry(entry.regime).or_default() += 1;
        }

        match dominant(&counts) {
            Some(MarketRegime::TrendingBull | MarketRegime::TrendingBear) => MarketPhase::Trending,
            Some(MarketRegime::Ranging | MarketRegime::Consolidation | MarketRegime::LowVolatility) => {
                MarketPhase::Ranging
            }
            Some(MarketRegime::Volatile) => MarketPhase::Volatile,
            _ => MarketPhase::Transitional,
        }
    }

    pub fn statistics(&self) -> RegimeStatistics {
        let mut distribution = BTreeMap::new();
        let mut confidence_sum = 0.0;
        for entry in &self.entries {
            *distribution.entry(entry.regime).or_default() += 1;
            confidence_sum += entry.confidence;
        }

        let total = self.entries.len();
        RegimeStatistics {
            total_observations: total,
            most_common: dominant(&distribution),
            average_confidence: if total > 0 {
                confidence_sum / total as f64
            } else {
                0.0
            },
            distribution,
        }
    }
}

/// Highest count wins; ties go to the regime declared first
fn dominant(counts: &BTreeMap<MarketRegime, usize>) -> Option<MarketRegime> {
    counts
        .iter()
        .fold(None, |best: Option<(MarketRegime, usize)>, (regime, count)| match best {
            Some((_, best_count)) if best_count >= *count => best,
            _ => Some((*regime, *count)),
        })
        .map(|(regime, _)| regime)
}
