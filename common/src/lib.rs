//! Shared vocabulary for the adaptive weighting workspace
//!
//! Types every layer agrees on:
//! - `Layer` - the closed set of participant roles
//! - `MarketRegime` - the closed set of classified market conditions
//! - `IndicatorSnapshot` - the indicator values handed in by a data provider
//! - `EngineError` - the error taxonomy surfaced to callers

pub mod error;
pub mod snapshot;
pub mod types;

pub use error::{EngineError, Result};
pub use snapshot::{IndicatorSnapshot, Indicators};
pub use types::{Layer, MarketRegime, TrendDirection, VolatilityLevel};
