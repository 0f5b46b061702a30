//! Participant registry
//!
//! One record per named participant. The name map is a `DashMap` so lookups
//! and registrations on different shards never contend; each record sits
//! behind its own mutex so updates to one participant serialize without
//! blocking the others.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::policy::{LayerPolicy, LayerPolicyTable};
use common::{EngineError, Layer, MarketRegime, Result};

/// Accuracy history and current trust weight of one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub name: String,
    pub layer: Layer,
    pub current_weight: f64,
    pub predictions: Vec<f64>,
    pub actuals: Vec<f64>,
    /// `errors[i]` derives from `predictions[i]` and `actuals[i]`
    pub errors: Vec<f64>,
    /// Weights replaced by updates, oldest first
    pub weight_history: Vec<f64>,
    /// Errors observed while each regime was active
    pub regime_errors: BTreeMap<MarketRegime, Vec<f64>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ParticipantRecord {
    pub fn new(name: impl Into<String>, layer: Layer, weight: f64) -> Self {
        Self {
            name: name.into(),
            layer,
            current_weight: weight,
            predictions: Vec::new(),
            actuals: Vec::new(),
            errors: Vec::new(),
            weight_history: Vec::new(),
            regime_errors: BTreeMap::new(),
            last_updated: None,
        }
    }

    /// Predictions still waiting for an actual
    pub fn pending_predictions(&self) -> usize {
        self.predictions.len().saturating_sub(self.actuals.len())
    }
}

pub type RecordHandle = Arc<Mutex<ParticipantRecord>>;

#[derive(Debug)]
pub struct AgentRegistry {
    records: DashMap<String, RecordHandle>,
    /// Denominator floor for relative errors
    epsilon: f64,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(1e-9)
    }
}

impl AgentRegistry {
    pub fn new(epsilon: f64) -> Self {
        Self {
            records: DashMap::new(),
            epsilon,
        }
    }

    /// Create a record, or move an existing one to `policy`'s layer.
    ///
    /// An existing record keeps its weight and history; the weight is only
    /// pulled into the new layer's bounds. Returns `true` for a new record.
    pub fn register(&self, name: &str, policy: &LayerPolicy, initial_weight: f64) -> bool {
        match self.records.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let mut record = entry.get().lock();
                let previous_layer = record.layer;
                record.layer = policy.layer;
                let clamped = policy.clamp(record.current_weight);
                if clamped != record.current_weight {
                    let old = record.current_weight;
                    record.weight_history.push(old);
                    record.current_weight = clamped;
                }
                info!(
                    agent = %name,
                    from = %previous_layer,
                    layer = %policy.layer,
                    weight = record.current_weight,
                    "Participant re-registered"
                );
                false
            }
            Entry::Vacant(entry) => {
                let weight = policy.clamp(initial_weight);
                entry.insert(Arc::new(Mutex::new(ParticipantRecord::new(
                    name,
                    policy.layer,
                    weight,
                ))));
                info!(agent = %name, layer = %policy.layer, weight, "Participant registered");
                true
            }
        }
    }

    /// Shared handle to a record. The map guard is released before returning.
    pub fn handle(&self, name: &str) -> Result<RecordHandle> {
        match self.records.get(name) {
            Some(entry) => Ok(Arc::clone(entry.value())),
            None => {
                warn!(agent = %name, "Unknown participant");
                Err(EngineError::UnknownAgent(name.to_string()))
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn record_prediction(&self, name: &str, value: f64) -> Result<()> {
        let handle = self.handle(name)?;
        let value = finite("prediction", value)?;

        let mut record = handle.lock();
        record.predictions.push(value);
        debug!(agent = %name, value, count = record.predictions.len(), "Prediction recorded");
        Ok(())
    }

    /// Append an actual; returns the relative error once it pairs with a prediction
    pub fn record_actual(
        &self,
        name: &str,
        value: f64,
        regime: Option<MarketRegime>,
    ) -> Result<Option<f64>> {
        let handle = self.handle(name)?;
        let value = finite("actual", value)?;

        let mut record = handle.lock();
        record.actuals.push(value);
        if record.predictions.len() != record.actuals.len() {
            debug!(
                agent = %name,
                predictions = record.predictions.len(),
                actuals = record.actuals.len(),
                "Actual recorded without a matching prediction"
            );
            return Ok(None);
        }

        let prediction = record.predictions[record.predictions.len() - 1];
        let error = (prediction - value).abs() / value.abs().max(self.epsilon);
        record.errors.push(error);
        if let Some(regime) = regime {
            record.regime_errors.entry(regime).or_default().push(error);
        }
        record.last_updated = Some(Utc::now());

        debug!(agent = %name, prediction, actual = value, error, "Error recorded");
        Ok(Some(error))
    }

    /// Replace the weight, clamped into the bounds of the record's layer.
    /// Returns the old weight.
    pub fn update_weight(&self, name: &str, policies: &LayerPolicyTable, weight: f64) -> Result<f64> {
        let handle = self.handle(name)?;
        let weight = finite("weight", weight)?;

        let mut record = handle.lock();
        let policy = policies.get(record.layer);
        let bounded = policy.clamp(weight);
        if bounded != weight {
            debug!(
                agent = %name,
                requested = weight,
                stored = bounded,
                min = policy.min_weight,
                max = policy.max_weight,
                "Weight clamped into layer bounds"
            );
        }
        let old = record.current_weight;
        record.weight_history.push(old);
        record.current_weight = bounded;
        Ok(old)
    }

    pub fn get_weight(&self, name: &str) -> Result<f64> {
        Ok(self.handle(name)?.lock().current_weight)
    }

    /// Raw weights of every participant, ordered by name
    pub fn weights(&self) -> BTreeMap<String, f64> {
        let handles: Vec<(String, RecordHandle)> = self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        handles
            .into_iter()
            .map(|(name, handle)| {
                let weight = handle.lock().current_weight;
                (name, weight)
            })
            .collect()
    }

    /// Copy of one record
    pub fn snapshot(&self, name: &str) -> Result<ParticipantRecord> {
        Ok(self.handle(name)?.lock().clone())
    }

    /// Restore a fresh record, keeping the layer
    pub fn reset(&self, name: &str, policy: &LayerPolicy, initial_weight: f64) -> Result<()> {
        let handle = self.handle(name)?;
        let mut record = handle.lock();
        *record = ParticipantRecord::new(name, policy.layer, policy.clamp(initial_weight));
        info!(agent = %name, layer = %policy.layer, weight = record.current_weight, "Participant reset");
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn finite(field: &'static str, value: f64) -> Result<f64> {
    EngineError::check_finite(field, value).map_err(|e| {
        warn!(field, value, "Rejected non-finite value");
        e
    })
}
