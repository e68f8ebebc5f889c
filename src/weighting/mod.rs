//! Dynamic model weighting
//!
//! Turns recent outcome history and context preferences into per-model
//! weights that always sum to 1.0 for a call.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::registry::ModelRegistry;
use crate::types::{CachedPrediction, ModelType, PredictionContext, WeightRecord};


/// Exponential decay applied per step into the past
const DECAY: f64 = 0.9;
/// Performance weight for models without any resolved history
const DEFAULT_PERFORMANCE: f64 = 0.5;

const W_PERFORMANCE: f64 = 0.5;
const W_CONTEXT: f64 = 0.3;
const W_DIVERSITY: f64 = 0.2;

pub struct WeightingEngine {
    registry: Arc<ModelRegistry>,
    history: RwLock<HashMap<String, VecDeque<WeightRecord>>>,
    history_capacity: usize,
}

impl WeightingEngine {
    pub fn new(registry: Arc<ModelRegistry>, history_capacity: usize) -> Self {
        Self {
            registry,
            history: RwLock::new(HashMap::new()),
            history_capacity,
        }
    }

    /// Compute normalized weights for the selected member set
    ///
    /// `recent` is consumed newest-last (cache order); only entries with an
    /// observed actual value contribute to performance.
    pub fn calculate_weights(
        &self,
        models: &[String],
        context: PredictionContext,
        recent: &[CachedPrediction],
    ) -> HashMap<String, f64> {
        if models.is_empty() {
            return HashMap::new();
        }
        if models.len() == 1 {
            let weights: HashMap<String, f64> = [(models[0].clone(), 1.0)].into();
            self.record(&weights, context);
            return weights;
        }

        let performance = self.performance_weights(models, recent);

        let mut combined: HashMap<String, f64> = HashMap::new();
        for model in models {
            let perf = performance.get(model).copied().unwrap_or(DEFAULT_PERFORMANCE);
            let ctx = self.context_adjustment(model, context);
            let diversity = self.diversity_bonus(model);
            combined.insert(
                model.clone(),
                perf * W_PERFORMANCE + ctx * W_CONTEXT + diversity * W_DIVERSITY,
            );
        }

        let total: f64 = combined.values().sum();
        let weights: HashMap<String, f64> = if total > 0.0 {
            combined.into_iter().map(|(k, v)| (k, v / total)).collect()
        } else {
            let equal = 1.0 / models.len() as f64;
            models.iter().map(|m| (m.clone(), equal)).collect()
        };

        debug!(context = %context, ?weights, "Calculated ensemble weights");
        self.record(&weights, context);
        weights
    }

    /// Decayed accuracy against observed outcomes, newest weighted highest
    fn performance_weights(
        &self,
        models: &[String],
        recent: &[CachedPrediction],
    ) -> HashMap<String, f64> {
        // accuracy[model] = [(decay_weight, per-sample accuracy)]
        let mut samples: HashMap<&str, Vec<(f64, f64)>> = HashMap::new();

        for (age, cached) in recent.iter().rev().enumerate() {
            let actual = match cached.actual_value {
                Some(a) => a,
                None => continue,
            };
            let decay = DECAY.powi(age as i32);
            for member in &cached.member_predictions {
                let error = (actual - member.value).abs() / actual.abs().max(1.0);
                let accuracy = (1.0 - error).max(0.0);
                samples
                    .entry(member.model_name.as_str())
                    .or_default()
                    .push((decay, accuracy));
            }
        }

        models
            .iter()
            .map(|model| {
                let weight = match samples.get(model.as_str()) {
                    Some(points) if !points.is_empty() => {
                        let total: f64 = points.iter().map(|(d, _)| d).sum();
                        points.iter().map(|(d, a)| d * a).sum::<f64>() / total
                    }
                    _ => DEFAULT_PERFORMANCE,
                };
                (model.clone(), weight)
            })
            .collect()
    }

    /// Context preference multiplier from the type-preference table
    fn context_adjustment(&self, model: &str, context: PredictionContext) -> f64 {
        match self.registry.model_type(model) {
            Some(model_type) => context_preference(context, model_type),
            None => 1.0,
        }
    }

    /// Extension point for measured diversity scoring; neutral for now
    fn diversity_bonus(&self, _model: &str) -> f64 {
        1.0
    }

    fn record(&self, weights: &HashMap<String, f64>, context: PredictionContext) {
        let now = Utc::now();
        let mut history = self.history.write();
        for (model, weight) in weights {
            let entries = history
                .entry(model.clone())
                .or_insert_with(|| VecDeque::with_capacity(self.history_capacity));
            if entries.len() >= self.history_capacity {
                entries.pop_front();
            }
            entries.push_back(WeightRecord {
                timestamp: now,
                model_name: model.clone(),
                weight: *weight,
                context,
            });
        }
    }

    pub fn history_len(&self, model: &str) -> usize {
        self.history.read().get(model).map_or(0, |h| h.len())
    }

    pub fn recent_weights(&self, model: &str, n: usize) -> Vec<WeightRecord> {
        self.history
            .read()
            .get(model)
            .map(|h| h.iter().rev().take(n).cloned().collect())
            .unwrap_or_default()
    }
}

/// Context to model-type preference table; unknown pairs are neutral
fn context_preference(context: PredictionContext, model_type: ModelType) -> f64 {
    match (context, model_type) {
        (PredictionContext::LiveGame, ModelType::Xgboost) => 1.2,
        (PredictionContext::LiveGame, ModelType::Lightgbm) => 1.1,
        (PredictionContext::LiveGame, ModelType::NeuralNetwork) => 0.9,
        (PredictionContext::PlayerProps, ModelType::RandomForest) => 1.2,
        (PredictionContext::PlayerProps, ModelType::NeuralNetwork) => 1.1,
        (PredictionContext::PlayerProps, ModelType::LinearRegression) => 0.8,
        _ => 1.0,
    }
}
