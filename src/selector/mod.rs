//! Model selection
//!
//! Chooses the ensemble member set for a request by scoring every active
//! model on composite performance, context history, feature compatibility,
//! and recency, then enforcing diversity across model families.
//!
//! Diversity is enforced against a static type-similarity table (identical
//! type 0.8, same family 0.6, otherwise 0.3). This is a stated heuristic, not
//! a measurement of historical prediction correlation; a rolling pairwise
//! estimator over the prediction cache is the intended replacement.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::registry::ModelRegistry;
use crate::types::{
    EnsembleConfig, ModelType, PredictionContext, SelectionRecord, SelectionStrategy,
};

#[cfg(test)]
mod tests;

/// Per-context outcome history consulted by the scorer
const CONTEXT_WINDOW: usize = 10;

/// Composite-score weights
const W_PERFORMANCE: f64 = 0.4;
const W_CONTEXT: f64 = 0.25;
const W_FEATURES: f64 = 0.15;
const W_RECENCY: f64 = 0.1;
const W_UNCERTAINTY: f64 = 0.1;

pub struct ModelSelector {
    registry: Arc<ModelRegistry>,
    history: RwLock<VecDeque<SelectionRecord>>,
    history_capacity: usize,
    context_outcomes: RwLock<HashMap<(PredictionContext, String), VecDeque<f64>>>,
}

impl ModelSelector {
    pub fn new(registry: Arc<ModelRegistry>, history_capacity: usize) -> Self {
        Self {
            registry,
            history: RwLock::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            context_outcomes: RwLock::new(HashMap::new()),
        }
    }

    /// Select the member set for one prediction call
    ///
    /// Never fails: any internal error degrades to the first `min_models`
    /// active models.
    pub fn select_models(
        &self,
        context: PredictionContext,
        features: &HashMap<String, f64>,
        config: &EnsembleConfig,
    ) -> Vec<String> {
        match self.try_select(context, features, config) {
            Ok(selected) => selected,
            Err(e) => {
                warn!(error = %e, "Model selection failed, using fallback");
                self.fallback_models(config)
            }
        }
    }

    fn try_select(
        &self,
        context: PredictionContext,
        features: &HashMap<String, f64>,
        config: &EnsembleConfig,
    ) -> Result<Vec<String>> {
        let available = self.registry.get_active_models(None);

        if available.len() <= config.min_models {
            return Ok(available);
        }

        let mut scores: HashMap<String, f64> = HashMap::new();
        for name in &available {
            scores.insert(name.clone(), self.score_model(name, context, features));
        }

        let mut ranked = self.apply_strategy(&scores, config);
        ranked = self.ensure_diversity(ranked, &scores, config);
        ranked.truncate(config.max_models);

        self.push_record(SelectionRecord {
            timestamp: Utc::now(),
            context,
            selected: ranked.clone(),
            scores: ranked
                .iter()
                .filter_map(|name| scores.get(name).map(|s| (name.clone(), *s)))
                .collect(),
        });

        Ok(ranked)
    }

    /// Composite score in [0, 1], higher is better
    fn score_model(
        &self,
        name: &str,
        context: PredictionContext,
        features: &HashMap<String, f64>,
    ) -> f64 {
        let metrics = self.registry.metrics(name).unwrap_or_default();

        let performance = metrics.accuracy * 0.3
            + metrics.r2 * 0.2
            + (1.0 - metrics.mse) * 0.2
            + metrics.consistency * 0.15
            + metrics.robustness * 0.15;

        let context_perf = self.context_performance(context, name);
        let feature_compat = self.feature_compatibility(name, features);
        let recency = recency_weight(metrics.last_updated);
        // Low reported confidence counts in favor of exploration
        let uncertainty = 1.0 - metrics.confidence;

        performance * W_PERFORMANCE
            + context_perf * W_CONTEXT
            + feature_compat * W_FEATURES
            + recency * W_RECENCY
            + uncertainty * W_UNCERTAINTY
    }

    /// Mean of the last 10 recorded outcomes for this context, default 0.5
    fn context_performance(&self, context: PredictionContext, name: &str) -> f64 {
        let outcomes = self.context_outcomes.read();
        match outcomes.get(&(context, name.to_string())) {
            Some(history) if !history.is_empty() => {
                history.iter().sum::<f64>() / history.len() as f64
            }
            _ => 0.5,
        }
    }

    /// Share of the model's expected features present in the request
    fn feature_compatibility(&self, name: &str, features: &HashMap<String, f64>) -> f64 {
        let expected = match self.registry.descriptor(name) {
            Some(d) => d.expected_features,
            None => return 0.5,
        };
        if expected.is_empty() {
            return 1.0;
        }
        let overlap = expected.iter().filter(|f| features.contains_key(*f)).count();
        overlap as f64 / expected.len() as f64
    }

    /// Rank candidates according to the configured strategy
    ///
    /// `Dynamic` and `Bayesian` are explicit extension points; both fall back
    /// to top-K ranking until a real trend/posterior model exists.
    fn apply_strategy(&self, scores: &HashMap<String, f64>, config: &EnsembleConfig) -> Vec<String> {
        match config.strategy {
            SelectionStrategy::TopK => {}
            SelectionStrategy::Dynamic => {
                debug!("Dynamic selection strategy not implemented, falling back to top-k");
            }
            SelectionStrategy::Bayesian => {
                debug!("Bayesian selection strategy not implemented, falling back to top-k");
            }
        }

        let mut ranked: Vec<(String, f64)> =
            scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().map(|(name, _)| name).collect()
    }

    /// Greedy diversity filter, backfilled to honor `min_models`
    fn ensure_diversity(
        &self,
        ranked: Vec<String>,
        scores: &HashMap<String, f64>,
        config: &EnsembleConfig,
    ) -> Vec<String> {
        if ranked.len() <= 2 {
            return ranked;
        }

        let mut kept: Vec<String> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();

        for candidate in ranked {
            if kept.is_empty() {
                kept.push(candidate);
                continue;
            }
            let diverse = kept.iter().all(|existing| {
                self.model_correlation(&candidate, existing) < 1.0 - config.diversity_threshold
            });
            if diverse {
                kept.push(candidate);
            } else {
                skipped.push(candidate);
            }
        }

        // Correlated models are re-admitted, best score first, only when the
        // diverse set alone cannot reach min_models.
        let mut backfill = skipped;
        backfill.sort_by(|a, b| {
            let sa = scores.get(a).copied().unwrap_or(0.0);
            let sb = scores.get(b).copied().unwrap_or(0.0);
            sb.total_cmp(&sa)
        });
        for candidate in backfill {
            if kept.len() >= config.min_models {
                break;
            }
            kept.push(candidate);
        }

        kept
    }

    /// Type-similarity stand-in for prediction correlation
    fn model_correlation(&self, a: &str, b: &str) -> f64 {
        let (type_a, type_b) = match (self.registry.model_type(a), self.registry.model_type(b)) {
            (Some(ta), Some(tb)) => (ta, tb),
            _ => return 0.3,
        };
        type_correlation(type_a, type_b)
    }

    /// Deterministic fallback when scoring fails for any reason
    fn fallback_models(&self, config: &EnsembleConfig) -> Vec<String> {
        let mut models = self.registry.get_active_models(None);
        models.truncate(config.min_models);
        models
    }

    /// Record an observed per-context outcome score for a model
    pub fn record_outcome(&self, context: PredictionContext, name: &str, score: f64) {
        let mut outcomes = self.context_outcomes.write();
        let history = outcomes
            .entry((context, name.to_string()))
            .or_insert_with(|| VecDeque::with_capacity(CONTEXT_WINDOW));
        if history.len() >= CONTEXT_WINDOW {
            history.pop_front();
        }
        history.push_back(score.clamp(0.0, 1.0));
    }

    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    pub fn recent_history(&self, n: usize) -> Vec<SelectionRecord> {
        let history = self.history.read();
        history.iter().rev().take(n).cloned().collect()
    }

    fn push_record(&self, record: SelectionRecord) {
        let mut history = self.history.write();
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(record);
    }
}

/// Recency weight decaying to zero over one week
fn recency_weight(last_updated: chrono::DateTime<Utc>) -> f64 {
    let age_hours = (Utc::now() - last_updated).num_seconds() as f64 / 3600.0;
    (1.0 - age_hours / 168.0).max(0.0)
}

/// Static correlation heuristic between model types
fn type_correlation(a: ModelType, b: ModelType) -> f64 {
    if a == b {
        0.8
    } else if a.family() == b.family() {
        0.6
    } else {
        0.3
    }
}
