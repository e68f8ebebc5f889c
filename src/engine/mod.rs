//! Ensemble orchestrator
//!
//! Sequences selection, parallel inference, weighting, aggregation, and
//! meta-correction per prediction call, and owns the background maintenance
//! loops (rebalancing, performance monitoring, meta-learning refresh).

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::inference::{FeatureEngineer, MetricsStore, ModelLoader};
use crate::meta::MetaLearner;
use crate::registry::ModelRegistry;
use crate::selector::ModelSelector;
use crate::types::{
    CachedPrediction, EnsembleConfig, EnsembleHealth, EnsemblePrediction, ModelHealth,
    ModelMetrics, ModelPrediction, PredictionContext,
};
use crate::weighting::WeightingEngine;


/// The ensemble prediction engine
///
/// Construct one per process and share it behind an `Arc`; there is no
/// module-level singleton.
pub struct EnsembleEngine {
    config: Config,
    default_ensemble: RwLock<EnsembleConfig>,
    registry: Arc<ModelRegistry>,
    selector: Arc<ModelSelector>,
    weighting: Arc<WeightingEngine>,
    meta: Arc<MetaLearner>,
    features: Arc<dyn FeatureEngineer>,
    cache: Arc<RwLock<VecDeque<CachedPrediction>>>,
    inference_permits: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl EnsembleEngine {
    pub fn new(
        config: Config,
        loader: Arc<dyn ModelLoader>,
        features: Arc<dyn FeatureEngineer>,
        metrics_store: Option<Arc<dyn MetricsStore>>,
    ) -> Self {
        let mut registry = ModelRegistry::new(loader);
        if let Some(store) = metrics_store {
            registry = registry.with_metrics_store(store);
        }
        let registry = Arc::new(registry);

        let selector = Arc::new(ModelSelector::new(
            registry.clone(),
            config.engine.selection_history_size,
        ));
        let weighting = Arc::new(WeightingEngine::new(
            registry.clone(),
            config.engine.weight_history_size,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            default_ensemble: RwLock::new(config.ensemble.clone()),
            inference_permits: Arc::new(Semaphore::new(config.engine.max_concurrency)),
            cache: Arc::new(RwLock::new(VecDeque::with_capacity(
                config.engine.prediction_cache_size,
            ))),
            registry,
            selector,
            weighting,
            meta: Arc::new(MetaLearner::new()),
            features,
            shutdown_tx,
            loops: Mutex::new(Vec::new()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn register_model(&self, descriptor: crate::types::ModelDescriptor) -> Result<()> {
        self.registry.register(descriptor)
    }

    pub fn get_active_models(&self) -> Vec<String> {
        self.registry.get_active_models(None)
    }

    pub async fn update_model_metrics(&self, name: &str, metrics: ModelMetrics) -> Result<()> {
        self.registry.update_metrics(name, metrics).await
    }

    pub fn default_config(&self) -> EnsembleConfig {
        self.default_ensemble.read().clone()
    }

    pub fn set_default_config(&self, config: EnsembleConfig) {
        *self.default_ensemble.write() = config;
    }

    /// Generate an ensemble prediction
    ///
    /// Member inferences run concurrently under a bounded permit set with a
    /// per-model deadline; slow or failing members are dropped from the call,
    /// which only fails once zero members succeed.
    pub async fn predict(
        &self,
        raw_features: &HashMap<String, f64>,
        context: PredictionContext,
        config_override: Option<EnsembleConfig>,
    ) -> Result<EnsemblePrediction> {
        let started = Instant::now();
        let config = config_override.unwrap_or_else(|| self.default_config());

        let features = self.features.engineer(raw_features)?;

        let selected = self.selector.select_models(context, &features, &config);
        if selected.is_empty() {
            return Err(EngineError::NoModelsAvailable);
        }
        debug!(context = %context, models = ?selected, "Selected ensemble members");

        let members = self.infer_members(&selected, &features, context).await;
        if members.is_empty() {
            return Err(EngineError::NoPredictions);
        }

        let member_names: Vec<String> = members.iter().map(|m| m.model_name.clone()).collect();
        let recent = self.recent_cache(self.config.engine.weighting_window);
        let weights = self
            .weighting
            .calculate_weights(&member_names, context, &recent);

        let combined = aggregator::aggregate(&members, &weights, &config)?;

        let (value, interval, meta_correction) =
            match self.meta.apply(combined.value, &members, combined.confidence) {
                Some(correction) => {
                    let mut interval = combined.interval;
                    interval.lower += correction.delta;
                    interval.upper += correction.delta;
                    (correction.corrected_value, interval, Some(correction.delta))
                }
                None => (combined.value, combined.interval, None),
            };

        let prediction = EnsemblePrediction {
            id: Uuid::new_v4(),
            value,
            interval,
            confidence: combined.confidence,
            feature_importance: combined.feature_importance,
            attribution: combined.attribution,
            uncertainty: combined.uncertainty,
            model_agreement: combined.model_agreement,
            context,
            member_models: member_names,
            weights: weights.clone(),
            meta_correction,
            processing_time_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        };

        self.cache_prediction(&prediction, members, weights);
        info!(
            id = %prediction.id,
            context = %context,
            value = prediction.value,
            agreement = prediction.model_agreement,
            members = prediction.member_models.len(),
            elapsed_ms = prediction.processing_time_ms,
            "Ensemble prediction complete"
        );
        Ok(prediction)
    }

    /// Fan out inference across selected models, dropping failures
    async fn infer_members(
        &self,
        selected: &[String],
        features: &HashMap<String, f64>,
        context: PredictionContext,
    ) -> Vec<ModelPrediction> {
        let timeout = Duration::from_millis(self.config.engine.inference_timeout_ms);
        let features = Arc::new(features.clone());

        let mut handles = Vec::with_capacity(selected.len());
        for name in selected {
            let name = name.clone();
            let registry = self.registry.clone();
            let permits = self.inference_permits.clone();
            let features = features.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                let handle = match registry.load_model(&name).await {
                    Ok(h) => h,
                    Err(e) => {
                        warn!(model = %name, error = %e, "Member load failed, dropping from call");
                        return None;
                    }
                };
                match tokio::time::timeout(timeout, handle.infer(&features)).await {
                    Ok(Ok(output)) => Some((name, output)),
                    Ok(Err(e)) => {
                        warn!(model = %name, error = %e, "Member inference failed, dropping from call");
                        None
                    }
                    Err(_) => {
                        warn!(model = %name, timeout_ms = timeout.as_millis() as u64, "Member inference timed out, dropping from call");
                        None
                    }
                }
            }));
        }

        let mut members = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(Some((name, output))) = handle.await {
                let model_type = self
                    .registry
                    .model_type(&name)
                    .unwrap_or(crate::types::ModelType::Xgboost);
                members.push(ModelPrediction {
                    model_name: name,
                    model_type,
                    value: output.value,
                    interval: output.interval,
                    probability: output.probability,
                    feature_importance: output.feature_importance,
                    attribution: output.attribution,
                    context,
                    timestamp: Utc::now(),
                });
            }
        }
        members
    }

    /// Back-fill the observed outcome for a cached prediction
    ///
    /// Feeds the selector's per-context history so future selection scores
    /// reflect how each member actually performed.
    pub fn record_outcome(&self, prediction_id: Uuid, actual: f64) -> Result<()> {
        let mut cache = self.cache.write();
        let entry = cache
            .iter_mut()
            .find(|p| p.id == prediction_id)
            .ok_or_else(|| EngineError::NotFound(prediction_id.to_string()))?;
        entry.actual_value = Some(actual);

        let context = entry.context;
        let outcomes: Vec<(String, f64)> = entry
            .member_predictions
            .iter()
            .map(|member| {
                let error = (actual - member.value).abs() / actual.abs().max(1.0);
                (member.model_name.clone(), (1.0 - error).max(0.0))
            })
            .collect();
        drop(cache);

        for (model, score) in outcomes {
            self.selector.record_outcome(context, &model, score);
        }
        Ok(())
    }

    /// Start the background maintenance loops
    ///
    /// Each loop runs until `shutdown()`, catching and logging its own
    /// failures; a loop error never terminates the process.
    pub fn start(self: Arc<Self>) {
        let mut loops = self.loops.lock();
        if !loops.is_empty() {
            warn!("Background loops already started");
            return;
        }

        let rebalance_every = Duration::from_secs(
            self.default_config().rebalance_frequency_hours.max(1) * 3600,
        );
        loops.push(spawn_loop(
            "rebalancing",
            rebalance_every,
            self.shutdown_tx.subscribe(),
            {
                let engine = self.clone();
                move || {
                    let engine = engine.clone();
                    async move { engine.rebalance() }
                }
            },
        ));

        loops.push(spawn_loop(
            "performance-monitoring",
            Duration::from_secs(self.config.engine.monitor_interval_secs),
            self.shutdown_tx.subscribe(),
            {
                let engine = self.clone();
                move || {
                    let engine = engine.clone();
                    async move { engine.refresh_model_metrics().await }
                }
            },
        ));

        loops.push(spawn_loop(
            "meta-learning",
            Duration::from_secs(self.config.engine.meta_refresh_interval_secs),
            self.shutdown_tx.subscribe(),
            {
                let engine = self.clone();
                move || {
                    let engine = engine.clone();
                    async move { engine.refresh_meta_learner().await }
                }
            },
        ));

        info!("Background maintenance loops started");
    }

    /// Signal all loops and join them deterministically
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.loops.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Background loop panicked during shutdown");
            }
        }
        info!("Background loops stopped");
    }

    /// Re-derive the default ensemble configuration from registry state
    fn rebalance(&self) -> Result<()> {
        let active = self.registry.get_active_models(None);
        let mut config = self.default_config();

        let mut types: Vec<_> = active
            .iter()
            .filter_map(|name| self.registry.model_type(name))
            .collect();
        types.sort_by_key(|t| format!("{}", t));
        types.dedup();
        if !types.is_empty() {
            config.base_models = types;
        }
        config.max_models = config.max_models.max(config.min_models);

        info!(
            active = active.len(),
            base_models = config.base_models.len(),
            "Rebalanced default ensemble configuration"
        );
        self.set_default_config(config);
        Ok(())
    }

    /// Recompute rolling per-model metrics from resolved cache entries
    async fn refresh_model_metrics(&self) -> Result<()> {
        let resolved: Vec<CachedPrediction> = {
            let cache = self.cache.read();
            cache
                .iter()
                .filter(|p| p.actual_value.is_some())
                .cloned()
                .collect()
        };
        if resolved.is_empty() {
            return Ok(());
        }

        // model -> (accuracy, abs error, squared error, actual)
        let mut samples: HashMap<String, Vec<(f64, f64, f64, f64)>> = HashMap::new();
        for entry in &resolved {
            let actual = entry.actual_value.unwrap_or(0.0);
            for member in &entry.member_predictions {
                let abs_err = (actual - member.value).abs();
                let rel_err = abs_err / actual.abs().max(1.0);
                samples.entry(member.model_name.clone()).or_default().push((
                    (1.0 - rel_err).max(0.0),
                    abs_err,
                    abs_err * abs_err,
                    actual,
                ));
            }
        }

        for (model, points) in samples {
            let n = points.len() as f64;
            let accuracy = points.iter().map(|p| p.0).sum::<f64>() / n;
            let mae = points.iter().map(|p| p.1).sum::<f64>() / n;
            let mse = points.iter().map(|p| p.2).sum::<f64>() / n;

            let actual_mean = points.iter().map(|p| p.3).sum::<f64>() / n;
            let ss_tot: f64 = points.iter().map(|p| (p.3 - actual_mean).powi(2)).sum();
            let ss_res: f64 = points.iter().map(|p| p.2).sum();
            let r2 = if ss_tot > 0.0 {
                (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
            } else {
                0.0
            };

            let acc_var = points.iter().map(|p| (p.0 - accuracy).powi(2)).sum::<f64>() / n;
            let consistency = (1.0 - acc_var.sqrt()).clamp(0.0, 1.0);
            let robustness = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);

            let metrics = ModelMetrics {
                accuracy,
                r2,
                mse: mse.min(1.0),
                mae,
                consistency,
                robustness: if robustness.is_finite() { robustness } else { 0.0 },
                confidence: accuracy,
                sample_count: points.len(),
                last_updated: Utc::now(),
            };
            if let Err(e) = self.registry.update_metrics(&model, metrics).await {
                // A member may have been deregistered since it last predicted
                debug!(model = %model, error = %e, "Skipping metrics refresh");
            }
        }
        Ok(())
    }

    /// Retrain the meta-learner once enough resolved samples exist
    async fn refresh_meta_learner(&self) -> Result<()> {
        let resolved: Vec<CachedPrediction> = {
            let cache = self.cache.read();
            cache
                .iter()
                .filter(|p| p.actual_value.is_some())
                .cloned()
                .collect()
        };
        if resolved.len() < self.config.engine.meta_min_samples {
            return Ok(());
        }

        let meta = self.meta.clone();
        let min_samples = self.config.engine.meta_min_samples;
        let fit = tokio::task::spawn_blocking(move || meta.fit(&resolved, min_samples));

        let deadline = Duration::from_millis(self.config.engine.meta_fit_timeout_ms);
        match tokio::time::timeout(deadline, fit).await {
            // The swap happens here, after the deadline check: a fit that
            // outlives the timeout is dropped with its join handle and the
            // prior corrector stays live.
            Ok(Ok(Some(fitted))) => {
                self.meta.install(fitted);
                Ok(())
            }
            Ok(Ok(None)) => Ok(()),
            Ok(Err(e)) => Err(EngineError::Validation(format!("Meta fit task failed: {}", e))),
            Err(_) => Err(EngineError::Timeout {
                what: "meta-learner fit".to_string(),
                ms: deadline.as_millis() as u64,
            }),
        }
    }

    /// Health snapshot
    pub fn health(&self) -> EnsembleHealth {
        let active = self.registry.get_active_models(None);
        let cache = self.cache.read();
        let resolved = cache.iter().filter(|p| p.actual_value.is_some()).count();

        let mut model_health = HashMap::new();
        for name in &active {
            if let Some(metrics) = self.registry.metrics(name) {
                model_health.insert(
                    name.clone(),
                    ModelHealth {
                        accuracy: metrics.accuracy,
                        confidence: metrics.confidence,
                        last_updated: metrics.last_updated,
                        is_loaded: self.registry.is_loaded(name),
                    },
                );
            }
        }
        let loaded = self.registry.loaded_count();

        EnsembleHealth {
            status: if active.is_empty() { "degraded" } else { "healthy" }.to_string(),
            total_models: active.len(),
            loaded_models: loaded,
            cache_size: cache.len(),
            resolved_samples: resolved,
            meta_learner_active: self.meta.is_active(),
            model_health,
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }

    fn recent_cache(&self, n: usize) -> Vec<CachedPrediction> {
        let cache = self.cache.read();
        let skip = cache.len().saturating_sub(n);
        cache.iter().skip(skip).cloned().collect()
    }

    fn cache_prediction(
        &self,
        prediction: &EnsemblePrediction,
        members: Vec<ModelPrediction>,
        weights: HashMap<String, f64>,
    ) {
        let mut cache = self.cache.write();
        if cache.len() >= self.config.engine.prediction_cache_size {
            cache.pop_front();
        }
        cache.push_back(CachedPrediction {
            id: prediction.id,
            timestamp: prediction.timestamp,
            context: prediction.context,
            member_predictions: members,
            weights,
            ensemble_value: prediction.value,
            ensemble_confidence: prediction.confidence,
            actual_value: None,
        });
    }
}

/// Spawn a maintenance loop that ticks until shutdown
///
/// The loop owns its shutdown receiver; tick failures are logged and the
/// loop continues on the next tick.
fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // First tick fires immediately; consume it so work starts one
        // period after startup.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = tick().await {
                        error!(loop_name = name, error = %e, "Background loop tick failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!(loop_name = name, "Background loop stopping");
                        break;
                    }
                }
            }
        }
    })
}
