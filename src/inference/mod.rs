//! Capability traits at the engine boundary
//!
//! The engine never touches model binaries, feature pipelines, or durable
//! storage directly; it consumes them through the narrow traits defined here.
//! Synthetic implementations back the CLI demo and the test suite.

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::types::{ConfidenceInterval, ModelDescriptor, ModelMetrics, ModelOutput};

/// A loaded, inference-ready model
///
/// Handles are read-only after load and shared across concurrent calls.
#[async_trait]
pub trait InferenceModel: Send + Sync {
    async fn infer(&self, features: &HashMap<String, f64>) -> Result<ModelOutput>;
}

/// Shared handle to a loaded model
pub type ModelHandle = Arc<dyn InferenceModel>;

/// Resolves an artifact reference into a loaded model
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<ModelHandle>;
}

/// Opaque feature-engineering capability
pub trait FeatureEngineer: Send + Sync {
    fn engineer(&self, raw: &HashMap<String, f64>) -> Result<HashMap<String, f64>>;
}

/// Identity feature engineering; rejects non-finite inputs
pub struct PassthroughFeatures;

impl FeatureEngineer for PassthroughFeatures {
    fn engineer(&self, raw: &HashMap<String, f64>) -> Result<HashMap<String, f64>> {
        for (name, value) in raw {
            if !value.is_finite() {
                return Err(EngineError::Validation(format!(
                    "Feature {} is not finite",
                    name
                )));
            }
        }
        Ok(raw.clone())
    }
}

/// Optional durable store for model metrics
///
/// The engine is fully correct with the in-memory implementation; a database
/// backend can be swapped in without touching the registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn persist(&self, name: &str, metrics: &ModelMetrics) -> Result<()>;
}

/// In-memory metrics store
#[derive(Default)]
pub struct InMemoryMetricsStore {
    inner: RwLock<HashMap<String, ModelMetrics>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ModelMetrics> {
        self.inner.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn persist(&self, name: &str, metrics: &ModelMetrics) -> Result<()> {
        self.inner
            .write()
            .insert(name.to_string(), metrics.clone());
        Ok(())
    }
}

/// Deterministic stand-in model for demos and tests
///
/// Each instance derives per-feature coefficients from its name, so two
/// models with different names disagree while any single model is stable
/// across calls.
pub struct SyntheticModel {
    name: String,
    bias: f64,
    ci_width: f64,
}

impl SyntheticModel {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut rng = StdRng::seed_from_u64(stable_seed(&name));
        let bias = rng.random_range(-2.0..2.0);
        let ci_width = rng.random_range(1.0..4.0);
        Self { name, bias, ci_width }
    }

    fn coefficient(&self, feature: &str) -> f64 {
        let mut rng = StdRng::seed_from_u64(stable_seed(&self.name) ^ stable_seed(feature));
        rng.random_range(-1.0..1.0)
    }
}

#[async_trait]
impl InferenceModel for SyntheticModel {
    async fn infer(&self, features: &HashMap<String, f64>) -> Result<ModelOutput> {
        let mut value = self.bias;
        let mut importance = HashMap::new();
        let mut attribution = HashMap::new();

        for (name, feature_value) in features {
            let coef = self.coefficient(name);
            let contribution = coef * feature_value;
            value += contribution;
            importance.insert(name.clone(), coef.abs());
            attribution.insert(name.clone(), contribution);
        }

        let probability = 0.5 + 0.45 * (value / (1.0 + value.abs()));

        Ok(ModelOutput {
            value,
            interval: ConfidenceInterval::new(value - self.ci_width, value + self.ci_width),
            probability: probability.clamp(0.05, 0.95),
            feature_importance: importance,
            attribution,
        })
    }
}

/// Loader producing synthetic models, refusing refs marked missing
pub struct SyntheticLoader;

#[async_trait]
impl ModelLoader for SyntheticLoader {
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<ModelHandle> {
        if descriptor.artifact_ref.is_empty() || descriptor.artifact_ref.ends_with(".missing") {
            return Err(EngineError::Load(format!(
                "Artifact not found: {}",
                descriptor.artifact_ref
            )));
        }
        Ok(Arc::new(SyntheticModel::new(descriptor.name.clone())))
    }
}

fn stable_seed(s: &str) -> u64 {
    // DefaultHasher is stable within a process run, which is all the
    // synthetic models need; coefficients only have to be self-consistent.
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelType;

    fn features(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_passthrough_rejects_nan() {
        let fe = PassthroughFeatures;
        let result = fe.engineer(&features(&[("a", f64::NAN)]));
        assert!(result.is_err());
    }

    #[test]
    fn test_passthrough_identity() {
        let fe = PassthroughFeatures;
        let raw = features(&[("a", 1.0), ("b", 2.5)]);
        let out = fe.engineer(&raw).unwrap();
        assert_eq!(out, raw);
    }

    #[tokio::test]
    async fn test_synthetic_model_deterministic() {
        let model = SyntheticModel::new("model_a");
        let f = features(&[("x", 1.0), ("y", -0.5)]);

        let first = model.infer(&f).await.unwrap();
        let second = model.infer(&f).await.unwrap();
        assert_eq!(first.value, second.value);
        assert_eq!(first.probability, second.probability);
    }

    #[tokio::test]
    async fn test_synthetic_models_disagree() {
        let a = SyntheticModel::new("model_a");
        let b = SyntheticModel::new("model_b");
        let f = features(&[("x", 3.0)]);

        let pa = a.infer(&f).await.unwrap();
        let pb = b.infer(&f).await.unwrap();
        assert_ne!(pa.value, pb.value);
    }

    #[tokio::test]
    async fn test_synthetic_output_shape() {
        let model = SyntheticModel::new("m");
        let f = features(&[("x", 1.0), ("y", 2.0)]);
        let out = model.infer(&f).await.unwrap();

        assert!(out.interval.contains(out.value));
        assert!(out.probability > 0.0 && out.probability < 1.0);
        assert_eq!(out.feature_importance.len(), 2);
        assert_eq!(out.attribution.len(), 2);
    }

    #[tokio::test]
    async fn test_synthetic_loader_missing_artifact() {
        let loader = SyntheticLoader;
        let descriptor =
            ModelDescriptor::new("broken", ModelType::Xgboost, "models/broken.missing");
        let result = loader.load(&descriptor).await;
        assert!(matches!(result, Err(EngineError::Load(_))));
    }

    #[tokio::test]
    async fn test_synthetic_loader_ok() {
        let loader = SyntheticLoader;
        let descriptor = ModelDescriptor::new("ok", ModelType::Lightgbm, "models/ok.bin");
        let handle = loader.load(&descriptor).await.unwrap();
        let out = handle.infer(&features(&[("x", 1.0)])).await.unwrap();
        assert!(out.value.is_finite());
    }

    #[tokio::test]
    async fn test_in_memory_metrics_store() {
        let store = InMemoryMetricsStore::new();
        assert!(store.is_empty());

        let metrics = ModelMetrics {
            accuracy: 0.8,
            ..Default::default()
        };
        store.persist("m1", &metrics).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("m1").unwrap().accuracy, 0.8);
    }
}
