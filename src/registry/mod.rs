//! Model registry
//!
//! Owns model descriptors, performance metrics, and the cache of loaded
//! handles. Names are globally unique; models are never deleted, only
//! deactivated. Metrics are replaced wholesale under a single-writer
//! discipline.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::inference::{MetricsStore, ModelHandle, ModelLoader};
use crate::types::{DeploymentStage, ModelDescriptor, ModelMetrics, ModelType};


/// Registry of known models and their rolling metrics
pub struct ModelRegistry {
    descriptors: RwLock<HashMap<String, ModelDescriptor>>,
    metrics: RwLock<HashMap<String, ModelMetrics>>,
    loaded: RwLock<HashMap<String, ModelHandle>>,
    loader: Arc<dyn ModelLoader>,
    store: Option<Arc<dyn MetricsStore>>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            descriptors: RwLock::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
            loaded: RwLock::new(HashMap::new()),
            loader,
            store: None,
        }
    }

    /// Attach a durable metrics store; without one, metrics live in memory only
    pub fn with_metrics_store(mut self, store: Arc<dyn MetricsStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a new model with zero-valued initial metrics
    pub fn register(&self, descriptor: ModelDescriptor) -> Result<()> {
        let mut descriptors = self.descriptors.write();
        if descriptors.contains_key(&descriptor.name) {
            return Err(EngineError::AlreadyExists(descriptor.name.clone()));
        }

        info!(
            model = %descriptor.name,
            model_type = %descriptor.model_type,
            version = %descriptor.version,
            "Registered model"
        );

        self.metrics
            .write()
            .insert(descriptor.name.clone(), ModelMetrics::default());
        descriptors.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Names of active models, optionally filtered by type
    pub fn get_active_models(&self, type_filter: Option<ModelType>) -> Vec<String> {
        let descriptors = self.descriptors.read();
        let mut names: Vec<String> = descriptors
            .values()
            .filter(|d| d.active && type_filter.map_or(true, |t| d.model_type == t))
            .map(|d| d.name.clone())
            .collect();
        // Deterministic order for fallback selection
        names.sort();
        names
    }

    pub fn descriptor(&self, name: &str) -> Option<ModelDescriptor> {
        self.descriptors.read().get(name).cloned()
    }

    pub fn model_type(&self, name: &str) -> Option<ModelType> {
        self.descriptors.read().get(name).map(|d| d.model_type)
    }

    pub fn metrics(&self, name: &str) -> Option<ModelMetrics> {
        self.metrics.read().get(name).cloned()
    }

    pub fn model_count(&self) -> usize {
        self.descriptors.read().len()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.read().len()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().contains_key(name)
    }

    /// Replace a model's metrics wholesale
    pub async fn update_metrics(&self, name: &str, metrics: ModelMetrics) -> Result<()> {
        {
            let mut map = self.metrics.write();
            if !map.contains_key(name) {
                return Err(EngineError::NotFound(name.to_string()));
            }
            map.insert(name.to_string(), metrics.clone());
        }

        debug!(
            model = name,
            accuracy = metrics.accuracy,
            r2 = metrics.r2,
            mse = metrics.mse,
            "Updated model metrics"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.persist(name, &metrics).await {
                // Durable persistence is best-effort; in-memory state is
                // already authoritative for this process.
                warn!(model = name, error = %e, "Metrics persistence failed");
            }
        }
        Ok(())
    }

    /// Load a model through the injected loader, caching the handle
    pub async fn load_model(&self, name: &str) -> Result<ModelHandle> {
        if let Some(handle) = self.loaded.read().get(name) {
            return Ok(handle.clone());
        }

        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;

        let handle = self.loader.load(&descriptor).await?;
        self.loaded
            .write()
            .insert(name.to_string(), handle.clone());
        info!(model = name, artifact = %descriptor.artifact_ref, "Loaded model");
        Ok(handle)
    }

    /// Retire a model; its descriptor and metrics remain for audit
    pub fn deactivate(&self, name: &str) -> Result<()> {
        let mut descriptors = self.descriptors.write();
        let descriptor = descriptors
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        descriptor.active = false;
        self.loaded.write().remove(name);
        info!(model = name, "Deactivated model");
        Ok(())
    }

    /// Move a model between deployment stages
    pub fn set_stage(&self, name: &str, stage: DeploymentStage) -> Result<()> {
        let mut descriptors = self.descriptors.write();
        let descriptor = descriptors
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        descriptor.stage = stage;
        Ok(())
    }
}
