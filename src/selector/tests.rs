//! Tests for model selection

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use super::ModelSelector;
use crate::inference::SyntheticLoader;
use crate::registry::ModelRegistry;
use crate::types::{
    EnsembleConfig, ModelDescriptor, ModelMetrics, ModelType, PredictionContext,
    SelectionStrategy,
};

fn registry() -> Arc<ModelRegistry> {
    Arc::new(ModelRegistry::new(Arc::new(SyntheticLoader)))
}

fn selector(registry: Arc<ModelRegistry>) -> ModelSelector {
    ModelSelector::new(registry, 1000)
}

fn register(registry: &ModelRegistry, name: &str, model_type: ModelType) {
    registry
        .register(ModelDescriptor::new(name, model_type, format!("models/{}.bin", name)))
        .unwrap();
}

async fn set_accuracy(registry: &ModelRegistry, name: &str, accuracy: f64) {
    let metrics = ModelMetrics {
        accuracy,
        r2: accuracy,
        consistency: accuracy,
        robustness: accuracy,
        last_updated: Utc::now(),
        ..Default::default()
    };
    registry.update_metrics(name, metrics).await.unwrap();
}

fn features() -> HashMap<String, f64> {
    [("spread".to_string(), 3.5), ("total".to_string(), 44.0)]
        .into_iter()
        .collect()
}

#[test]
fn test_returns_all_when_few_available() {
    let registry = registry();
    register(&registry, "a", ModelType::Xgboost);
    register(&registry, "b", ModelType::Lightgbm);

    let selector = selector(registry);
    let config = EnsembleConfig {
        min_models: 3,
        ..Default::default()
    };

    let selected = selector.select_models(PredictionContext::PreGame, &features(), &config);
    assert_eq!(selected.len(), 2);
}

#[tokio::test]
async fn test_top_k_selects_highest_scores() {
    let registry = registry();
    register(&registry, "strong", ModelType::Xgboost);
    register(&registry, "medium", ModelType::RandomForest);
    register(&registry, "weak", ModelType::LinearRegression);
    set_accuracy(&registry, "strong", 0.9).await;
    set_accuracy(&registry, "medium", 0.6).await;
    set_accuracy(&registry, "weak", 0.3).await;

    let selector = selector(registry);
    let config = EnsembleConfig {
        min_models: 2,
        max_models: 2,
        ..Default::default()
    };

    let selected = selector.select_models(PredictionContext::PreGame, &features(), &config);
    assert_eq!(selected, vec!["strong".to_string(), "medium".to_string()]);
}

#[tokio::test]
async fn test_selection_count_bounds() {
    let registry = registry();
    for i in 0..6 {
        register(&registry, &format!("m{}", i), ModelType::Xgboost);
        set_accuracy(&registry, &format!("m{}", i), 0.5 + i as f64 * 0.05).await;
    }

    let selector = selector(registry);
    let config = EnsembleConfig {
        min_models: 2,
        max_models: 4,
        ..Default::default()
    };

    let selected = selector.select_models(PredictionContext::PreGame, &features(), &config);
    assert!(selected.len() >= 2);
    assert!(selected.len() <= 4);
}

#[tokio::test]
async fn test_diversity_filters_identical_types() {
    let registry = registry();
    register(&registry, "xgb_a", ModelType::Xgboost);
    register(&registry, "xgb_b", ModelType::Xgboost);
    register(&registry, "neural", ModelType::NeuralNetwork);
    register(&registry, "arima", ModelType::Arima);
    set_accuracy(&registry, "xgb_a", 0.9).await;
    set_accuracy(&registry, "xgb_b", 0.85).await;
    set_accuracy(&registry, "neural", 0.7).await;
    set_accuracy(&registry, "arima", 0.6).await;

    let selector = selector(registry);
    // Threshold high enough that identical types (correlation 0.8) collide
    let config = EnsembleConfig {
        min_models: 2,
        max_models: 4,
        diversity_threshold: 0.25,
        ..Default::default()
    };

    let selected = selector.select_models(PredictionContext::PreGame, &features(), &config);
    assert!(selected.contains(&"xgb_a".to_string()));
    assert!(!selected.contains(&"xgb_b".to_string()));
    assert!(selected.contains(&"neural".to_string()));
    assert!(selected.contains(&"arima".to_string()));
}

#[tokio::test]
async fn test_diversity_backfills_to_min_models() {
    let registry = registry();
    register(&registry, "xgb_a", ModelType::Xgboost);
    register(&registry, "xgb_b", ModelType::Xgboost);
    register(&registry, "xgb_c", ModelType::Xgboost);
    set_accuracy(&registry, "xgb_a", 0.9).await;
    set_accuracy(&registry, "xgb_b", 0.8).await;
    set_accuracy(&registry, "xgb_c", 0.7).await;

    let selector = selector(registry);
    let config = EnsembleConfig {
        min_models: 2,
        max_models: 3,
        diversity_threshold: 0.25,
        ..Default::default()
    };

    // All three share a type; the filter alone keeps one, so the selector
    // must re-admit correlated models to reach min_models.
    let selected = selector.select_models(PredictionContext::PreGame, &features(), &config);
    assert_eq!(selected.len(), 2);
    assert_eq!(selected[0], "xgb_a");
    assert_eq!(selected[1], "xgb_b");
}

#[tokio::test]
async fn test_context_history_shifts_selection() {
    let registry = registry();
    register(&registry, "steady", ModelType::Xgboost);
    register(&registry, "live_ace", ModelType::NeuralNetwork);
    register(&registry, "bench", ModelType::Arima);
    register(&registry, "bench2", ModelType::LinearRegression);
    for name in ["steady", "live_ace", "bench", "bench2"] {
        set_accuracy(&registry, name, 0.5).await;
    }

    let selector = selector(registry);
    for _ in 0..10 {
        selector.record_outcome(PredictionContext::LiveGame, "live_ace", 1.0);
        selector.record_outcome(PredictionContext::LiveGame, "bench", 0.0);
    }

    let config = EnsembleConfig {
        min_models: 1,
        max_models: 2,
        ..Default::default()
    };
    let selected = selector.select_models(PredictionContext::LiveGame, &features(), &config);
    assert_eq!(selected[0], "live_ace");
    assert!(!selected.contains(&"bench".to_string()));
}

#[tokio::test]
async fn test_feature_compatibility_scoring() {
    let registry = registry();
    registry
        .register(
            ModelDescriptor::new("picky", ModelType::Xgboost, "models/picky.bin")
                .with_features(vec!["spread".to_string(), "injuries".to_string()]),
        )
        .unwrap();
    register(&registry, "open_a", ModelType::NeuralNetwork);
    register(&registry, "open_b", ModelType::Arima);
    register(&registry, "open_c", ModelType::LinearRegression);
    for name in ["picky", "open_a", "open_b", "open_c"] {
        set_accuracy(&registry, name, 0.5).await;
    }

    let selector = selector(registry);
    let config = EnsembleConfig {
        min_models: 1,
        max_models: 3,
        ..Default::default()
    };

    // "injuries" is absent, so the declared-feature model scores lower on
    // compatibility than the models with no feature requirements.
    let selected = selector.select_models(PredictionContext::PreGame, &features(), &config);
    assert!(!selected.contains(&"picky".to_string()));
}

#[tokio::test]
async fn test_strategy_fallbacks_match_top_k() {
    let registry = registry();
    register(&registry, "a", ModelType::Xgboost);
    register(&registry, "b", ModelType::RandomForest);
    register(&registry, "c", ModelType::NeuralNetwork);
    register(&registry, "d", ModelType::Arima);
    set_accuracy(&registry, "a", 0.9).await;
    set_accuracy(&registry, "b", 0.7).await;
    set_accuracy(&registry, "c", 0.5).await;
    set_accuracy(&registry, "d", 0.3).await;

    let selector = selector(registry);
    let base = EnsembleConfig {
        min_models: 2,
        max_models: 3,
        ..Default::default()
    };

    let top_k = selector.select_models(
        PredictionContext::PreGame,
        &features(),
        &EnsembleConfig { strategy: SelectionStrategy::TopK, ..base.clone() },
    );
    let dynamic = selector.select_models(
        PredictionContext::PreGame,
        &features(),
        &EnsembleConfig { strategy: SelectionStrategy::Dynamic, ..base.clone() },
    );
    let bayesian = selector.select_models(
        PredictionContext::PreGame,
        &features(),
        &EnsembleConfig { strategy: SelectionStrategy::Bayesian, ..base },
    );

    assert_eq!(top_k, dynamic);
    assert_eq!(top_k, bayesian);
}

#[tokio::test]
async fn test_selection_history_bounded() {
    let registry = registry();
    for i in 0..5 {
        register(&registry, &format!("m{}", i), ModelType::Xgboost);
        set_accuracy(&registry, &format!("m{}", i), 0.5).await;
    }

    let selector = ModelSelector::new(registry, 10);
    let config = EnsembleConfig {
        min_models: 2,
        max_models: 3,
        ..Default::default()
    };

    for _ in 0..25 {
        selector.select_models(PredictionContext::PreGame, &features(), &config);
    }
    assert_eq!(selector.history_len(), 10);
}

#[test]
fn test_no_models_available() {
    let registry = registry();
    let selector = selector(registry);
    let selected = selector.select_models(
        PredictionContext::PreGame,
        &features(),
        &EnsembleConfig::default(),
    );
    assert!(selected.is_empty());
}

#[test]
fn test_type_correlation_table() {
    use super::type_correlation;

    assert_eq!(type_correlation(ModelType::Xgboost, ModelType::Xgboost), 0.8);
    assert_eq!(type_correlation(ModelType::Xgboost, ModelType::Lightgbm), 0.6);
    assert_eq!(type_correlation(ModelType::Xgboost, ModelType::Arima), 0.3);
    assert_eq!(
        type_correlation(ModelType::NeuralNetwork, ModelType::Lstm),
        0.6
    );
}
