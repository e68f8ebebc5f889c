//! Tests for the meta-learning corrector

use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use super::{extract_meta_features, solve_linear, MetaLearner};
use crate::types::{
    CachedPrediction, ConfidenceInterval, ModelPrediction, ModelType, PredictionContext,
};

fn member(name: &str, value: f64, probability: f64) -> ModelPrediction {
    ModelPrediction {
        model_name: name.to_string(),
        model_type: ModelType::Xgboost,
        value,
        interval: ConfidenceInterval::new(value - 1.0, value + 1.0),
        probability,
        feature_importance: HashMap::new(),
        attribution: HashMap::new(),
        context: PredictionContext::PreGame,
        timestamp: Utc::now(),
    }
}

fn sample(members: Vec<ModelPrediction>, ensemble_value: f64, actual: Option<f64>) -> CachedPrediction {
    CachedPrediction {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        context: PredictionContext::PreGame,
        member_predictions: members,
        weights: HashMap::new(),
        ensemble_value,
        ensemble_confidence: 0.7,
        actual_value: actual,
    }
}

/// History where the true outcome sits halfway between the two members,
/// offset by a constant the ensemble mean misses.
fn biased_history(n: usize) -> Vec<CachedPrediction> {
    (0..n)
        .map(|i| {
            let center = 10.0 + (i % 17) as f64;
            let members = vec![member("a", center - 2.0, 0.8), member("b", center + 2.0, 0.6)];
            sample(members, center, Some(center + 3.0))
        })
        .collect()
}

#[test]
fn test_meta_features_shape() {
    let members = vec![member("a", 10.0, 0.9), member("b", 20.0, 0.5)];
    let features = extract_meta_features(&members, 0.7);

    assert!((features[0] - 15.0).abs() < 1e-9); // mean
    assert!((features[1] - 5.0).abs() < 1e-9); // std
    assert_eq!(features[2], 10.0); // min
    assert_eq!(features[3], 20.0); // max
    assert!((features[4] - 0.7).abs() < 1e-9); // mean confidence
    assert_eq!(features[6], 2.0); // member count
    assert_eq!(features[7], 0.7); // ensemble confidence
    assert!((features[8] - 10.0).abs() < 1e-9); // mean pairwise diff
    assert_eq!(features[10], 10.0); // max pairwise diff
}

#[test]
fn test_meta_features_single_member() {
    let members = vec![member("solo", 5.0, 0.8)];
    let features = extract_meta_features(&members, 0.8);

    assert_eq!(features[1], 0.0); // std of one value
    assert_eq!(features[8], 0.0); // no pairwise diffs
    assert_eq!(features[9], 0.0);
    assert_eq!(features[10], 0.0);
}

#[test]
fn test_train_below_threshold_is_noop() {
    let learner = MetaLearner::new();
    let history = biased_history(50);

    assert!(!learner.train(&history, 100));
    assert!(!learner.is_active());
}

#[test]
fn test_unresolved_samples_not_eligible() {
    let learner = MetaLearner::new();
    let mut history = biased_history(150);
    for entry in &mut history {
        entry.actual_value = None;
    }

    assert!(!learner.train(&history, 100));
    assert!(!learner.is_active());
}

#[test]
fn test_train_and_apply_reduces_bias() {
    let learner = MetaLearner::new();
    let history = biased_history(200);
    assert!(learner.train(&history, 100));
    assert!(learner.is_active());
    assert_eq!(learner.trained_samples(), 200);

    // New sample with the same structure: true outcome is center + 3
    let center = 40.0;
    let members = vec![member("a", center - 2.0, 0.8), member("b", center + 2.0, 0.6)];
    let correction = learner.apply(center, &members, 0.7).unwrap();

    // The corrector learned the +3 offset and should nudge upward
    assert!(correction.delta > 0.0);
    assert!(correction.corrected_value > center);
    let uncorrected_error = (center - (center + 3.0)).abs();
    let corrected_error = (correction.corrected_value - (center + 3.0)).abs();
    assert!(corrected_error < uncorrected_error);
}

#[test]
fn test_apply_without_corrector_is_none() {
    let learner = MetaLearner::new();
    let members = vec![member("a", 10.0, 0.8)];
    assert!(learner.apply(10.0, &members, 0.7).is_none());
}

#[test]
fn test_fit_is_inert_until_installed() {
    let learner = MetaLearner::new();

    let fitted = learner.fit(&biased_history(120), 100).unwrap();
    assert!(!learner.is_active());

    learner.install(fitted);
    assert!(learner.is_active());
    assert_eq!(learner.trained_samples(), 120);

    // A fit that is discarded (e.g. past its refresh deadline) leaves the
    // installed corrector alone
    let late = learner.fit(&biased_history(180), 100).unwrap();
    drop(late);
    assert_eq!(learner.trained_samples(), 120);
}

#[test]
fn test_retrain_replaces_corrector() {
    let learner = MetaLearner::new();
    learner.train(&biased_history(120), 100);
    let first = learner.trained_samples();

    learner.train(&biased_history(180), 100);
    assert_eq!(first, 120);
    assert_eq!(learner.trained_samples(), 180);
}

#[test]
fn test_solve_linear_small_system() {
    // 2x + y = 5; x + 3y = 10 -> x = 1, y = 3
    let a = [[2.0, 1.0], [1.0, 3.0]];
    let b = [5.0, 10.0];
    let x = solve_linear(a, b).unwrap();
    assert!((x[0] - 1.0).abs() < 1e-9);
    assert!((x[1] - 3.0).abs() < 1e-9);
}

#[test]
fn test_solve_linear_singular() {
    let a = [[1.0, 2.0], [2.0, 4.0]];
    let b = [3.0, 6.0];
    assert!(solve_linear(a, b).is_none());
}
