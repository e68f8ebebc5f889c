//! Ensemble aggregation
//!
//! Pure combination of weighted member predictions into one estimate with
//! uncertainty decomposition. No state; failures are typed, never partial.

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::types::{ConfidenceInterval, EnsembleConfig, ModelPrediction, UncertaintyMetrics};

/// z-score for a 95% interval
const Z_95: f64 = 1.96;

/// Combined ensemble estimate before orchestrator bookkeeping
#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub value: f64,
    pub interval: ConfidenceInterval,
    /// Weighted mean member probability
    pub confidence: f64,
    pub model_agreement: f64,
    pub feature_importance: HashMap<String, f64>,
    pub attribution: HashMap<String, f64>,
    pub uncertainty: UncertaintyMetrics,
}

/// Combine member predictions under the supplied weights
///
/// Fails with `NoPredictions` on an empty member set and `ZeroWeight` when
/// the weights assigned to the members sum to zero.
pub fn aggregate(
    predictions: &[ModelPrediction],
    weights: &HashMap<String, f64>,
    _config: &EnsembleConfig,
) -> Result<AggregateResult> {
    if predictions.is_empty() {
        return Err(EngineError::NoPredictions);
    }

    let member_weight = |p: &ModelPrediction| weights.get(&p.model_name).copied().unwrap_or(0.0);

    let total_weight: f64 = predictions.iter().map(&member_weight).sum();
    if total_weight <= 0.0 {
        return Err(EngineError::ZeroWeight);
    }

    let value: f64 = predictions
        .iter()
        .map(|p| p.value * member_weight(p))
        .sum::<f64>()
        / total_weight;

    // Member CI width as a variance proxy: ((upper-lower)/4)^2
    let ensemble_variance: f64 = predictions
        .iter()
        .map(|p| {
            let member_std = (p.interval.upper - p.interval.lower) / 4.0;
            member_weight(p) * member_std * member_std
        })
        .sum::<f64>()
        / total_weight;
    let ensemble_std = ensemble_variance.sqrt();

    let interval = ConfidenceInterval::new(value - Z_95 * ensemble_std, value + Z_95 * ensemble_std);

    let values: Vec<f64> = predictions.iter().map(|p| p.value).collect();
    let values_mean = mean(&values);
    let values_std = std_dev(&values);
    let model_agreement = (1.0 - values_std / values_mean.max(1.0)).clamp(0.0, 1.0);

    let confidence: f64 = predictions
        .iter()
        .map(|p| member_weight(p) * p.probability)
        .sum::<f64>()
        / total_weight;

    let feature_importance = combine_maps(predictions, weights, |p| &p.feature_importance);
    let attribution = combine_maps(predictions, weights, |p| &p.attribution);

    let aleatoric = mean(
        &predictions
            .iter()
            .map(|p| (p.interval.upper - p.interval.lower) / 4.0)
            .collect::<Vec<f64>>(),
    );

    Ok(AggregateResult {
        value,
        interval,
        confidence,
        model_agreement,
        feature_importance,
        attribution,
        uncertainty: UncertaintyMetrics {
            prediction_std: ensemble_std,
            disagreement: 1.0 - model_agreement,
            epistemic: values_std,
            aleatoric,
        },
    })
}

/// Weight-scaled sum per feature, L1-normalized across features
fn combine_maps<'a, F>(
    predictions: &'a [ModelPrediction],
    weights: &HashMap<String, f64>,
    accessor: F,
) -> HashMap<String, f64>
where
    F: Fn(&'a ModelPrediction) -> &'a HashMap<String, f64>,
{
    let mut combined: HashMap<String, f64> = HashMap::new();
    for prediction in predictions {
        let weight = weights.get(&prediction.model_name).copied().unwrap_or(0.0);
        for (feature, score) in accessor(prediction) {
            *combined.entry(feature.clone()).or_insert(0.0) += weight * score;
        }
    }

    let total: f64 = combined.values().map(|v| v.abs()).sum();
    if total > 0.0 {
        for score in combined.values_mut() {
            *score /= total;
        }
    }
    combined
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
