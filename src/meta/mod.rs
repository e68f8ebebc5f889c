//! Meta-learning corrector
//!
//! Trains a secondary regression over ensemble behavior: meta-features
//! summarizing member spread and confidence are mapped to observed outcomes,
//! and the fitted model nudges future ensemble predictions. The adjustment
//! is a plain learned residual, exposed as `meta_correction`.

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::types::{CachedPrediction, ModelPrediction};

#[cfg(test)]
mod tests;

/// Meta-feature vector length: 4 value stats, 2 confidence stats, member
/// count, ensemble confidence, 3 pairwise-difference stats
const N_META_FEATURES: usize = 11;

/// Ridge regularization strength
const RIDGE_LAMBDA: f64 = 1e-3;

/// Fraction of the meta-model's residual applied to the ensemble value
const CORRECTION_ALPHA: f64 = 0.3;

/// Fitted linear corrector: intercept plus one coefficient per meta-feature
#[derive(Debug, Clone)]
struct Corrector {
    intercept: f64,
    coefficients: [f64; N_META_FEATURES],
    trained_samples: usize,
}

impl Corrector {
    fn predict(&self, features: &[f64; N_META_FEATURES]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(features.iter())
                .map(|(c, f)| c * f)
                .sum::<f64>()
    }
}

/// A fitted corrector that has not been installed yet
///
/// Keeps fitting separate from the swap: a refresh that runs off-thread can be
/// abandoned at its deadline without the late result ever replacing the live
/// corrector.
pub struct FittedCorrector(Corrector);

#[derive(Default)]
pub struct MetaLearner {
    corrector: RwLock<Option<Corrector>>,
}

/// Result of applying the corrector to an ensemble value
#[derive(Debug, Clone, Copy)]
pub struct Correction {
    pub corrected_value: f64,
    pub delta: f64,
}

impl MetaLearner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.corrector.read().is_some()
    }

    pub fn trained_samples(&self) -> usize {
        self.corrector.read().as_ref().map_or(0, |c| c.trained_samples)
    }

    /// Fit a candidate corrector from resolved prediction history
    ///
    /// Returns `None` (log only) below `min_samples` eligible entries or when
    /// the system is degenerate. The live corrector is untouched until the
    /// result is passed to [`MetaLearner::install`].
    pub fn fit(&self, history: &[CachedPrediction], min_samples: usize) -> Option<FittedCorrector> {
        let eligible: Vec<&CachedPrediction> = history
            .iter()
            .filter(|p| p.actual_value.is_some() && !p.member_predictions.is_empty())
            .collect();

        if eligible.len() < min_samples {
            info!(
                samples = eligible.len(),
                required = min_samples,
                "Insufficient resolved history for meta-learner training"
            );
            return None;
        }

        let mut rows: Vec<[f64; N_META_FEATURES]> = Vec::with_capacity(eligible.len());
        let mut targets: Vec<f64> = Vec::with_capacity(eligible.len());
        for sample in &eligible {
            rows.push(extract_meta_features(
                &sample.member_predictions,
                sample.ensemble_confidence,
            ));
            targets.push(sample.actual_value.unwrap_or(0.0));
        }

        match fit_ridge(&rows, &targets) {
            Some((intercept, coefficients)) => Some(FittedCorrector(Corrector {
                intercept,
                coefficients,
                trained_samples: rows.len(),
            })),
            None => {
                warn!("Meta-learner fit failed (degenerate system), keeping prior corrector");
                None
            }
        }
    }

    /// Swap in a fitted corrector
    pub fn install(&self, fitted: FittedCorrector) {
        let samples = fitted.0.trained_samples;
        *self.corrector.write() = Some(fitted.0);
        info!(samples, "Trained meta-learner corrector");
    }

    /// Fit and install in one step; `false` when the refit was skipped or failed
    pub fn train(&self, history: &[CachedPrediction], min_samples: usize) -> bool {
        match self.fit(history, min_samples) {
            Some(fitted) => {
                self.install(fitted);
                true
            }
            None => false,
        }
    }

    /// Nudge an ensemble value toward the corrector's estimate
    ///
    /// Returns `None` when no corrector has been trained yet.
    pub fn apply(
        &self,
        ensemble_value: f64,
        members: &[ModelPrediction],
        ensemble_confidence: f64,
    ) -> Option<Correction> {
        let corrector = self.corrector.read().clone()?;
        let features = extract_meta_features(members, ensemble_confidence);
        let meta_estimate = corrector.predict(&features);
        if !meta_estimate.is_finite() {
            return None;
        }

        let delta = CORRECTION_ALPHA * (meta_estimate - ensemble_value);
        debug!(
            ensemble = ensemble_value,
            meta = meta_estimate,
            delta,
            "Applied meta-learner correction"
        );
        Some(Correction {
            corrected_value: ensemble_value + delta,
            delta,
        })
    }
}

/// Fixed-length meta-feature vector for one ensemble sample
fn extract_meta_features(
    members: &[ModelPrediction],
    ensemble_confidence: f64,
) -> [f64; N_META_FEATURES] {
    let values: Vec<f64> = members.iter().map(|m| m.value).collect();
    let confidences: Vec<f64> = members.iter().map(|m| m.probability).collect();

    let mut pairwise = Vec::new();
    for i in 0..values.len() {
        for j in (i + 1)..values.len() {
            pairwise.push((values[i] - values[j]).abs());
        }
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    [
        mean(&values),
        std_dev(&values),
        if min.is_finite() { min } else { 0.0 },
        if max.is_finite() { max } else { 0.0 },
        mean(&confidences),
        std_dev(&confidences),
        values.len() as f64,
        ensemble_confidence,
        mean(&pairwise),
        std_dev(&pairwise),
        pairwise.iter().copied().fold(0.0, f64::max),
    ]
}

/// Ridge regression via the normal equations on an intercept-augmented design
fn fit_ridge(rows: &[[f64; N_META_FEATURES]], targets: &[f64]) -> Option<(f64, [f64; N_META_FEATURES])> {
    const N: usize = N_META_FEATURES + 1;

    // Build XtX + lambda*I and Xty with an implicit leading 1s column
    let mut xtx = [[0.0f64; N]; N];
    let mut xty = [0.0f64; N];

    for (row, &y) in rows.iter().zip(targets.iter()) {
        let mut augmented = [0.0f64; N];
        augmented[0] = 1.0;
        augmented[1..].copy_from_slice(row);

        for i in 0..N {
            xty[i] += augmented[i] * y;
            for j in 0..N {
                xtx[i][j] += augmented[i] * augmented[j];
            }
        }
    }
    for (i, diag) in xtx.iter_mut().enumerate() {
        // Intercept is not penalized
        if i > 0 {
            diag[i] += RIDGE_LAMBDA;
        }
    }

    let solution = solve_linear(xtx, xty)?;
    let mut coefficients = [0.0f64; N_META_FEATURES];
    coefficients.copy_from_slice(&solution[1..]);
    Some((solution[0], coefficients))
}

/// Gaussian elimination with partial pivoting
fn solve_linear<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    for col in 0..N {
        let pivot_row = (col..N)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..N {
            let factor = a[row][col] / a[col][col];
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f64; N];
    for row in (0..N).rev() {
        let mut sum = b[row];
        for k in (row + 1)..N {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
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
    (values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64).sqrt()
}
