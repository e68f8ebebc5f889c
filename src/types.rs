//! Core data model for the ensemble engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::EngineError;

/// Supported model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Xgboost,
    Lightgbm,
    RandomForest,
    GradientBoosting,
    NeuralNetwork,
    LinearRegression,
    Svr,
    Prophet,
    Arima,
    Lstm,
}

/// Broad algorithm family, used for the diversity heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    BoostedTrees,
    Forest,
    Neural,
    Linear,
    TimeSeries,
}

impl ModelType {
    pub fn family(&self) -> ModelFamily {
        match self {
            ModelType::Xgboost | ModelType::Lightgbm | ModelType::GradientBoosting => {
                ModelFamily::BoostedTrees
            }
            ModelType::RandomForest => ModelFamily::Forest,
            ModelType::NeuralNetwork | ModelType::Lstm => ModelFamily::Neural,
            ModelType::LinearRegression | ModelType::Svr => ModelFamily::Linear,
            ModelType::Prophet | ModelType::Arima => ModelFamily::TimeSeries,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelType::Xgboost => "xgboost",
            ModelType::Lightgbm => "lightgbm",
            ModelType::RandomForest => "random_forest",
            ModelType::GradientBoosting => "gradient_boosting",
            ModelType::NeuralNetwork => "neural_network",
            ModelType::LinearRegression => "linear_regression",
            ModelType::Svr => "svr",
            ModelType::Prophet => "prophet",
            ModelType::Arima => "arima",
            ModelType::Lstm => "lstm",
        };
        write!(f, "{}", s)
    }
}

/// Prediction context, a scoring and weighting dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionContext {
    LiveGame,
    PreGame,
    PlayerProps,
    TeamTotals,
    SpreadBetting,
    OverUnder,
    Moneyline,
    Futures,
}

impl fmt::Display for PredictionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PredictionContext::LiveGame => "live_game",
            PredictionContext::PreGame => "pre_game",
            PredictionContext::PlayerProps => "player_props",
            PredictionContext::TeamTotals => "team_totals",
            PredictionContext::SpreadBetting => "spread_betting",
            PredictionContext::OverUnder => "over_under",
            PredictionContext::Moneyline => "moneyline",
            PredictionContext::Futures => "futures",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PredictionContext {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live_game" => Ok(PredictionContext::LiveGame),
            "pre_game" => Ok(PredictionContext::PreGame),
            "player_props" => Ok(PredictionContext::PlayerProps),
            "team_totals" => Ok(PredictionContext::TeamTotals),
            "spread_betting" => Ok(PredictionContext::SpreadBetting),
            "over_under" => Ok(PredictionContext::OverUnder),
            "moneyline" => Ok(PredictionContext::Moneyline),
            "futures" => Ok(PredictionContext::Futures),
            other => Err(EngineError::Validation(format!(
                "Unknown prediction context: {}",
                other
            ))),
        }
    }
}

/// Deployment stage of a registered model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStage {
    Development,
    Staging,
    Production,
}

/// Model registration metadata
///
/// Descriptors are never deleted; retirement flips `active` off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique model name (registry key)
    pub name: String,
    pub model_type: ModelType,
    pub version: String,
    /// Reference to the model artifact, resolved by the loader capability
    pub artifact_ref: String,
    /// Feature names the model was trained on (empty = accepts anything)
    pub expected_features: Vec<String>,
    pub active: bool,
    pub stage: DeploymentStage,
    pub registered_at: DateTime<Utc>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, model_type: ModelType, artifact_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_type,
            version: "1.0.0".to_string(),
            artifact_ref: artifact_ref.into(),
            expected_features: Vec::new(),
            active: true,
            stage: DeploymentStage::Development,
            registered_at: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.expected_features = features;
        self
    }

    pub fn with_stage(mut self, stage: DeploymentStage) -> Self {
        self.stage = stage;
        self
    }
}

/// Rolling performance metrics for one model
///
/// Replaced wholesale on update; no partial merges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub r2: f64,
    pub mse: f64,
    pub mae: f64,
    pub consistency: f64,
    pub robustness: f64,
    pub confidence: f64,
    pub sample_count: usize,
    pub last_updated: DateTime<Utc>,
}

impl Default for ModelMetrics {
    fn default() -> Self {
        Self {
            accuracy: 0.0,
            r2: 0.0,
            mse: 0.0,
            mae: 0.0,
            consistency: 0.0,
            robustness: 0.0,
            confidence: 0.0,
            sample_count: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Strategy for choosing the ensemble member set
///
/// Only `TopK` is implemented. `Dynamic` (trend-following) and `Bayesian`
/// (posterior-weighted) are named extension points that fall back to `TopK`
/// until a real trend/posterior model is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    TopK,
    Dynamic,
    Bayesian,
}

/// Criteria considered during model selection (informational tag set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionCriterion {
    Accuracy,
    Diversity,
    RecentPerformance,
}

/// Per-call ensemble configuration
///
/// Immutable value; the engine holds a process-wide default and every call
/// may override it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub base_models: Vec<ModelType>,
    pub strategy: SelectionStrategy,
    pub selection_criteria: Vec<SelectionCriterion>,
    pub min_models: usize,
    pub max_models: usize,
    pub rebalance_frequency_hours: u64,
    pub performance_window_hours: u64,
    pub diversity_threshold: f64,
    pub confidence_threshold: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            base_models: vec![
                ModelType::Xgboost,
                ModelType::Lightgbm,
                ModelType::RandomForest,
                ModelType::NeuralNetwork,
            ],
            strategy: SelectionStrategy::TopK,
            selection_criteria: vec![
                SelectionCriterion::Accuracy,
                SelectionCriterion::Diversity,
                SelectionCriterion::RecentPerformance,
            ],
            min_models: 3,
            max_models: 8,
            rebalance_frequency_hours: 24,
            performance_window_hours: 168,
            diversity_threshold: 0.15,
            confidence_threshold: 0.75,
        }
    }
}

/// Confidence interval around a predicted value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn half_width(&self) -> f64 {
        (self.upper - self.lower) / 2.0
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Parse an inline JSON object into a feature map, e.g. `{"pace": 99.5}`
pub fn parse_feature_map(raw: &str) -> Result<HashMap<String, f64>, EngineError> {
    Ok(serde_json::from_str(raw)?)
}

/// Raw output of a single model inference, produced by the capability layer
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub value: f64,
    pub interval: ConfidenceInterval,
    pub probability: f64,
    pub feature_importance: HashMap<String, f64>,
    pub attribution: HashMap<String, f64>,
}

/// One member model's prediction, as recorded by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub model_name: String,
    pub model_type: ModelType,
    pub value: f64,
    pub interval: ConfidenceInterval,
    pub probability: f64,
    pub feature_importance: HashMap<String, f64>,
    pub attribution: HashMap<String, f64>,
    pub context: PredictionContext,
    pub timestamp: DateTime<Utc>,
}

/// Uncertainty decomposition for an ensemble prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncertaintyMetrics {
    /// Standard deviation of the ensemble estimate
    pub prediction_std: f64,
    /// 1 - model agreement
    pub disagreement: f64,
    /// Spread across member point estimates
    pub epistemic: f64,
    /// Mean member confidence-interval half-width
    pub aleatoric: f64,
}

/// Final ensemble prediction returned to callers; immutable once produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub id: Uuid,
    pub value: f64,
    pub interval: ConfidenceInterval,
    /// Weighted mean of member probabilities
    pub confidence: f64,
    pub feature_importance: HashMap<String, f64>,
    pub attribution: HashMap<String, f64>,
    pub uncertainty: UncertaintyMetrics,
    pub model_agreement: f64,
    pub context: PredictionContext,
    pub member_models: Vec<String>,
    pub weights: HashMap<String, f64>,
    /// Residual adjustment applied by the meta-learner, if any
    pub meta_correction: Option<f64>,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Audit entry for one selection decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub timestamp: DateTime<Utc>,
    pub context: PredictionContext,
    pub selected: Vec<String>,
    pub scores: HashMap<String, f64>,
}

/// Audit entry for one weight assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightRecord {
    pub timestamp: DateTime<Utc>,
    pub model_name: String,
    pub weight: f64,
    pub context: PredictionContext,
}

/// Cache entry joining a finished prediction with its eventual outcome
#[derive(Debug, Clone)]
pub struct CachedPrediction {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub context: PredictionContext,
    pub member_predictions: Vec<ModelPrediction>,
    pub weights: HashMap<String, f64>,
    pub ensemble_value: f64,
    pub ensemble_confidence: f64,
    /// Observed ground truth, back-filled via `record_outcome`
    pub actual_value: Option<f64>,
}

/// Health snapshot of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleHealth {
    pub status: String,
    pub total_models: usize,
    pub loaded_models: usize,
    pub cache_size: usize,
    pub resolved_samples: usize,
    pub meta_learner_active: bool,
    pub model_health: HashMap<String, ModelHealth>,
}

/// Per-model health entry
#[derive(Debug, Clone, Serialize)]
pub struct ModelHealth {
    pub accuracy: f64,
    pub confidence: f64,
    pub last_updated: DateTime<Utc>,
    pub is_loaded: bool,
}
