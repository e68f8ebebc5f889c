//! Configuration loading
//!
//! Settings come from an optional TOML file layered with `ENSEMBLE_`-prefixed
//! environment variables. Every field has a default so an empty file (or no
//! file at all) yields a working configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::EnsembleConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Runtime limits for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrent member inferences per predict() call
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-model inference deadline
    #[serde(default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,
    /// Meta-learner fit deadline
    #[serde(default = "default_meta_fit_timeout_ms")]
    pub meta_fit_timeout_ms: u64,
    /// Prediction cache capacity (ring buffer, FIFO eviction)
    #[serde(default = "default_prediction_cache_size")]
    pub prediction_cache_size: usize,
    /// Selection audit history capacity
    #[serde(default = "default_selection_history_size")]
    pub selection_history_size: usize,
    /// Weight audit history capacity, per model
    #[serde(default = "default_weight_history_size")]
    pub weight_history_size: usize,
    /// Recent predictions fed into weight calculation
    #[serde(default = "default_weighting_window")]
    pub weighting_window: usize,
    /// Resolved samples required before the meta-learner trains
    #[serde(default = "default_meta_min_samples")]
    pub meta_min_samples: usize,
    /// Performance-monitoring loop period
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// Meta-learning refresh loop period
    #[serde(default = "default_meta_refresh_interval_secs")]
    pub meta_refresh_interval_secs: u64,
}

fn default_max_concurrency() -> usize {
    8
}
fn default_inference_timeout_ms() -> u64 {
    2_000
}
fn default_meta_fit_timeout_ms() -> u64 {
    10_000
}
fn default_prediction_cache_size() -> usize {
    1_000
}
fn default_selection_history_size() -> usize {
    1_000
}
fn default_weight_history_size() -> usize {
    100
}
fn default_weighting_window() -> usize {
    50
}
fn default_meta_min_samples() -> usize {
    100
}
fn default_monitor_interval_secs() -> u64 {
    300
}
fn default_meta_refresh_interval_secs() -> u64 {
    900
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            inference_timeout_ms: default_inference_timeout_ms(),
            meta_fit_timeout_ms: default_meta_fit_timeout_ms(),
            prediction_cache_size: default_prediction_cache_size(),
            selection_history_size: default_selection_history_size(),
            weight_history_size: default_weight_history_size(),
            weighting_window: default_weighting_window(),
            meta_min_samples: default_meta_min_samples(),
            monitor_interval_secs: default_monitor_interval_secs(),
            meta_refresh_interval_secs: default_meta_refresh_interval_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file plus `ENSEMBLE_*` env overrides
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("ENSEMBLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        Ok(config)
    }
}
